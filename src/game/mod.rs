//! Game simulation modules

pub mod engine;
pub mod intent;
pub mod snapshot;
pub mod world;

pub use engine::{RoomEngine, RoomHandle, RoomPhase};
pub use intent::{IntentKind, IntentReply};
pub use snapshot::Snapshot;
pub use world::{Direction, PlayerId, MAX_PLAYERS};

/// Rejection reasons for intents and room operations.
///
/// Every variant is scoped to the submitting connection; none of them stops a
/// room's tick driver.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    #[error("Unknown player")]
    UnknownPlayer,

    #[error("Player already in room")]
    DuplicatePlayer,

    #[error("Room is full")]
    RoomFull,

    #[error("Room not found")]
    RoomNotFound,

    #[error("Room is closed")]
    RoomClosed,

    #[error("Invalid intent: {0}")]
    InvalidIntent(String),

    #[error("Too many intents, slow down")]
    Throttled,
}

impl GameError {
    /// Stable machine-readable code used on the wire
    pub fn code(&self) -> &'static str {
        match self {
            GameError::UnknownPlayer => "unknown_player",
            GameError::DuplicatePlayer => "duplicate_player",
            GameError::RoomFull => "room_full",
            GameError::RoomNotFound => "room_not_found",
            GameError::RoomClosed => "room_closed",
            GameError::InvalidIntent(_) => "invalid_intent",
            GameError::Throttled => "throttled",
        }
    }
}
