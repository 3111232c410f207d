//! Wire types shared by the HTTP action endpoint and the WebSocket feed

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::game::{Direction, GameError, IntentKind, Snapshot};

/// Player actions. `action` selects the variant, e.g.
/// `{"action": "changeDirection", "direction": "up"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ClientAction {
    /// Join or rejoin
    AddPlayer {
        #[serde(default)]
        name: Option<String>,
    },

    /// Turn; the direction string is validated when converted to an intent
    ChangeDirection { direction: String },

    /// Administrative move-to
    MovePlayer { row: i64, col: i64 },

    /// End the room's game
    EndGame,
}

impl ClientAction {
    pub fn into_intent(self) -> Result<IntentKind, GameError> {
        Ok(match self {
            ClientAction::AddPlayer { name } => IntentKind::AddPlayer {
                name: name.unwrap_or_default(),
            },
            ClientAction::ChangeDirection { direction } => IntentKind::ChangeDirection {
                direction: direction.parse::<Direction>()?,
            },
            ClientAction::MovePlayer { row, col } => IntentKind::MovePlayer { row, col },
            ClientAction::EndGame => IntentKind::EndGame,
        })
    }
}

/// Message sent by a client over the WebSocket
#[derive(Debug, Clone, Deserialize)]
pub struct ClientMsg {
    /// Claimed identity; optional once the connection has one
    #[serde(rename = "playerId", default)]
    pub player_id: Option<String>,
    #[serde(flatten)]
    pub action: ClientAction,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Full room state, one per tick
    Snapshot(Arc<Snapshot>),

    /// Rejection addressed to this connection only
    Error { code: String, message: String },
}

impl From<&GameError> for ServerMsg {
    fn from(e: &GameError) -> Self {
        ServerMsg::Error {
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::RoomPhase;
    use uuid::Uuid;

    #[test]
    fn test_parse_actions() {
        let msg: ClientMsg =
            serde_json::from_str(r#"{"action":"changeDirection","playerId":"P1","direction":"up"}"#)
                .unwrap();
        assert_eq!(msg.player_id.as_deref(), Some("P1"));
        assert_eq!(
            msg.action.into_intent().unwrap(),
            IntentKind::ChangeDirection { direction: Direction::Up }
        );

        let msg: ClientMsg = serde_json::from_str(r#"{"action":"addPlayer"}"#).unwrap();
        assert_eq!(
            msg.action.into_intent().unwrap(),
            IntentKind::AddPlayer { name: String::new() }
        );

        let msg: ClientMsg =
            serde_json::from_str(r#"{"action":"movePlayer","row":3,"col":-1}"#).unwrap();
        assert_eq!(msg.action, ClientAction::MovePlayer { row: 3, col: -1 });

        let msg: ClientMsg = serde_json::from_str(r#"{"action":"endGame","playerId":"x"}"#).unwrap();
        assert_eq!(msg.action, ClientAction::EndGame);
    }

    #[test]
    fn test_bad_direction_is_invalid_intent() {
        let action = ClientAction::ChangeDirection { direction: "north".into() };
        assert!(matches!(action.into_intent(), Err(GameError::InvalidIntent(_))));
        assert!(serde_json::from_str::<ClientMsg>(r#"{"action":"fly"}"#).is_err());
    }

    #[test]
    fn test_server_msg_tags() {
        let snapshot = Arc::new(Snapshot {
            room_id: Uuid::nil(),
            tick: 3,
            phase: RoomPhase::Lobby,
            players: vec![],
            glow_points: vec![],
            game_over: false,
        });
        let json = serde_json::to_value(ServerMsg::Snapshot(snapshot)).unwrap();
        assert_eq!(json["type"], "snapshot");
        assert_eq!(json["tick"], 3);
        assert_eq!(json["gameOver"], false);

        let json = serde_json::to_value(ServerMsg::from(&GameError::RoomFull)).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "room_full");
    }
}
