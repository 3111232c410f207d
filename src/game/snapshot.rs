//! Snapshot building for network transmission

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::engine::RoomPhase;
use super::world::{Cell, Direction, GridWorld, Player};

/// Immutable point-in-time view of a room, shared by the live feed,
/// `load_state` and HTTP action replies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub room_id: Uuid,
    /// Engine step that produced this snapshot
    pub tick: u64,
    pub phase: RoomPhase,
    pub players: Vec<PlayerView>,
    #[serde(rename = "glowPoints")]
    pub glow_points: Vec<Cell>,
    #[serde(rename = "gameOver")]
    pub game_over: bool,
}

impl Snapshot {
    pub fn player(&self, id: &str) -> Option<&PlayerView> {
        self.players.iter().find(|p| p.id == id)
    }
}

/// Player entry in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerView {
    pub id: String,
    pub name: String,
    pub row: u16,
    pub col: u16,
    pub direction: Direction,
    pub score: u32,
    pub alive: bool,
    /// Display hue in degrees, derived from join order
    pub hue: u16,
    /// Most recent first
    pub trail: Vec<Cell>,
}

impl From<&Player> for PlayerView {
    fn from(p: &Player) -> Self {
        Self {
            id: p.id.clone(),
            name: p.name.clone(),
            row: p.position.row,
            col: p.position.col,
            direction: p.direction,
            score: p.score,
            alive: p.alive,
            hue: p.hue(),
            trail: p.trail.iter().copied().collect(),
        }
    }
}

/// Builds snapshots for one room
pub struct SnapshotBuilder {
    room_id: Uuid,
    /// Snapshots produced so far
    built: u64,
}

impl SnapshotBuilder {
    pub fn new(room_id: Uuid) -> Self {
        Self { room_id, built: 0 }
    }

    /// Capture the world as it stands after a tick
    pub fn build(&mut self, tick: u64, phase: RoomPhase, world: &GridWorld) -> Arc<Snapshot> {
        self.built += 1;
        Arc::new(Snapshot {
            room_id: self.room_id,
            tick,
            phase,
            players: world.players().iter().map(PlayerView::from).collect(),
            glow_points: world.glow_points().collect(),
            game_over: phase == RoomPhase::Over,
        })
    }

    pub fn built(&self) -> u64 {
        self.built
    }
}
