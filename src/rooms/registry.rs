//! Room registry: creation, lookup, listing and idle-room collection

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::GameConfig;
use crate::game::{GameError, IntentKind, IntentReply, RoomEngine, RoomHandle, MAX_PLAYERS};

/// Opaque room identifier
pub type RoomId = Uuid;

/// Whether a room shows up in the public listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

impl FromStr for Visibility {
    type Err = GameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "public" => Ok(Visibility::Public),
            "private" => Ok(Visibility::Private),
            other => Err(GameError::InvalidIntent(format!("unknown room type '{}'", other))),
        }
    }
}

/// Public listing entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomSummary {
    pub room_id: RoomId,
    pub player_count: usize,
    pub created_at: DateTime<Utc>,
}

/// A registered room: its engine handle plus connection bookkeeping
pub struct RoomEntry {
    pub handle: RoomHandle,
    pub visibility: Visibility,
    pub created_at: DateTime<Utc>,
    seq: u64,
    connections: AtomicUsize,
    /// Set while the room has no connections
    idle_since: Mutex<Option<Instant>>,
}

impl RoomEntry {
    pub fn id(&self) -> RoomId {
        self.handle.id
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Acquire)
    }

    /// A connection attached
    pub fn connect(&self) {
        let mut idle = self.idle_since.lock();
        self.connections.fetch_add(1, Ordering::AcqRel);
        *idle = None;
    }

    /// A connection went away
    pub fn disconnect(&self) {
        let mut idle = self.idle_since.lock();
        let before = self
            .connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        if before <= 1 {
            *idle = Some(Instant::now());
        }
    }

    /// Intent activity restarts the idle clock of a room nobody is watching
    pub fn touch(&self) {
        let mut idle = self.idle_since.lock();
        if idle.is_some() {
            *idle = Some(Instant::now());
        }
    }

    fn idle_for(&self, timeout: Duration) -> bool {
        let idle = self.idle_since.lock();
        self.connections() == 0 && idle.map_or(false, |since| since.elapsed() >= timeout)
    }

    fn summary(&self) -> RoomSummary {
        RoomSummary {
            room_id: self.id(),
            player_count: self.handle.player_count(),
            created_at: self.created_at,
        }
    }
}

/// Registry of all live rooms
pub struct RoomRegistry {
    rooms: DashMap<RoomId, Arc<RoomEntry>>,
    /// Serializes create/destroy
    lifecycle: Mutex<()>,
    next_seq: AtomicU64,
    game: GameConfig,
    snapshot_buffer: usize,
    idle_timeout: Duration,
}

impl RoomRegistry {
    pub fn new(game: GameConfig, snapshot_buffer: usize, idle_timeout: Duration) -> Self {
        Self {
            rooms: DashMap::new(),
            lifecycle: Mutex::new(()),
            next_seq: AtomicU64::new(0),
            game,
            snapshot_buffer,
            idle_timeout,
        }
    }

    /// Create a room in `Lobby` and start its tick driver.
    /// Must be called from within a tokio runtime.
    pub fn create_room(&self, visibility: Visibility) -> RoomId {
        let _guard = self.lifecycle.lock();

        let mut id = Uuid::new_v4();
        while self.rooms.contains_key(&id) {
            id = Uuid::new_v4();
        }

        let (engine, handle) = RoomEngine::new(id, &self.game, self.snapshot_buffer);
        let entry = Arc::new(RoomEntry {
            handle,
            visibility,
            created_at: Utc::now(),
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            connections: AtomicUsize::new(0),
            idle_since: Mutex::new(Some(Instant::now())),
        });
        self.rooms.insert(id, entry);

        tokio::spawn(engine.run());

        info!(room_id = %id, visibility = ?visibility, "Room created");
        id
    }

    pub fn get(&self, id: &RoomId) -> Option<Arc<RoomEntry>> {
        self.rooms.get(id).map(|r| r.value().clone())
    }

    fn get_open(&self, id: &RoomId) -> Result<Arc<RoomEntry>, GameError> {
        let entry = self.get(id).ok_or(GameError::RoomNotFound)?;
        if entry.handle.is_closed() {
            return Err(GameError::RoomClosed);
        }
        Ok(entry)
    }

    /// Admit a player to a room. Re-admitting a live member succeeds.
    pub async fn join_room(&self, id: &RoomId, player_id: &str) -> Result<(), GameError> {
        let entry = self.get_open(id)?;

        let already_member = entry.handle.latest_snapshot().player(player_id).is_some();
        if !already_member && entry.handle.player_count() >= MAX_PLAYERS {
            return Err(GameError::RoomFull);
        }

        entry.touch();
        entry
            .handle
            .request(player_id, IntentKind::AddPlayer { name: String::new() })
            .await
            .map(|_| ())
    }

    /// Route an intent to a room and wait for the snapshot of the tick that
    /// applied it
    pub async fn submit(&self, id: &RoomId, player_id: &str, kind: IntentKind) -> IntentReply {
        let entry = self.get_open(id)?;
        entry.touch();
        entry.handle.request(player_id, kind).await
    }

    /// Public rooms that still accept intents, in creation order
    pub fn list_public_rooms(&self) -> Vec<RoomSummary> {
        let mut rooms: Vec<(u64, RoomSummary)> = self
            .rooms
            .iter()
            .filter(|r| r.visibility == Visibility::Public && !r.handle.is_closed())
            .map(|r| (r.seq, r.summary()))
            .collect();
        rooms.sort_by_key(|(seq, _)| *seq);
        rooms.into_iter().map(|(_, summary)| summary).collect()
    }

    /// Remove a room and stop its tick driver
    pub fn destroy(&self, id: &RoomId) -> bool {
        let _guard = self.lifecycle.lock();
        self.remove_locked(id)
    }

    fn remove_locked(&self, id: &RoomId) -> bool {
        match self.rooms.remove(id) {
            Some((_, entry)) => {
                entry.handle.shutdown();
                info!(room_id = %id, "Room destroyed");
                true
            }
            None => false,
        }
    }

    /// Destroy every room idle past the grace period. Returns how many went.
    pub fn collect_garbage(&self) -> usize {
        let _guard = self.lifecycle.lock();

        let idle: Vec<RoomId> = self
            .rooms
            .iter()
            .filter(|r| r.idle_for(self.idle_timeout))
            .map(|r| *r.key())
            .collect();

        idle.iter().filter(|id| self.remove_locked(id)).count()
    }

    /// Periodic idle-room collection
    pub async fn run_reaper(self: Arc<Self>, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let removed = self.collect_garbage();
            if removed > 0 {
                info!(removed, remaining = self.active_rooms(), "Collected idle rooms");
            }
        }
    }

    /// Stop every room (server shutdown)
    pub fn shutdown_all(&self) {
        let _guard = self.lifecycle.lock();
        let ids: Vec<RoomId> = self.rooms.iter().map(|r| *r.key()).collect();
        for id in ids {
            self.remove_locked(&id);
        }
        if !self.rooms.is_empty() {
            warn!(left = self.rooms.len(), "Rooms remained after shutdown");
        }
    }

    pub fn active_rooms(&self) -> usize {
        self.rooms.len()
    }

    pub fn total_players(&self) -> usize {
        self.rooms.iter().map(|r| r.handle.player_count()).sum()
    }
}
