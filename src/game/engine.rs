//! Room state machine and authoritative tick loop

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::config::GameConfig;
use crate::util::time::millis_since;

use super::intent::{self, Intent, IntentKind, IntentQueue, IntentReply, IntentSender};
use super::snapshot::{Snapshot, SnapshotBuilder};
use super::world::GridWorld;
use super::GameError;

/// Room phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomPhase {
    /// No player has joined yet
    Lobby,
    /// Ticking at the fixed cadence
    Running,
    /// Terminal; the last snapshot is frozen
    Over,
}

/// Handle to a running room. Cheap to clone; never touches the world.
#[derive(Clone)]
pub struct RoomHandle {
    pub id: Uuid,
    intents: IntentSender,
    snapshot_tx: broadcast::Sender<Arc<Snapshot>>,
    latest: Arc<RwLock<Arc<Snapshot>>>,
    player_count: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl RoomHandle {
    /// Queue an intent for the next tick; the receiver yields the outcome
    pub fn submit(
        &self,
        player_id: &str,
        kind: IntentKind,
    ) -> Result<oneshot::Receiver<IntentReply>, GameError> {
        if self.is_closed() {
            return Err(GameError::RoomClosed);
        }
        if player_id.trim().is_empty() {
            return Err(GameError::InvalidIntent("missing player id".to_string()));
        }

        let (intent, rx) = Intent::with_reply(player_id, kind);
        self.intents.submit(intent)?;
        Ok(rx)
    }

    /// Submit and wait for the tick that applies it
    pub async fn request(&self, player_id: &str, kind: IntentKind) -> IntentReply {
        let rx = self.submit(player_id, kind)?;
        // A dropped reply means the driver went away before answering
        rx.await.unwrap_or(Err(GameError::RoomClosed))
    }

    /// Subscribe to the per-tick snapshot feed
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Snapshot>> {
        self.snapshot_tx.subscribe()
    }

    /// The most recently produced snapshot
    pub fn latest_snapshot(&self) -> Arc<Snapshot> {
        self.latest.read().clone()
    }

    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop the tick driver; queued intents are rejected with `RoomClosed`
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let _ = self.shutdown.send(true);
    }
}

/// The authoritative simulation for one room
pub struct RoomEngine {
    id: Uuid,
    world: GridWorld,
    phase: RoomPhase,
    tick: u64,
    tick_interval: Duration,
    queue: IntentQueue,
    snapshot_tx: broadcast::Sender<Arc<Snapshot>>,
    latest: Arc<RwLock<Arc<Snapshot>>>,
    builder: SnapshotBuilder,
    player_count: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl RoomEngine {
    /// Create a room in `Lobby` and the handle used to reach it
    pub fn new(id: Uuid, config: &GameConfig, snapshot_buffer: usize) -> (Self, RoomHandle) {
        let (intents, queue) =
            intent::channel(config.intent_queue_capacity, config.max_intents_per_tick);
        let (snapshot_tx, _) = broadcast::channel(snapshot_buffer.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut world = GridWorld::new(config.grid_size).with_trail_drops(config.drop_trail_on_death);
        for _ in 0..config.initial_glow_points {
            world.spawn_glow_point();
        }

        let mut builder = SnapshotBuilder::new(id);
        let latest = Arc::new(RwLock::new(builder.build(0, RoomPhase::Lobby, &world)));
        let player_count = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicBool::new(false));

        let handle = RoomHandle {
            id,
            intents,
            snapshot_tx: snapshot_tx.clone(),
            latest: latest.clone(),
            player_count: player_count.clone(),
            closed: closed.clone(),
            shutdown: Arc::new(shutdown_tx),
        };

        let engine = Self {
            id,
            world,
            phase: RoomPhase::Lobby,
            tick: 0,
            tick_interval: config.tick_interval,
            queue,
            snapshot_tx,
            latest,
            builder,
            player_count,
            closed,
            shutdown_rx,
        };

        (engine, handle)
    }

    pub fn phase(&self) -> RoomPhase {
        self.phase
    }

    /// Run the tick loop until the room is over or shut down
    pub async fn run(mut self) {
        info!(room_id = %self.id, tick_ms = self.tick_interval.as_millis() as u64, "Room tick driver started");

        let mut tick_interval = interval(self.tick_interval);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick_interval.tick() => {
                    self.step();
                    if self.phase == RoomPhase::Over {
                        info!(room_id = %self.id, tick = self.tick, "Game over");
                        break;
                    }
                }
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!(room_id = %self.id, "Room shut down");
                        break;
                    }
                }
            }
        }

        self.closed.store(true, Ordering::Release);
        let rejected = self.queue.close_and_reject();
        if rejected > 0 {
            debug!(room_id = %self.id, rejected, "Rejected intents queued after close");
        }
        info!(room_id = %self.id, snapshots = self.builder.built(), "Room tick driver stopped");
    }

    /// One atomic tick: apply the queued batch, advance the world, publish.
    pub fn step(&mut self) -> Arc<Snapshot> {
        let batch = self.queue.drain();
        let had_intents = !batch.is_empty();
        let was_running = self.phase == RoomPhase::Running;

        let mut accepted = Vec::with_capacity(batch.len());
        for mut intent in batch {
            trace!(
                room_id = %self.id,
                player_id = %intent.player_id,
                queued_ms = millis_since(intent.received_at),
                "Applying intent"
            );
            match self.apply(&intent) {
                Ok(()) => {
                    if let Some(reply) = intent.take_reply() {
                        accepted.push(reply);
                    }
                }
                Err(e) => {
                    debug!(
                        room_id = %self.id,
                        player_id = %intent.player_id,
                        error = %e,
                        "Intent rejected"
                    );
                    intent.respond(Err(e));
                }
            }
        }

        // Rooms that were still in the lobby start moving on the next tick
        if was_running && self.phase == RoomPhase::Running {
            let outcome = self.world.tick();
            for id in &outcome.eliminated {
                info!(room_id = %self.id, player_id = %id, "Player eliminated");
            }
            if self.world.alive_count() == 0 {
                self.phase = RoomPhase::Over;
            }
        }

        self.tick += 1;
        let snapshot = self.builder.build(self.tick, self.phase, &self.world);
        *self.latest.write() = snapshot.clone();

        if had_intents || self.phase != RoomPhase::Lobby {
            // No subscribers is fine
            let _ = self.snapshot_tx.send(snapshot.clone());
        }

        for reply in accepted {
            let _ = reply.send(Ok(snapshot.clone()));
        }

        snapshot
    }

    fn apply(&mut self, intent: &Intent) -> Result<(), GameError> {
        if self.phase == RoomPhase::Over {
            return Err(GameError::RoomClosed);
        }

        let player_id = intent.player_id.as_str();
        match &intent.kind {
            IntentKind::AddPlayer { name } => {
                match self.world.player(player_id).map(|p| p.alive) {
                    // Reconnecting client with a persisted id
                    Some(true) => self.world.rename(player_id, name),
                    Some(false) => Err(GameError::DuplicatePlayer),
                    None => {
                        self.world.add_player(player_id, name)?;
                        self.player_count
                            .store(self.world.players().len(), Ordering::Relaxed);
                        info!(
                            room_id = %self.id,
                            player_id = %player_id,
                            player_count = self.world.players().len(),
                            "Player joined room"
                        );
                        if self.phase == RoomPhase::Lobby {
                            self.phase = RoomPhase::Running;
                        }
                        Ok(())
                    }
                }
            }
            IntentKind::ChangeDirection { direction } => {
                self.world.set_direction(player_id, *direction)
            }
            IntentKind::MovePlayer { row, col } => self.world.teleport(player_id, *row, *col),
            IntentKind::EndGame => {
                if self.world.player(player_id).is_none() {
                    return Err(GameError::UnknownPlayer);
                }
                info!(room_id = %self.id, player_id = %player_id, "End game requested");
                self.phase = RoomPhase::Over;
                Ok(())
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn world_mut(&mut self) -> &mut GridWorld {
        &mut self.world
    }
}
