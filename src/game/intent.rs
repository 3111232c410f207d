//! Per-room intent queue (many producers, one tick consumer)

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::util::time::unix_millis;

use super::{Direction, GameError, PlayerId, Snapshot};

/// Result delivered to the submitter once the intent's tick has run
pub type IntentReply = Result<Arc<Snapshot>, GameError>;

/// What a player asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentKind {
    /// Join (or rejoin) the room
    AddPlayer { name: String },
    /// Heading for the next movement step
    ChangeDirection { direction: Direction },
    /// Administrative move-to
    MovePlayer { row: i64, col: i64 },
    /// Finish the room's game
    EndGame,
}

/// An intent waiting for the next tick
#[derive(Debug)]
pub struct Intent {
    pub player_id: PlayerId,
    pub kind: IntentKind,
    pub received_at: u64,
    reply: Option<oneshot::Sender<IntentReply>>,
}

impl Intent {
    /// Fire-and-forget intent
    pub fn new(player_id: impl Into<PlayerId>, kind: IntentKind) -> Self {
        Self {
            player_id: player_id.into(),
            kind,
            received_at: unix_millis(),
            reply: None,
        }
    }

    /// Intent whose outcome is reported back on the returned receiver
    pub fn with_reply(
        player_id: impl Into<PlayerId>,
        kind: IntentKind,
    ) -> (Self, oneshot::Receiver<IntentReply>) {
        let (tx, rx) = oneshot::channel();
        let mut intent = Self::new(player_id, kind);
        intent.reply = Some(tx);
        (intent, rx)
    }

    /// Take the reply channel, leaving the intent detached
    pub fn take_reply(&mut self) -> Option<oneshot::Sender<IntentReply>> {
        self.reply.take()
    }

    /// Answer the submitter (if it is still listening)
    pub fn respond(mut self, reply: IntentReply) {
        if let Some(tx) = self.reply.take() {
            let _ = tx.send(reply);
        }
    }
}

/// Create a room's intent queue
pub fn channel(capacity: usize, max_per_player_per_tick: usize) -> (IntentSender, IntentQueue) {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    let pending = Arc::new(DashMap::new());
    (
        IntentSender {
            tx,
            pending: pending.clone(),
            max_per_player: max_per_player_per_tick.max(1),
        },
        IntentQueue {
            rx,
            capacity,
            pending,
        },
    )
}

/// Producer half, cloned into every connection path
#[derive(Clone)]
pub struct IntentSender {
    tx: mpsc::Sender<Intent>,
    /// Queued-but-undrained intents per player
    pending: Arc<DashMap<PlayerId, usize>>,
    max_per_player: usize,
}

impl IntentSender {
    /// Enqueue without waiting.
    ///
    /// A player already holding `max_per_player` undrained intents is
    /// throttled before touching the shared queue, so one sender cannot
    /// crowd out the others. A full queue is also reported as `Throttled`.
    pub fn submit(&self, intent: Intent) -> Result<(), GameError> {
        {
            let mut pending = self.pending.entry(intent.player_id.clone()).or_insert(0);
            if *pending >= self.max_per_player {
                debug!(player_id = %intent.player_id, "Intent over per-tick cap, throttled");
                return Err(GameError::Throttled);
            }
            *pending += 1;
        }

        self.tx.try_send(intent).map_err(|e| {
            let (err, intent) = match e {
                mpsc::error::TrySendError::Full(intent) => (GameError::Throttled, intent),
                mpsc::error::TrySendError::Closed(intent) => (GameError::RoomClosed, intent),
            };
            release(&self.pending, &intent.player_id);
            err
        })
    }
}

/// Give back one pending slot
fn release(pending: &DashMap<PlayerId, usize>, player_id: &str) {
    if let Some(mut count) = pending.get_mut(player_id) {
        *count = count.saturating_sub(1);
    }
    pending.remove_if(player_id, |_, count| *count == 0);
}

/// Consumer half, owned by the room's tick driver
pub struct IntentQueue {
    rx: mpsc::Receiver<Intent>,
    capacity: usize,
    pending: Arc<DashMap<PlayerId, usize>>,
}

impl IntentQueue {
    /// Take everything queued so far as one batch, in FIFO order.
    ///
    /// At most one queue's worth is taken so producers racing the drain
    /// cannot keep a tick open.
    pub fn drain(&mut self) -> Vec<Intent> {
        let mut batch = Vec::new();

        for _ in 0..self.capacity {
            let Ok(intent) = self.rx.try_recv() else {
                break;
            };
            release(&self.pending, &intent.player_id);
            batch.push(intent);
        }

        batch
    }

    /// Stop accepting intents and reject whatever is still queued
    pub fn close_and_reject(&mut self) -> usize {
        self.rx.close();
        let mut rejected = 0;
        while let Ok(intent) = self.rx.try_recv() {
            intent.respond(Err(GameError::RoomClosed));
            rejected += 1;
        }
        self.pending.clear();
        rejected
    }
}
