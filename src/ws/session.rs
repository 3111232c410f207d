//! Connection bookkeeping: which room and player each live connection speaks for

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info};
use uuid::Uuid;

use crate::game::{GameError, IntentKind, IntentReply, PlayerId, Snapshot};
use crate::rooms::{RoomId, RoomRegistry};

/// State of one live connection
#[derive(Debug, Clone)]
pub struct Session {
    pub room_id: RoomId,
    /// Identity the client claimed; bound on first use
    pub player_id: Option<PlayerId>,
}

/// What a freshly opened connection needs to start streaming
pub struct Subscription {
    pub connection_id: Uuid,
    pub room_id: RoomId,
    /// State at attach time, for hydration before the live feed
    pub initial: Arc<Snapshot>,
    pub snapshots: broadcast::Receiver<Arc<Snapshot>>,
}

/// Maps connections to rooms and routes their intents.
///
/// Player ids are taken at face value; there is no authentication.
pub struct SessionManager {
    registry: Arc<RoomRegistry>,
    sessions: DashMap<Uuid, Session>,
}

impl SessionManager {
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self {
            registry,
            sessions: DashMap::new(),
        }
    }

    /// Attach a connection to a room
    pub fn open(
        &self,
        room_id: RoomId,
        claimed_player_id: Option<PlayerId>,
    ) -> Result<Subscription, GameError> {
        let entry = self.registry.get(&room_id).ok_or(GameError::RoomNotFound)?;

        // Subscribe before reading the latest snapshot so no tick falls between
        let snapshots = entry.handle.subscribe();
        let initial = entry.handle.latest_snapshot();

        let connection_id = Uuid::new_v4();
        let player_id = claimed_player_id.filter(|id| !id.trim().is_empty());
        entry.connect();
        self.sessions.insert(
            connection_id,
            Session {
                room_id,
                player_id: player_id.clone(),
            },
        );

        info!(
            connection_id = %connection_id,
            room_id = %room_id,
            player_id = ?player_id,
            connections = entry.connections(),
            "Connection attached"
        );

        Ok(Subscription {
            connection_id,
            room_id,
            initial,
            snapshots,
        })
    }

    /// Queue an intent on behalf of a connection.
    ///
    /// The first player id seen on a connection is bound to it; a later
    /// message claiming a different id is rejected.
    pub fn submit(
        &self,
        connection_id: &Uuid,
        claimed_player_id: Option<&str>,
        kind: IntentKind,
    ) -> Result<oneshot::Receiver<IntentReply>, GameError> {
        let (room_id, player_id) = {
            let mut session = self
                .sessions
                .get_mut(connection_id)
                .ok_or_else(|| GameError::InvalidIntent("unknown connection".to_string()))?;

            let claimed = claimed_player_id.filter(|id| !id.trim().is_empty());
            let player_id = match (session.player_id.clone(), claimed) {
                (Some(bound), Some(claimed)) if bound != claimed => {
                    return Err(GameError::InvalidIntent(
                        "connection is bound to another player".to_string(),
                    ));
                }
                (Some(bound), _) => bound,
                (None, Some(claimed)) => {
                    session.player_id = Some(claimed.to_string());
                    claimed.to_string()
                }
                (None, None) => {
                    return Err(GameError::InvalidIntent("missing player id".to_string()));
                }
            };
            (session.room_id, player_id)
        };

        // A room removed from the registry is gone for good
        let entry = self.registry.get(&room_id).ok_or(GameError::RoomClosed)?;
        entry.touch();
        entry.handle.submit(&player_id, kind)
    }

    /// Detach a connection. The player stays in the world.
    pub fn close(&self, connection_id: &Uuid) {
        let Some((_, session)) = self.sessions.remove(connection_id) else {
            return;
        };

        if let Some(entry) = self.registry.get(&session.room_id) {
            entry.disconnect();
            info!(
                connection_id = %connection_id,
                room_id = %session.room_id,
                connections = entry.connections(),
                "Connection detached"
            );
        } else {
            debug!(connection_id = %connection_id, "Connection detached from removed room");
        }
    }

    pub fn session(&self, connection_id: &Uuid) -> Option<Session> {
        self.sessions.get(connection_id).map(|s| s.value().clone())
    }

    pub fn active_connections(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::game::{Direction, RoomPhase};
    use crate::rooms::Visibility;
    use std::time::Duration;
    use tokio_test::assert_ok;

    fn manager() -> (Arc<RoomRegistry>, SessionManager) {
        let game = GameConfig {
            tick_interval: Duration::from_millis(5),
            ..GameConfig::default()
        };
        let registry = Arc::new(RoomRegistry::new(game, 64, Duration::ZERO));
        let sessions = SessionManager::new(registry.clone());
        (registry, sessions)
    }

    #[tokio::test]
    async fn test_open_unknown_room() {
        let (_, sessions) = manager();
        assert_eq!(
            sessions.open(Uuid::new_v4(), None).err(),
            Some(GameError::RoomNotFound)
        );
    }

    #[tokio::test]
    async fn test_intents_flow_to_subscribers() {
        let (registry, sessions) = manager();
        let room_id = registry.create_room(Visibility::Public);
        let mut sub = assert_ok!(sessions.open(room_id, Some("P1".into())));
        assert_eq!(sub.initial.phase, RoomPhase::Lobby);

        let rx = assert_ok!(sessions.submit(
            &sub.connection_id,
            None,
            IntentKind::AddPlayer { name: "Ann".into() }
        ));
        let replied = rx.await.unwrap().unwrap();
        assert_eq!(replied.player("P1").unwrap().name, "Ann");

        // The feed carries the same snapshot the reply did
        loop {
            let snapshot = sub.snapshots.recv().await.unwrap();
            if snapshot.tick == replied.tick {
                assert!(Arc::ptr_eq(&snapshot, &replied));
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_identity_binding() {
        let (registry, sessions) = manager();
        let room_id = registry.create_room(Visibility::Public);
        let sub = sessions.open(room_id, None).unwrap();

        assert!(matches!(
            sessions.submit(&sub.connection_id, None, IntentKind::EndGame),
            Err(GameError::InvalidIntent(_))
        ));
        assert_ok!(sessions.submit(
            &sub.connection_id,
            Some("P1"),
            IntentKind::AddPlayer { name: String::new() }
        ));
        assert!(matches!(
            sessions.submit(
                &sub.connection_id,
                Some("P2"),
                IntentKind::ChangeDirection { direction: Direction::Up }
            ),
            Err(GameError::InvalidIntent(_))
        ));
        assert_eq!(
            sessions.session(&sub.connection_id).unwrap().player_id.as_deref(),
            Some("P1")
        );
    }

    #[tokio::test]
    async fn test_close_keeps_player_and_marks_room_idle() {
        let (registry, sessions) = manager();
        let room_id = registry.create_room(Visibility::Public);
        let sub = sessions.open(room_id, Some("P1".into())).unwrap();
        let rx = sessions
            .submit(&sub.connection_id, None, IntentKind::AddPlayer { name: String::new() })
            .unwrap();
        rx.await.unwrap().unwrap();

        // Watched rooms survive collection
        assert_eq!(registry.collect_garbage(), 0);

        sessions.close(&sub.connection_id);
        assert_eq!(sessions.active_connections(), 0);
        let entry = registry.get(&room_id).unwrap();
        assert_eq!(entry.connections(), 0);
        assert!(entry.handle.latest_snapshot().player("P1").is_some());

        assert_eq!(registry.collect_garbage(), 1);
    }
}
