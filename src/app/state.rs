//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::rooms::RoomRegistry;
use crate::ws::SessionManager;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub rooms: Arc<RoomRegistry>,
    pub sessions: Arc<SessionManager>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        // Initialize room registry
        let rooms = Arc::new(RoomRegistry::new(
            config.game.clone(),
            config.snapshot_buffer,
            config.room_idle_timeout,
        ));

        // Initialize session manager on top of the registry
        let sessions = Arc::new(SessionManager::new(rooms.clone()));

        Self {
            config,
            rooms,
            sessions,
        }
    }
}
