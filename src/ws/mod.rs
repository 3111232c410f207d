//! WebSocket feed and connection management

pub mod handler;
pub mod protocol;
pub mod session;

pub use session::SessionManager;
