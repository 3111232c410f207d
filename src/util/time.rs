//! Time utilities

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Milliseconds elapsed since a `unix_millis` timestamp, saturating at zero
pub fn millis_since(timestamp: u64) -> u64 {
    unix_millis().saturating_sub(timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_since_future_timestamp_is_zero() {
        assert_eq!(millis_since(unix_millis() + 60_000), 0);
    }

    #[test]
    fn uptime_starts_after_init() {
        init_server_time();
        assert!(uptime_secs() < 5);
    }
}
