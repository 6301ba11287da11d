//! Time utilities for message stamping and uptime tracking

use std::time::Instant;

use chrono::Utc;

/// Current wall-clock time as fractional Unix seconds (envelope timestamp)
pub fn unix_secs_f64() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamps_agree() {
        let secs = unix_secs_f64();
        let millis = unix_millis();
        assert!((secs * 1000.0 - millis as f64).abs() < 5_000.0);
    }

    #[test]
    fn test_uptime_starts_after_init() {
        init_server_time();
        assert!(uptime_secs() < 60);
    }
}
