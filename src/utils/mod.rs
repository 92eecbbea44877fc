//! Utility functions and helpers

pub mod logging;
pub mod monitoring;

pub use logging::init_logging;
pub use monitoring::{global_metrics, MetricsSnapshot, PoolMetrics};

use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix time in seconds, saturating at `u32::MAX`
pub fn unix_time() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().min(u64::from(u32::MAX)) as u32)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_time() {
        // 2023-11-14
        assert!(unix_time() > 1_700_000_000);
    }
}
