//! Time-related utilities

use std::time::{SystemTime, UNIX_EPOCH};

/// Current system time in nanoseconds since UNIX epoch.
///
/// Returns `0` (the unknown-time sentinel) if the clock is set before the epoch.
pub fn system_time_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_time() {
        let nanos = system_time_nanos();

        // After 2020
        assert!(nanos > 1_600_000_000 * 1_000_000_000);
    }
}
