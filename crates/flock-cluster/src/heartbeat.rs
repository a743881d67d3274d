//! Heartbeat staleness detection

use crate::error::{ClusterError, Result};
use crate::leader_info::LeaderInfo;
use std::time::Duration;

/// Current wall-clock time in epoch milliseconds
pub fn current_time_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Whether a recorded leader has missed its heartbeat window.
///
/// True iff `now - timestamp > interval * multiplier`. A timestamp ahead of
/// `now` (clock skew between nodes) is never stale.
pub fn is_stale(info: &LeaderInfo, now_millis: i64, multiplier: u32) -> bool {
    let timeout = info
        .heartbeat_interval_millis()
        .saturating_mul(i64::from(multiplier));
    now_millis.saturating_sub(info.heartbeat_timestamp_millis()) > timeout
}

/// Staleness detector bound to a validated timeout multiplier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessDetector {
    multiplier: u32,
}

impl StalenessDetector {
    /// Zero and negative multipliers are configuration errors.
    pub fn new(multiplier: i64) -> Result<Self> {
        if multiplier < 1 {
            return Err(ClusterError::configuration(format!(
                "heartbeat_timeout_multiplier must be >= 1, got {}",
                multiplier
            )));
        }
        let multiplier = u32::try_from(multiplier).map_err(|_| {
            ClusterError::configuration(format!(
                "heartbeat_timeout_multiplier is too large: {}",
                multiplier
            ))
        })?;
        Ok(Self { multiplier })
    }

    pub fn multiplier(&self) -> u32 {
        self.multiplier
    }

    pub fn is_stale(&self, info: &LeaderInfo, now_millis: i64) -> bool {
        is_stale(info, now_millis, self.multiplier)
    }

    /// How long after its last heartbeat the given leader becomes stale
    pub fn timeout_for(&self, info: &LeaderInfo) -> Duration {
        let millis = info
            .heartbeat_interval_millis()
            .saturating_mul(i64::from(self.multiplier));
        Duration::from_millis(u64::try_from(millis).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeId;

    fn record(interval: i64, timestamp: i64) -> LeaderInfo {
        LeaderInfo::new(NodeId::new(), interval, timestamp)
    }

    #[test]
    fn test_within_window_is_not_stale() {
        let info = record(1_000, 10_000);
        assert!(!is_stale(&info, 10_000, 3));
        assert!(!is_stale(&info, 13_000, 3));
    }

    #[test]
    fn test_boundary_is_exclusive() {
        let info = record(1_000, 10_000);
        // exactly interval * multiplier old: still alive
        assert!(!is_stale(&info, 13_000, 3));
        assert!(is_stale(&info, 13_001, 3));
    }

    #[test]
    fn test_future_timestamp_is_not_stale() {
        let info = record(1_000, 50_000);
        assert!(!is_stale(&info, 10_000, 1));
    }

    #[test]
    fn test_ancient_record_is_stale() {
        let info = record(1_000, 0);
        assert!(is_stale(&info, current_time_millis(), 5));
    }

    #[test]
    fn test_no_overflow_on_extreme_values() {
        let info = record(i64::MAX, i64::MIN);
        assert!(!is_stale(&info, i64::MAX, u32::MAX));
    }

    #[test]
    fn test_detector_rejects_zero_and_negative() {
        assert!(matches!(
            StalenessDetector::new(0),
            Err(ClusterError::Configuration(_))
        ));
        assert!(matches!(
            StalenessDetector::new(-1),
            Err(ClusterError::Configuration(_))
        ));
        assert_eq!(StalenessDetector::new(1).unwrap().multiplier(), 1);
    }

    #[test]
    fn test_detector_timeout() {
        let detector = StalenessDetector::new(4).unwrap();
        let info = record(250, 0);
        assert_eq!(detector.timeout_for(&info), Duration::from_millis(1_000));
        assert!(detector.is_stale(&info, 1_001));
        assert!(!detector.is_stale(&info, 1_000));
    }

    #[test]
    fn test_is_deterministic() {
        let info = record(500, 1_000);
        let first = is_stale(&info, 2_600, 3);
        for _ in 0..10 {
            assert_eq!(is_stale(&info, 2_600, 3), first);
        }
    }
}
