//! Host position estimation and drift checks

/// Max allowed drift before a participant is force-seeked (seconds)
pub const DRIFT_THRESHOLD_SECONDS: f64 = 3.0;

/// Upper bound on how far a stale playback record is extrapolated (seconds)
pub const EXTRAPOLATION_CAP_SECONDS: f64 = 10.0;

/// Result of comparing a participant's position with the host's
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftCheck {
    pub needs_sync: bool,
    /// Absolute difference in seconds
    pub drift: f64,
}

/// Estimate where the host is *now*, given the last published record.
///
/// A paused host is exactly where it said it was. A playing host has moved on
/// by the time elapsed since `host_timestamp_ms`, bounded by `cap_seconds` so a
/// stale write or a skewed clock can't cause a huge jump. A timestamp from the
/// future (skewed host clock) counts as no elapsed time.
pub fn estimate_host_time(
    host_time: f64,
    host_timestamp_ms: u64,
    is_playing: bool,
    now_ms: u64,
    cap_seconds: f64,
) -> f64 {
    if !is_playing || host_timestamp_ms == 0 {
        return host_time;
    }
    let elapsed = now_ms.saturating_sub(host_timestamp_ms) as f64 / 1000.0;
    host_time + elapsed.min(cap_seconds)
}

/// Decide whether a viewer at `viewer_time` must be corrected towards `host_time`
pub fn check_drift(viewer_time: f64, host_time: f64, threshold: f64) -> DriftCheck {
    let drift = (viewer_time - host_time).abs();
    DriftCheck {
        needs_sync: drift > threshold,
        drift,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 1_700_000_000_000;

    #[test]
    fn test_estimate_playing_adds_elapsed() {
        let t = estimate_host_time(100.0, NOW - 5000, true, NOW, EXTRAPOLATION_CAP_SECONDS);
        assert!((t - 105.0).abs() < 1e-9);
    }

    #[test]
    fn test_estimate_paused_is_exact() {
        let t = estimate_host_time(100.0, NOW - 5000, false, NOW, EXTRAPOLATION_CAP_SECONDS);
        assert_eq!(t, 100.0);

        let t = estimate_host_time(100.0, NOW - 3_600_000, false, NOW, EXTRAPOLATION_CAP_SECONDS);
        assert_eq!(t, 100.0);
    }

    #[test]
    fn test_estimate_is_capped() {
        let t = estimate_host_time(100.0, NOW - 60_000, true, NOW, EXTRAPOLATION_CAP_SECONDS);
        assert!((t - 110.0).abs() < 1e-9);
    }

    #[test]
    fn test_estimate_future_timestamp_counts_as_zero() {
        let t = estimate_host_time(100.0, NOW + 2000, true, NOW, EXTRAPOLATION_CAP_SECONDS);
        assert_eq!(t, 100.0);
    }

    #[test]
    fn test_check_drift_over_threshold() {
        let check = check_drift(10.0, 14.0, DRIFT_THRESHOLD_SECONDS);
        assert!(check.needs_sync);
        assert!((check.drift - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_check_drift_within_threshold() {
        let check = check_drift(10.0, 12.0, DRIFT_THRESHOLD_SECONDS);
        assert!(!check.needs_sync);
        assert!((check.drift - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_check_drift_exactly_threshold_is_tolerated() {
        assert!(!check_drift(10.0, 13.0, DRIFT_THRESHOLD_SECONDS).needs_sync);
        assert!(!check_drift(13.0, 10.0, DRIFT_THRESHOLD_SECONDS).needs_sync);
    }
}
