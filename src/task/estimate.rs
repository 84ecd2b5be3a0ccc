//! Completion-time estimation
//!
//! The worker's own "Completed" percentage is not trusted (observed to be
//! bogus on removable media), so progress is derived from wall-clock time
//! against a corrected estimate instead.

use crate::task::progress::ProgressSample;

/// Fixed padding for the post-copy disk sync the worker performs after the
/// last progress line.
pub const SYNC_PADDING_SECS: f64 = 140.0;

/// Parse an `HH:MM:SS` duration as seconds since midnight.
pub fn hhmmss_to_secs(text: &str) -> Option<u64> {
    let mut parts = text.splitn(3, ':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: u64 = parts.next()?.parse().ok()?;
    if minutes >= 60 || seconds >= 60 {
        return None;
    }
    Some(hours * 3600 + minutes * 60 + seconds)
}

/// Total-seconds estimate corrected for startup overhead and sync time.
pub fn corrected_estimate(imaging_start_secs: f64, sample: &ProgressSample) -> f64 {
    imaging_start_secs
        + sample.elapsed_secs as f64
        + sample.remaining_secs as f64
        + SYNC_PADDING_SECS
}

/// Wall-clock-based progress percentage, clamped to [0, 100].
pub fn percent_from_estimate(wall_elapsed_secs: f64, estimate_secs: f64) -> f64 {
    if estimate_secs <= 0.0 {
        return 0.0;
    }
    (100.0 * wall_elapsed_secs / estimate_secs).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hhmmss() {
        assert_eq!(hhmmss_to_secs("00:00:00"), Some(0));
        assert_eq!(hhmmss_to_secs("00:01:30"), Some(90));
        assert_eq!(hhmmss_to_secs("02:10:05"), Some(7805));
    }

    #[test]
    fn rejects_malformed_durations() {
        assert_eq!(hhmmss_to_secs("12:34"), None);
        assert_eq!(hhmmss_to_secs("aa:bb:cc"), None);
        assert_eq!(hhmmss_to_secs("00:61:00"), None);
        assert_eq!(hhmmss_to_secs(""), None);
    }

    #[test]
    fn estimate_includes_startup_and_sync_padding() {
        let sample = ProgressSample {
            elapsed_secs: 60,
            remaining_secs: 240,
            reported_percent: 20.0,
        };
        let estimate = corrected_estimate(12.0, &sample);
        assert_eq!(estimate, 12.0 + 60.0 + 240.0 + 140.0);
    }

    #[test]
    fn percent_is_clamped() {
        assert_eq!(percent_from_estimate(0.0, 100.0), 0.0);
        assert_eq!(percent_from_estimate(50.0, 100.0), 50.0);
        assert_eq!(percent_from_estimate(500.0, 100.0), 100.0);
        assert_eq!(percent_from_estimate(10.0, 0.0), 0.0);
    }
}
