//! Worker progress parsing
//!
//! The partclone-driving workers print everything to stdout. Before the
//! bulk copy starts they emit banner lines (superblock/metadata phase);
//! counting progress from those lines would wreck the estimate, so the
//! parser waits for a marker sequence before it believes anything.

use crate::task::estimate::{corrected_estimate, hhmmss_to_secs, percent_from_estimate};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::trace;

/// Progress reported right after the marker sequence completes.
const START_PERCENT: f64 = 5.0;

/// Progress line shape, as printed by the worker's partclone driver.
static PROGRESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^partclone\.stderr:Elapsed: (\d\d:\d\d:\d\d), Remaining: (\d\d:\d\d:\d\d), Completed:\s*(\d+\.?\d*)%,\s*[^/]+/min,",
    )
    .expect("progress pattern is valid")
});

/// One parsed worker progress line.
#[derive(Debug, Clone, Copy, PartialEq)]
#[allow(dead_code)]
pub struct ProgressSample {
    /// Copy time elapsed so far, per the worker
    pub elapsed_secs: u64,
    /// Copy time remaining, per the worker
    pub remaining_secs: u64,
    /// The worker's self-reported percentage. Untrusted; kept for logging.
    pub reported_percent: f64,
}

/// Progress state extracted from one output line.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub percent: f64,
    pub message: String,
    /// New total-time estimate, when the line carried one.
    pub time_estimate_secs: Option<f64>,
}

/// Incremental parser for a worker's line-oriented output.
///
/// Implementations are pure state machines so they can be unit-tested
/// without spawning anything; `wall_elapsed_secs` is the driver-observed
/// time since the task started.
pub trait ProgressParser: Send {
    fn feed_line(&mut self, line: &str, wall_elapsed_secs: f64) -> Option<ProgressUpdate>;
}

#[derive(Debug, Clone, Copy)]
enum ParserState {
    AwaitingMarker,
    Imaging { imaging_start_secs: f64 },
}

/// Two-state parser for partclone-driver output.
///
/// Waits for the ordered start-marker sequence (by default the filesystem
/// banner), then converts each progress line into a corrected completion
/// estimate and a wall-clock-derived percentage.
pub struct PartcloneProgressParser {
    /// Markers not yet matched, in the order they must appear.
    markers: Vec<Regex>,
    state: ParserState,
}

impl PartcloneProgressParser {
    pub fn new() -> Self {
        // If we don't skip the superblock part, the progress is totally
        // messed up.
        let banner = Regex::new(r"File system:\s+EXTFS").expect("marker pattern is valid");
        Self::with_markers(vec![banner])
    }

    /// Use a custom marker sequence. Markers must match in order; the
    /// machine starts believing progress lines after the last one.
    pub fn with_markers(markers: Vec<Regex>) -> Self {
        Self {
            markers,
            state: ParserState::AwaitingMarker,
        }
    }

    fn feed_marker_line(&mut self, line: &str, wall_elapsed_secs: f64) -> Option<ProgressUpdate> {
        // Successive markers may match on the same line.
        while let Some(next) = self.markers.first() {
            if !next.is_match(line) {
                break;
            }
            self.markers.remove(0);
            if self.markers.is_empty() {
                self.state = ParserState::Imaging {
                    imaging_start_secs: wall_elapsed_secs,
                };
                return Some(ProgressUpdate {
                    percent: START_PERCENT,
                    message: "Start imaging".to_string(),
                    time_estimate_secs: None,
                });
            }
        }
        None
    }

    fn feed_progress_line(
        &mut self,
        line: &str,
        wall_elapsed_secs: f64,
        imaging_start_secs: f64,
    ) -> Option<ProgressUpdate> {
        let caps = match PROGRESS_RE.captures(line) {
            Some(caps) => caps,
            None => {
                trace!("ignoring worker output: {}", line);
                return None;
            }
        };

        let elapsed_text = caps.get(1)?.as_str();
        let remaining_text = caps.get(2)?.as_str();
        let sample = ProgressSample {
            elapsed_secs: hhmmss_to_secs(elapsed_text)?,
            remaining_secs: hhmmss_to_secs(remaining_text)?,
            reported_percent: caps.get(3)?.as_str().parse().ok()?,
        };

        let estimate = corrected_estimate(imaging_start_secs, &sample);
        Some(ProgressUpdate {
            percent: percent_from_estimate(wall_elapsed_secs, estimate),
            message: format!("elapsed: {} remaining: {}", elapsed_text, remaining_text),
            time_estimate_secs: Some(estimate),
        })
    }
}

impl Default for PartcloneProgressParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressParser for PartcloneProgressParser {
    fn feed_line(&mut self, line: &str, wall_elapsed_secs: f64) -> Option<ProgressUpdate> {
        match self.state {
            ParserState::AwaitingMarker => self.feed_marker_line(line, wall_elapsed_secs),
            ParserState::Imaging { imaging_start_secs } => {
                self.feed_progress_line(line, wall_elapsed_secs, imaging_start_secs)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress_line(elapsed: &str, remaining: &str, completed: &str) -> String {
        format!(
            "partclone.stderr:Elapsed: {}, Remaining: {}, Completed: {}%, 6.5GB/min,",
            elapsed, remaining, completed
        )
    }

    #[test]
    fn progress_before_marker_is_ignored() {
        let mut parser = PartcloneProgressParser::new();
        let update = parser.feed_line(&progress_line("00:01:00", "00:04:00", "20.0"), 70.0);
        assert!(update.is_none());
    }

    #[test]
    fn marker_starts_imaging_at_five_percent() {
        let mut parser = PartcloneProgressParser::new();
        assert!(parser.feed_line("Partclone v0.3.13", 1.0).is_none());

        let update = parser.feed_line("File system:  EXTFS", 12.0).unwrap();
        assert_eq!(update.percent, 5.0);
        assert_eq!(update.message, "Start imaging");
        assert!(update.time_estimate_secs.is_none());
    }

    #[test]
    fn markers_must_match_in_order() {
        let markers = vec![
            Regex::new("first").unwrap(),
            Regex::new("second").unwrap(),
        ];
        let mut parser = PartcloneProgressParser::with_markers(markers);

        // Out of order: the second marker alone matches nothing.
        assert!(parser.feed_line("second", 1.0).is_none());
        assert!(parser.feed_line("first", 2.0).is_none());
        let update = parser.feed_line("second", 3.0).unwrap();
        assert_eq!(update.message, "Start imaging");
    }

    #[test]
    fn estimate_uses_imaging_start_and_sync_padding() {
        let mut parser = PartcloneProgressParser::new();
        parser.feed_line("File system:  EXTFS", 10.0).unwrap();

        let update = parser
            .feed_line(&progress_line("00:01:00", "00:04:00", "20.0"), 70.0)
            .unwrap();
        // 10 (startup) + 60 + 240 + 140 (sync)
        assert_eq!(update.time_estimate_secs, Some(450.0));
        // 100 * 70 / 450
        let percent = update.percent;
        assert!((percent - 15.555).abs() < 0.01, "percent was {}", percent);
    }

    #[test]
    fn derived_percent_ignores_reported_completion() {
        let mut parser = PartcloneProgressParser::new();
        parser.feed_line("File system:  EXTFS", 0.0).unwrap();

        // The worker claims 99.9% almost immediately; wall clock says no.
        let update = parser
            .feed_line(&progress_line("00:00:10", "00:09:50", "99.9"), 10.0)
            .unwrap();
        assert!(update.percent < 2.0);
    }

    #[test]
    fn decreasing_remaining_yields_monotonic_bounded_percent() {
        let mut parser = PartcloneProgressParser::new();
        parser.feed_line("File system:  EXTFS", 5.0).unwrap();

        let mut last = 0.0;
        let lines = [
            ("00:01:00", "00:08:00", 65.0),
            ("00:02:00", "00:07:00", 125.0),
            ("00:04:00", "00:05:00", 245.0),
            ("00:08:00", "00:01:00", 485.0),
            ("00:09:00", "00:00:00", 545.0),
        ];
        for (elapsed, remaining, wall) in lines {
            let update = parser
                .feed_line(&progress_line(elapsed, remaining, "50.0"), wall)
                .unwrap();
            assert!(update.percent >= last);
            assert!((0.0..=100.0).contains(&update.percent));
            last = update.percent;
        }
    }

    #[test]
    fn malformed_lines_are_nonfatal() {
        let mut parser = PartcloneProgressParser::new();
        parser.feed_line("File system:  EXTFS", 0.0).unwrap();

        assert!(parser.feed_line("", 1.0).is_none());
        assert!(parser.feed_line("Total block count: 819200", 1.0).is_none());
        assert!(parser
            .feed_line("partclone.stderr:Elapsed: garbage", 1.0)
            .is_none());

        // Still imaging: a good line afterwards parses normally.
        let update = parser.feed_line(&progress_line("00:00:30", "00:02:00", "15.0"), 31.0);
        assert!(update.is_some());
    }
}
