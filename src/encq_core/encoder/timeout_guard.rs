//! Two-stage liveness tracking for an encoder run: "no stderr output at all"
//! and "no forward progress" are independent timeouts.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::sync_ext::MutexExt;

struct GuardState {
    last_line_at: Instant,
    last_progress_at: Instant,
    /// The progress stage only arms after the first progress mark, so a
    /// child that never reports percentages is governed by the output stage
    /// alone.
    progress_enabled: bool,
}

pub(crate) struct TimeoutGuard {
    state: Mutex<GuardState>,
    output_timeout: Duration,
    progress_timeout: Duration,
}

impl TimeoutGuard {
    /// Zero for either duration disables that stage.
    pub(crate) fn new(output_timeout: Duration, progress_timeout: Duration) -> Self {
        let now = Instant::now();
        TimeoutGuard {
            state: Mutex::new(GuardState {
                last_line_at: now,
                last_progress_at: now,
                progress_enabled: false,
            }),
            output_timeout,
            progress_timeout,
        }
    }

    pub(crate) fn mark_line(&self) {
        let mut state = self.state.lock_unpoisoned();
        state.last_line_at = Instant::now();
    }

    pub(crate) fn mark_progress(&self) {
        let mut state = self.state.lock_unpoisoned();
        let now = Instant::now();
        state.last_line_at = now;
        state.last_progress_at = now;
        state.progress_enabled = true;
    }

    pub(crate) fn is_output_timeout(&self) -> bool {
        if self.output_timeout.is_zero() {
            return false;
        }
        let state = self.state.lock_unpoisoned();
        state.last_line_at.elapsed() > self.output_timeout
    }

    pub(crate) fn is_progress_timeout(&self) -> bool {
        if self.progress_timeout.is_zero() {
            return false;
        }
        let state = self.state.lock_unpoisoned();
        state.progress_enabled && state.last_progress_at.elapsed() > self.progress_timeout
    }

    /// Human-readable reason for the stage that fired, used in job errors.
    pub(crate) fn timeout_reason(&self) -> Option<&'static str> {
        if self.is_output_timeout() {
            Some("no output")
        } else if self.is_progress_timeout() {
            Some("no progress")
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_timeout_fires_only_after_silence() {
        let guard = TimeoutGuard::new(Duration::from_millis(50), Duration::ZERO);
        assert!(!guard.is_output_timeout());
        std::thread::sleep(Duration::from_millis(80));
        assert!(guard.is_output_timeout());

        guard.mark_line();
        assert!(!guard.is_output_timeout());
    }

    #[test]
    fn zero_output_timeout_disables_the_stage() {
        let guard = TimeoutGuard::new(Duration::ZERO, Duration::ZERO);
        std::thread::sleep(Duration::from_millis(30));
        assert!(!guard.is_output_timeout());
        assert!(!guard.is_progress_timeout());
    }

    #[test]
    fn progress_timeout_stays_quiet_until_first_progress_mark() {
        let guard = TimeoutGuard::new(Duration::ZERO, Duration::from_millis(30));
        std::thread::sleep(Duration::from_millis(60));
        assert!(
            !guard.is_progress_timeout(),
            "stage must not arm before the first mark_progress"
        );

        guard.mark_progress();
        assert!(!guard.is_progress_timeout());
        std::thread::sleep(Duration::from_millis(60));
        assert!(guard.is_progress_timeout());
    }

    #[test]
    fn mark_progress_also_feeds_the_output_stage() {
        let guard = TimeoutGuard::new(Duration::from_millis(50), Duration::ZERO);
        std::thread::sleep(Duration::from_millis(40));
        guard.mark_progress();
        std::thread::sleep(Duration::from_millis(30));
        assert!(!guard.is_output_timeout());
    }

    #[test]
    fn stages_are_independent() {
        let guard = TimeoutGuard::new(Duration::from_millis(200), Duration::from_millis(30));
        guard.mark_progress();
        std::thread::sleep(Duration::from_millis(60));
        // Lines keep flowing but progress has stalled.
        guard.mark_line();
        assert!(!guard.is_output_timeout());
        assert!(guard.is_progress_timeout());
        assert_eq!(guard.timeout_reason(), Some("no progress"));
    }
}
