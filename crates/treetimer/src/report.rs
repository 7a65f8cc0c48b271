//! Single reporting path for errors and warnings.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::error::TimerError;

/// Counts and logs every error and warning raised by the library.
///
/// Errors are handed back to the caller after being counted, unless
/// abort-on-error is set, in which case the process terminates.
#[derive(Debug, Default)]
pub struct Reporter {
    num_errors: AtomicU64,
    num_warn: AtomicU64,
    abort_on_error: AtomicBool,
}

impl Reporter {
    /// Create a reporter with zeroed counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            num_errors: AtomicU64::new(0),
            num_warn: AtomicU64::new(0),
            abort_on_error: AtomicBool::new(false),
        }
    }

    /// Count and log an error, returning it for propagation.
    #[cold]
    pub fn error(&self, err: TimerError) -> TimerError {
        self.num_errors.fetch_add(1, Ordering::Relaxed);
        tracing::error!(kind = ?err.kind(), "{err}");
        if self.abort_on_error.load(Ordering::Relaxed) {
            tracing::error!("abort_on_error is set: aborting");
            std::process::abort();
        }
        err
    }

    /// Count and log a warning. Never changes control flow.
    #[cold]
    pub fn warn(&self, msg: &str) {
        self.num_warn.fetch_add(1, Ordering::Relaxed);
        tracing::warn!("{msg}");
    }

    /// Number of errors reported since creation or the last reset.
    #[must_use]
    pub fn num_errors(&self) -> u64 {
        self.num_errors.load(Ordering::Relaxed)
    }

    /// Number of warnings reported since creation or the last reset.
    #[must_use]
    pub fn num_warn(&self) -> u64 {
        self.num_warn.load(Ordering::Relaxed)
    }

    /// Clear the error counter.
    pub fn reset_errors(&self) {
        self.num_errors.store(0, Ordering::Relaxed);
    }

    pub(crate) fn set_abort_on_error(&self, val: bool) {
        self.abort_on_error.store(val, Ordering::Relaxed);
    }

    /// Snapshot both counters.
    pub(crate) fn counters(&self) -> (u64, u64) {
        (self.num_errors(), self.num_warn())
    }

    /// Put both counters back to a previous snapshot.
    pub(crate) fn restore(&self, (errors, warnings): (u64, u64)) {
        self.num_errors.store(errors, Ordering::Relaxed);
        self.num_warn.store(warnings, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_counts_and_returns() {
        let reporter = Reporter::new();
        let err = reporter.error(TimerError::AlreadyInitialized);
        assert_eq!(err, TimerError::AlreadyInitialized);
        assert_eq!(reporter.num_errors(), 1);
        assert_eq!(reporter.num_warn(), 0);
    }

    #[test]
    fn warnings_use_separate_counter() {
        let reporter = Reporter::new();
        reporter.warn("clock fallback");
        reporter.warn("counters unavailable");
        assert_eq!(reporter.num_warn(), 2);
        assert_eq!(reporter.num_errors(), 0);
    }

    #[test]
    fn restore_rewinds_counters() {
        let reporter = Reporter::new();
        let saved = reporter.counters();
        let _ = reporter.error(TimerError::AlreadyInitialized);
        reporter.warn("x");
        reporter.restore(saved);
        assert_eq!(reporter.counters(), (0, 0));
    }
}
