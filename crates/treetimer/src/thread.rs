//! Per-thread handle for the start/stop hot path.

use parking_lot::MutexGuard;

use crate::callgraph::{Nesting, ThreadState};
use crate::context::Library;
use crate::error::{Result, TimerError};
use crate::overhead::{calibrate, Calibration, Overhead};
use crate::summary::RegionSummary;

/// Exclusive access to the calling thread's timers.
///
/// Obtained from [`Library::attach`]. Start and stop go straight to the
/// thread's state without locking; the state is released when the handle
/// is dropped.
#[derive(Debug)]
pub struct ThreadTimers<'lib> {
    lib: &'lib Library,
    index: usize,
    state: MutexGuard<'lib, ThreadState>,
}

impl<'lib> ThreadTimers<'lib> {
    pub(crate) fn new(
        lib: &'lib Library,
        index: usize,
        state: MutexGuard<'lib, ThreadState>,
    ) -> Self {
        Self { lib, index, state }
    }

    /// Slot index of this thread.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub const fn library(&self) -> &'lib Library {
        self.lib
    }

    /// Start timing the region `name`.
    #[inline]
    pub fn start(&mut self, name: &str) -> Result<()> {
        if self.lib.is_disabled() {
            return Ok(());
        }
        let env = self.lib.env(self.index);
        self.state
            .start(name, &env)
            .map_err(|e| self.lib.reporter().error(e))
    }

    /// Stop timing the region `name`.
    #[inline]
    pub fn stop(&mut self, name: &str) -> Result<()> {
        if self.lib.is_disabled() {
            return Ok(());
        }
        let env = self.lib.env(self.index);
        let outcome = self.state.stop(name, &env);
        self.finish(outcome)
    }

    /// Start timing the region at code address `addr`.
    pub fn start_address(&mut self, addr: usize) -> Result<()> {
        if self.lib.is_disabled() {
            return Ok(());
        }
        let env = self.lib.env(self.index);
        self.state
            .start_address(addr, self.lib.resolver(), &env)
            .map_err(|e| self.lib.reporter().error(e))
    }

    /// Stop timing the region at code address `addr`.
    pub fn stop_address(&mut self, addr: usize) -> Result<()> {
        if self.lib.is_disabled() {
            return Ok(());
        }
        let env = self.lib.env(self.index);
        let outcome = self.state.stop_address(addr, &env);
        self.finish(outcome)
    }

    fn finish(&self, outcome: Result<Nesting>) -> Result<()> {
        match outcome {
            Ok(Nesting::Perfect) => Ok(()),
            Ok(Nesting::Imperfect) => {
                self.lib.note_imperfect_nesting();
                Ok(())
            }
            Err(e) => {
                if matches!(e, TimerError::NotStarted { .. }) {
                    self.lib.note_imperfect_nesting();
                }
                Err(self.lib.reporter().error(e))
            }
        }
    }

    /// Read-only view of this thread's timers and call graph.
    #[must_use]
    pub fn state(&self) -> &ThreadState {
        &self.state
    }

    /// Detached copies of this thread's regions, in creation order.
    #[must_use]
    pub fn summaries(&self) -> Vec<RegionSummary> {
        self.state.regions().map(RegionSummary::of).collect()
    }

    /// Zero the timer `name` on this thread.
    pub fn reset_timer(&mut self, name: &str) -> Result<()> {
        if self.state.reset_timer(name) {
            Ok(())
        } else {
            Err(self.lib.reporter().error(TimerError::UnknownTimer {
                op: "reset_timer",
                name: name.to_owned(),
            }))
        }
    }

    /// Zero every timer on this thread.
    pub fn reset(&mut self) {
        self.state.reset();
    }

    /// Measure what one start/stop pair costs on this thread.
    ///
    /// Leaves every timer, the call stack and the error counters as they were.
    pub fn overhead(&self) -> Overhead {
        let report = self.lib.reporter();
        let saved = report.counters();
        let lib = self.lib;
        let thread_lookup = || lib.thread_index();
        let overhead = calibrate(&Calibration {
            clock: lib.clock(),
            registry: self.state.registry(),
            counters: lib.counters(),
            thread: self.index,
            thread_lookup: &thread_lookup,
            imperfect_nesting: lib.imperfect_nesting(),
            max_stack_depth: lib.options().max_stack_depth,
        });
        report.restore(saved);
        if lib.options().verbose {
            tracing::info!(thread = self.index, "instrumentation overhead\n{overhead}");
        } else {
            tracing::debug!(
                thread = self.index,
                self_overhead = overhead.self_overhead(),
                parent_overhead = overhead.parent_overhead(),
                "instrumentation overhead"
            );
        }
        overhead
    }
}

#[cfg(test)]
mod tests {
    use crate::clock::ClockSource;
    use crate::context::Library;
    use crate::error::TimerError;
    use crate::options::Setting;

    fn library() -> Library {
        let mut lib = Library::new();
        lib.set_clock_source(ClockSource::ClockGettime).unwrap();
        lib.initialize().unwrap();
        lib
    }

    #[test]
    fn start_then_stop_counts_once() {
        let lib = library();
        let mut t = lib.attach().unwrap();
        t.start("work").unwrap();
        t.stop("work").unwrap();
        let work = t.state().find("work").unwrap();
        assert_eq!(work.count(), 1);
        assert!(work.wall().accum >= 0.0);
        assert_eq!(lib.num_errors(), 0);
    }

    #[test]
    fn stop_errors_are_reported() {
        let lib = library();
        let mut t = lib.attach().unwrap();
        assert!(matches!(
            t.stop("never"),
            Err(TimerError::NotStarted { .. })
        ));
        assert_eq!(lib.num_errors(), 1);
        assert!(lib.imperfect_nesting());
    }

    #[test]
    fn imperfect_nesting_is_flagged_and_skips_stack_overhead() {
        let lib = library();
        let mut t = lib.attach().unwrap();
        t.start("outer").unwrap();
        t.start("inner").unwrap();
        t.stop("outer").unwrap();
        t.stop("inner").unwrap();
        assert!(lib.imperfect_nesting());
        assert_eq!(lib.num_errors(), 0);
        assert_eq!(t.overhead().stack, 0.0);
    }

    #[test]
    fn overflow_is_reported_as_resource_error() {
        let mut lib = Library::new();
        lib.set_option(Setting::MaxStackDepth(2)).unwrap();
        lib.initialize().unwrap();
        let mut t = lib.attach().unwrap();
        t.start("a").unwrap();
        let err = t.start("b").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Resource);
        assert_eq!(lib.num_errors(), 1);
        t.stop("b").unwrap();
        t.stop("a").unwrap();
        assert_eq!(t.state().find("a").unwrap().count(), 1);
    }

    #[test]
    fn skipped_stop_after_overflow_keeps_outer_region_intact() {
        let mut lib = Library::new();
        lib.set_option(Setting::MaxStackDepth(2)).unwrap();
        lib.initialize().unwrap();
        let mut t = lib.attach().unwrap();
        t.start("a").unwrap();
        assert!(t.start("b").is_err());
        t.stop("a").unwrap();
        assert_eq!(t.state().find("a").unwrap().count(), 1);
        assert_eq!(t.state().depth(), 0);
        assert_eq!(lib.num_errors(), 1);
        assert!(!lib.imperfect_nesting());
    }

    #[test]
    fn negative_interval_counts_one_error() {
        let lib = library();
        let mut t = lib.attach().unwrap();
        t.start("a").unwrap();
        t.state.shift_top_start(1000.0);
        let errors = lib.num_errors();
        let err = t.stop("a").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Consistency);
        assert_eq!(lib.num_errors(), errors + 1);
        let a = t.state().find("a").unwrap();
        assert_eq!(a.count(), 1);
        assert!(!a.wall().is_valid());
    }

    #[test]
    fn starting_root_name_is_usage_error() {
        let lib = library();
        let mut t = lib.attach().unwrap();
        let err = t.start(crate::ROOT_NAME).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Usage);
        assert_eq!(lib.num_errors(), 1);
        assert_eq!(t.state().depth(), 0);
    }

    #[test]
    fn overhead_leaves_state_untouched() {
        let lib = library();
        let mut t = lib.attach().unwrap();
        t.start("open").unwrap();
        let _ = t.stop("never");
        let errors = lib.num_errors();
        let before: Vec<_> = t.summaries();
        let depth = t.state().depth();

        let o = t.overhead();
        assert!(o.parent_overhead() >= o.self_overhead());
        assert_eq!(t.summaries(), before);
        assert_eq!(t.state().depth(), depth);
        assert_eq!(lib.num_errors(), errors);
        t.stop("open").unwrap();
    }

    #[test]
    fn reset_timer_on_unknown_name_is_usage_error() {
        let lib = library();
        let mut t = lib.attach().unwrap();
        assert!(matches!(
            t.reset_timer("ghost"),
            Err(TimerError::UnknownTimer { .. })
        ));
        t.start("real").unwrap();
        t.stop("real").unwrap();
        t.reset_timer("real").unwrap();
        assert_eq!(t.state().find("real").unwrap().count(), 0);
    }

    #[test]
    fn address_regions_fall_back_to_placeholder() {
        let lib = library();
        let mut t = lib.attach().unwrap();
        t.start_address(0xbeef).unwrap();
        t.stop_address(0xbeef).unwrap();
        assert_eq!(t.state().find("0xbeef").unwrap().count(), 1);
        assert!(t.stop_address(0xdead).is_err());
    }
}
