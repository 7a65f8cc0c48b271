//! The library context: configuration, lifecycle and cross-thread queries.
//!
//! One [`Library`] value owns everything the timers need. It is configured
//! while uninitialized, initialized once, then shared by reference between
//! threads. Each thread calls [`Library::attach`] to get a
//! [`ThreadTimers`] handle for its own timers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::ThreadId;

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::callgraph::{Env, ThreadState};
use crate::clock::{Clock, ClockSource};
use crate::cpu;
use crate::error::{Result, TimerError};
use crate::hooks::{AuxCounters, RegionReducer, SymbolResolver};
use crate::options::{Options, Setting};
use crate::report::Reporter;
use crate::stats::{AuxSlot, RegionStats};
use crate::summary::{merge_all, RegionSummary, ThreadWork};
use crate::thread::ThreadTimers;

/// Snapshot of one timer, as returned by [`Library::query`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimerQuery {
    /// At least one activation is open.
    pub onflg: bool,
    pub count: u64,
    /// Accumulated wall-clock seconds.
    pub wallclock: f64,
    /// Accumulated user CPU seconds.
    pub usr: f64,
    /// Accumulated system CPU seconds.
    pub sys: f64,
    pub aux: AuxSlot,
}

/// Current wall-clock, user and system time in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stamp {
    pub wall: f64,
    pub usr: f64,
    pub sys: f64,
}

/// Timing library state.
pub struct Library {
    options: Options,
    clock: Clock,
    initialized: bool,
    disabled: AtomicBool,
    imperfect_nesting: AtomicBool,
    report: Reporter,
    counters: Option<Box<dyn AuxCounters>>,
    resolver: Option<Box<dyn SymbolResolver>>,
    ticks_per_sec: i64,
    /// Thread ids in attach order; the position is the slot index.
    threads: Mutex<Vec<ThreadId>>,
    slots: Box<[Mutex<ThreadState>]>,
}

impl Default for Library {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("options", &self.options)
            .field("clock", &self.clock.source())
            .field("initialized", &self.initialized)
            .field("disabled", &self.disabled)
            .field("num_errors", &self.report.num_errors())
            .field("attached", &self.threads.lock().len())
            .finish_non_exhaustive()
    }
}

impl Library {
    /// Uninitialized library with default options.
    #[must_use]
    pub fn new() -> Self {
        Self {
            options: Options::default(),
            clock: Clock::default(),
            initialized: false,
            disabled: AtomicBool::new(false),
            imperfect_nesting: AtomicBool::new(false),
            report: Reporter::new(),
            counters: None,
            resolver: None,
            ticks_per_sec: 0,
            threads: Mutex::new(Vec::new()),
            slots: Box::new([]),
        }
    }

    /// Uninitialized library with the given options.
    pub fn with_options(options: Options) -> Result<Self> {
        let mut lib = Self::new();
        lib.set_options(options)?;
        Ok(lib)
    }

    fn unlocked(&self, op: &'static str) -> Result<()> {
        if self.initialized {
            return Err(self.report.error(TimerError::ConfigLocked { op }));
        }
        Ok(())
    }

    /// Change one setting. Only allowed before [`initialize`](Self::initialize).
    pub fn set_option(&mut self, setting: Setting) -> Result<()> {
        self.unlocked("set_option")?;
        self.options
            .apply(setting)
            .map_err(|e| self.report.error(e))?;
        self.report.set_abort_on_error(self.options.abort_on_error);
        Ok(())
    }

    /// Replace every setting at once.
    pub fn set_options(&mut self, options: Options) -> Result<()> {
        self.unlocked("set_options")?;
        options.validate().map_err(|e| self.report.error(e))?;
        self.report.set_abort_on_error(options.abort_on_error);
        self.options = options;
        Ok(())
    }

    /// Select the underlying clock.
    ///
    /// The source is probed right away and a failure is reported, but the
    /// choice is kept: [`initialize`](Self::initialize) falls back to the
    /// default source if it still does not work.
    pub fn set_clock_source(&mut self, source: ClockSource) -> Result<()> {
        self.unlocked("set_clock_source")?;
        self.options.clock = source;
        Clock::init(source)
            .map(drop)
            .map_err(|e| self.report.error(e))
    }

    /// Install a hardware-counter collaborator counting `events`.
    ///
    /// A collaborator that rejects the events is dropped with a warning and
    /// the library runs without counters.
    pub fn set_aux_counters(
        &mut self,
        mut counters: Box<dyn AuxCounters>,
        events: &[&str],
    ) -> Result<()> {
        self.unlocked("set_aux_counters")?;
        match counters.configure(events) {
            Ok(()) => self.counters = Some(counters),
            Err(e) => {
                self.report
                    .warn(&format!("hardware counters disabled: {e}"));
                self.counters = None;
            }
        }
        Ok(())
    }

    /// Install a resolver naming address-keyed regions.
    pub fn set_symbol_resolver(&mut self, resolver: Box<dyn SymbolResolver>) -> Result<()> {
        self.unlocked("set_symbol_resolver")?;
        self.resolver = Some(resolver);
        Ok(())
    }

    /// Freeze the configuration and allocate per-thread state.
    pub fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Err(self.report.error(TimerError::AlreadyInitialized));
        }
        self.options.validate().map_err(|e| self.report.error(e))?;

        let requested = self.options.clock;
        self.clock = match Clock::init(requested) {
            Ok(clock) => clock,
            Err(e) => {
                self.report.warn(&format!(
                    "{e}; falling back to {}",
                    ClockSource::GetTimeOfDay.name()
                ));
                self.options.clock = ClockSource::GetTimeOfDay;
                Clock::init(ClockSource::GetTimeOfDay).map_err(|e| self.report.error(e))?
            }
        };
        let t1 = self.clock.now();
        let t2 = self.clock.now();
        if t2 < t1 {
            self.report.warn(&format!(
                "clock {} went backwards during init ({t1} then {t2})",
                self.clock.source().name()
            ));
        }

        if self.options.cpu {
            self.ticks_per_sec = cpu::ticks_per_sec()
                .ok_or_else(|| self.report.error(TimerError::CpuStatsUnavailable))?;
        }

        let (table_size, depth) = (self.options.table_size, self.options.max_stack_depth);
        self.slots = (0..self.options.max_threads)
            .map(|_| Mutex::new(ThreadState::new(table_size, depth)))
            .collect();
        self.initialized = true;

        if self.options.verbose {
            tracing::info!(
                clock = self.clock.source().name(),
                table_size,
                max_stack_depth = depth,
                max_threads = self.options.max_threads,
                wall = self.options.wall,
                cpu = self.options.cpu,
                counters = self.counters.is_some(),
                "timing library initialized"
            );
        } else {
            tracing::debug!(clock = self.clock.source().name(), "timing library initialized");
        }
        Ok(())
    }

    /// Release all timers and return to the freshly constructed state.
    pub fn finalize(&mut self) -> Result<()> {
        if !self.initialized {
            return Err(self
                .report
                .error(TimerError::NotInitialized { op: "finalize" }));
        }
        *self = Self::new();
        tracing::debug!("timing library finalized");
        Ok(())
    }

    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.initialized
    }

    #[must_use]
    pub const fn options(&self) -> &Options {
        &self.options
    }

    /// Clock in use; the placebo clock before initialization.
    #[must_use]
    pub const fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Resume timing after [`disable`](Self::disable).
    pub fn enable(&self) {
        self.disabled.store(false, Ordering::Relaxed);
    }

    /// Turn every start and stop into a no-op until re-enabled.
    pub fn disable(&self) {
        self.disabled.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Relaxed)
    }

    /// Some thread stopped a timer that was not on top of its stack.
    #[must_use]
    pub fn imperfect_nesting(&self) -> bool {
        self.imperfect_nesting.load(Ordering::Relaxed)
    }

    pub(crate) fn note_imperfect_nesting(&self) {
        self.imperfect_nesting.store(true, Ordering::Relaxed);
    }

    pub(crate) const fn reporter(&self) -> &Reporter {
        &self.report
    }

    pub(crate) fn resolver(&self) -> Option<&dyn SymbolResolver> {
        self.resolver.as_deref()
    }

    pub(crate) fn counters(&self) -> Option<&dyn AuxCounters> {
        self.counters.as_deref()
    }

    pub(crate) fn env(&self, thread: usize) -> Env<'_> {
        Env {
            clock: &self.clock,
            wall: self.options.wall,
            cpu: self.options.cpu,
            counters: self.counters.as_deref(),
            thread,
        }
    }

    /// Errors reported since init or the last [`reset_errors`](Self::reset_errors).
    #[must_use]
    pub fn num_errors(&self) -> u64 {
        self.report.num_errors()
    }

    #[must_use]
    pub fn num_warn(&self) -> u64 {
        self.report.num_warn()
    }

    pub fn reset_errors(&self) {
        self.report.reset_errors();
    }

    /// Slot index of the calling thread, if it has attached.
    #[must_use]
    pub fn thread_index(&self) -> Option<usize> {
        let me = std::thread::current().id();
        self.threads.lock().iter().position(|&id| id == me)
    }

    /// Number of threads that have attached so far.
    #[must_use]
    pub fn nthreads(&self) -> usize {
        self.threads.lock().len()
    }

    /// Claim the calling thread's timers.
    ///
    /// The handle holds the thread's state exclusively until dropped.
    /// Attaching again while a handle is alive fails with
    /// [`TimerError::ThreadBusy`].
    pub fn attach(&self) -> Result<ThreadTimers<'_>> {
        if !self.initialized {
            return Err(self.report.error(TimerError::NotInitialized { op: "attach" }));
        }
        let me = std::thread::current().id();
        let (index, first) = {
            let mut threads = self.threads.lock();
            match threads.iter().position(|&id| id == me) {
                Some(index) => (index, false),
                None if threads.len() < self.slots.len() => {
                    threads.push(me);
                    (threads.len() - 1, true)
                }
                None => {
                    return Err(self.report.error(TimerError::TooManyThreads {
                        max: self.slots.len(),
                    }))
                }
            }
        };
        let state = self.slots[index]
            .try_lock()
            .ok_or_else(|| self.report.error(TimerError::ThreadBusy(index)))?;
        if first {
            if let Some(counters) = self.counters() {
                counters
                    .thread_init(index)
                    .map_err(|e| self.report.error(TimerError::Counters(e.0)))?;
            }
            tracing::debug!(thread = index, "thread attached");
        }
        Ok(ThreadTimers::new(self, index, state))
    }

    fn check_init(&self, op: &'static str) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(self.report.error(TimerError::NotInitialized { op }))
        }
    }

    fn check_wall(&self, op: &'static str) -> Result<()> {
        if self.options.wall {
            Ok(())
        } else {
            Err(self.report.error(TimerError::WallStatsDisabled { op }))
        }
    }

    /// Lock one thread's state for reading.
    fn slot(&self, op: &'static str, thread: usize) -> Result<MutexGuard<'_, ThreadState>> {
        self.check_init(op)?;
        let slot = self.slots.get(thread).ok_or_else(|| {
            self.report.error(TimerError::ThreadOutOfRange {
                thread,
                max: self.slots.len(),
            })
        })?;
        slot.try_lock()
            .ok_or_else(|| self.report.error(TimerError::ThreadBusy(thread)))
    }

    /// Lock every attached thread, failing without side effects if any is busy.
    fn attached_slots(&self, op: &'static str) -> Result<Vec<MutexGuard<'_, ThreadState>>> {
        self.check_init(op)?;
        let n = self.nthreads();
        self.slots[..n]
            .iter()
            .enumerate()
            .map(|(t, slot)| {
                slot.try_lock()
                    .ok_or_else(|| self.report.error(TimerError::ThreadBusy(t)))
            })
            .collect()
    }

    fn unknown(&self, op: &'static str, name: &str) -> TimerError {
        self.report.error(TimerError::UnknownTimer {
            op,
            name: name.to_owned(),
        })
    }

    /// Everything known about timer `name` on `thread`.
    pub fn query(&self, name: &str, thread: usize) -> Result<TimerQuery> {
        let state = self.slot("query", thread)?;
        let timer = state.find(name).ok_or_else(|| self.unknown("query", name))?;
        let (usr, sys) = timer.cpu().seconds(self.ticks_per_sec);
        Ok(TimerQuery {
            onflg: timer.onflg(),
            count: timer.count(),
            wallclock: timer.wall().accum,
            usr,
            sys,
            aux: *timer.aux(),
        })
    }

    /// Accumulated wall-clock seconds of `name` on `thread`.
    pub fn wallclock(&self, name: &str, thread: usize) -> Result<f64> {
        const OP: &str = "wallclock";
        let state = self.slot(OP, thread)?;
        self.check_wall(OP)?;
        let timer = state.find(name).ok_or_else(|| self.unknown(OP, name))?;
        Ok(timer.wall().accum)
    }

    /// Most recent interval of `name` on `thread`.
    pub fn wallclock_latest(&self, name: &str, thread: usize) -> Result<f64> {
        const OP: &str = "wallclock_latest";
        let state = self.slot(OP, thread)?;
        self.check_wall(OP)?;
        let timer = state.find(name).ok_or_else(|| self.unknown(OP, name))?;
        Ok(timer.wall().latest)
    }

    /// Completed start/stop pairs of `name` on `thread`.
    pub fn count(&self, name: &str, thread: usize) -> Result<u64> {
        let state = self.slot("count", thread)?;
        let timer = state.find(name).ok_or_else(|| self.unknown("count", name))?;
        Ok(timer.count())
    }

    /// Regions created on `thread`, root excluded.
    pub fn nregions(&self, thread: usize) -> Result<usize> {
        Ok(self.slot("nregions", thread)?.regions().count())
    }

    /// Name of the `region`-th region created on `thread`.
    pub fn region_name(&self, thread: usize, region: usize) -> Result<String> {
        let state = self.slot("region_name", thread)?;
        let name = state.regions().nth(region).map(|t| t.name().to_owned());
        name.ok_or_else(|| {
            self.report.error(TimerError::InvalidOption(format!(
                "region_name: region {region} is out of range (nregions {})",
                state.regions().count()
            )))
        })
    }

    /// Largest per-thread total of `name` and its imbalance across threads.
    pub fn threadwork(&self, name: &str) -> Result<ThreadWork> {
        const OP: &str = "threadwork";
        let states = self.attached_slots(OP)?;
        self.check_wall(OP)?;
        let totals: Vec<f64> = states
            .iter()
            .filter_map(|s| s.find(name).map(|t| t.wall().accum))
            .collect();
        ThreadWork::from_totals(&totals, states.len()).ok_or_else(|| self.unknown(OP, name))
    }

    /// Statistics of `name` merged over every attached thread.
    pub fn merged(&self, name: &str) -> Result<RegionStats> {
        let states = self.attached_slots("merged")?;
        let mut found = false;
        let mut merged = RegionStats::default();
        for timer in states.iter().filter_map(|s| s.find(name)) {
            merged.merge(timer.stats());
            found = true;
        }
        if found {
            Ok(merged)
        } else {
            Err(self.unknown("merged", name))
        }
    }

    /// Detached copies of every region on `thread`, in creation order.
    pub fn summaries(&self, thread: usize) -> Result<Vec<RegionSummary>> {
        let state = self.slot("summaries", thread)?;
        Ok(state.regions().map(RegionSummary::of).collect())
    }

    /// Every region merged by name over all attached threads.
    pub fn merged_summaries(&self) -> Result<Vec<RegionSummary>> {
        let states = self.attached_slots("merged_summaries")?;
        Ok(merge_all(
            states
                .iter()
                .map(|s| s.regions().map(RegionSummary::of).collect::<Vec<_>>()),
        ))
    }

    /// Feed each attached thread's regions to `reducer`.
    pub fn reduce(&self, reducer: &mut dyn RegionReducer) -> Result<()> {
        let states = self.attached_slots("reduce")?;
        for (thread, state) in states.iter().enumerate() {
            reducer.reduce_thread(thread, &mut state.regions().map(RegionSummary::of));
        }
        Ok(())
    }

    /// Current wall-clock reading plus process CPU time.
    pub fn stamp(&self) -> Result<Stamp> {
        self.check_init("stamp")?;
        let wall = self.clock.now();
        let (usr, sys) = match (cpu::sample(), cpu::ticks_per_sec()) {
            (Some(sample), Some(tps)) if tps > 0 => {
                let tps = tps as f64;
                (sample.utime as f64 / tps, sample.stime as f64 / tps)
            }
            _ => {
                self.report.warn("stamp: cpu times unavailable");
                (0.0, 0.0)
            }
        };
        Ok(Stamp { wall, usr, sys })
    }

    /// Zero `name` on every attached thread.
    pub fn reset_timer(&self, name: &str) -> Result<()> {
        let mut states = self.attached_slots("reset_timer")?;
        let mut found = false;
        for state in &mut states {
            found |= state.reset_timer(name);
        }
        if found {
            Ok(())
        } else {
            Err(self.unknown("reset_timer", name))
        }
    }

    /// Zero every timer on every attached thread.
    pub fn reset(&self) -> Result<()> {
        let mut states = self.attached_slots("reset")?;
        for state in &mut states {
            state.reset();
        }
        if self.options.verbose {
            tracing::info!(threads = states.len(), "all timers reset");
        }
        Ok(())
    }
}
