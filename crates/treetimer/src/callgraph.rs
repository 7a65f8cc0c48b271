//! Per-thread call stack and call-graph construction.
//!
//! `start` pushes a frame for the named timer and links it beneath the timer
//! on top of the stack; `stop` finds the most recent frame of the named timer,
//! folds the elapsed interval into its statistics and removes the frame.
//! Every frame carries its own start stamps, so a timer may sit on the stack
//! several times (recursion) and each activation is timed on its own.

use hashbrown::HashMap;

use crate::clock::Clock;
use crate::cpu::{self, CpuSample};
use crate::error::{Result, TimerError};
use crate::hooks::{placeholder_name, AuxCounters, SymbolResolver};
use crate::registry::Registry;
use crate::stats::{bounded, AuxSlot};
use crate::timer::{Timer, TimerId, ROOT_NAME};

/// Everything start/stop needs from the library besides the thread state.
#[derive(Clone, Copy)]
pub struct Env<'a> {
    pub clock: &'a Clock,
    pub wall: bool,
    pub cpu: bool,
    pub counters: Option<&'a dyn AuxCounters>,
    pub thread: usize,
}

impl<'a> Env<'a> {
    /// Wall statistics only, no counters.
    #[must_use]
    pub const fn wall_only(clock: &'a Clock) -> Self {
        Self {
            clock,
            wall: true,
            cpu: false,
            counters: None,
            thread: 0,
        }
    }
}

/// How a stop related to the top of the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nesting {
    /// The stopped timer was on top of the stack.
    Perfect,
    /// The stopped timer was below the top of the stack.
    Imperfect,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    timer: TimerId,
    wall: f64,
    cpu: Option<CpuSample>,
    aux: AuxSlot,
}

impl Frame {
    const fn root() -> Self {
        Self {
            timer: TimerId::ROOT,
            wall: 0.0,
            cpu: None,
            aux: AuxSlot([0; crate::stats::MAX_AUX]),
        }
    }
}

/// Timers, call stack and address cache of one thread.
#[derive(Debug, Clone)]
pub struct ThreadState {
    registry: Registry,
    stack: Vec<Frame>,
    max_depth: usize,
    /// Names of starts rejected by a full stack, most recent last.
    rejected: Vec<String>,
    last: TimerId,
    addresses: HashMap<usize, TimerId>,
}

impl ThreadState {
    /// Fresh state holding only the root timer, which is on at depth 0.
    #[must_use]
    pub fn new(table_size: usize, max_depth: usize) -> Self {
        let mut registry = Registry::new(table_size);
        registry.get_mut(TimerId::ROOT).active = 1;
        let max_depth = max_depth.max(1);
        let mut stack = Vec::with_capacity(max_depth);
        stack.push(Frame::root());
        Self {
            registry,
            stack,
            max_depth,
            rejected: Vec::new(),
            last: TimerId::ROOT,
            addresses: HashMap::new(),
        }
    }

    /// Start the region called `name`.
    pub fn start(&mut self, name: &str, env: &Env<'_>) -> Result<()> {
        let name = bounded(name);
        if name == ROOT_NAME {
            return Err(TimerError::ReservedName {
                name: name.to_owned(),
            });
        }
        self.check_depth(name)?;
        let id = self.registry.resolve(name);
        self.push(id, env)
    }

    /// Start the region for code address `addr`, naming it through `resolver`
    /// the first time the address is seen.
    pub fn start_address(
        &mut self,
        addr: usize,
        resolver: Option<&dyn SymbolResolver>,
        env: &Env<'_>,
    ) -> Result<()> {
        if self.stack.len() >= self.max_depth {
            return self.check_depth(&placeholder_name(addr));
        }
        let id = match self.addresses.get(&addr) {
            Some(&id) => id,
            None => {
                let name = resolver
                    .and_then(|r| r.resolve(addr))
                    .filter(|name| bounded(name) != ROOT_NAME)
                    .unwrap_or_else(|| placeholder_name(addr));
                let id = self.registry.resolve(bounded(&name));
                self.addresses.insert(addr, id);
                id
            }
        };
        self.push(id, env)
    }

    /// Stop the region called `name`.
    pub fn stop(&mut self, name: &str, env: &Env<'_>) -> Result<Nesting> {
        let (wall, cpu) = sample_end(env);
        let name = bounded(name);
        if self.take_rejected(name) {
            return Ok(Nesting::Perfect);
        }
        let index = self.registry.index_of(name);
        let id = self
            .registry
            .lookup(name, index)
            .ok_or_else(|| TimerError::NotStarted {
                name: name.to_owned(),
            })?;
        self.pop(id, wall, cpu, env)
    }

    /// Stop the region for code address `addr`.
    pub fn stop_address(&mut self, addr: usize, env: &Env<'_>) -> Result<Nesting> {
        let (wall, cpu) = sample_end(env);
        if !self.rejected.is_empty() && self.take_rejected(&placeholder_name(addr)) {
            return Ok(Nesting::Perfect);
        }
        let id = self
            .addresses
            .get(&addr)
            .copied()
            .ok_or_else(|| TimerError::NotStarted {
                name: placeholder_name(addr),
            })?;
        self.pop(id, wall, cpu, env)
    }

    fn check_depth(&mut self, name: &str) -> Result<()> {
        if self.stack.len() >= self.max_depth {
            self.rejected.push(name.to_owned());
            return Err(TimerError::StackOverflow {
                name: name.to_owned(),
                limit: self.max_depth,
            });
        }
        Ok(())
    }

    /// Absorb the stop owed to the most recent rejected start, if it is `name`.
    fn take_rejected(&mut self, name: &str) -> bool {
        if self.rejected.last().map(String::as_str) == Some(name) {
            self.rejected.pop();
            true
        } else {
            false
        }
    }

    fn push(&mut self, id: TimerId, env: &Env<'_>) -> Result<()> {
        let aux = match env.counters {
            Some(counters) => counters
                .start(env.thread)
                .map_err(|e| TimerError::Counters(e.0))?,
            None => AuxSlot::default(),
        };
        self.registry.link(self.top(), id);
        let cpu = if env.cpu { cpu::sample() } else { None };
        // Read the clock last so the bookkeeping above is not charged to the region.
        let wall = if env.wall { env.clock.now() } else { 0.0 };
        self.registry.get_mut(id).active += 1;
        self.stack.push(Frame {
            timer: id,
            wall,
            cpu,
            aux,
        });
        self.last = id;
        Ok(())
    }

    fn pop(
        &mut self,
        id: TimerId,
        wall_now: f64,
        cpu_now: Option<CpuSample>,
        env: &Env<'_>,
    ) -> Result<Nesting> {
        let pos = self
            .stack
            .iter()
            .rposition(|f| f.timer == id)
            .ok_or_else(|| TimerError::AlreadyOff {
                name: self.registry.get(id).name().to_owned(),
            })?;
        if pos == 0 {
            return Err(TimerError::StackUnderflow {
                name: self.registry.get(id).name().to_owned(),
            });
        }
        let nesting = if pos + 1 == self.stack.len() {
            Nesting::Perfect
        } else {
            Nesting::Imperfect
        };
        let delta = match env.counters {
            Some(counters) => Some(
                counters
                    .stop(env.thread, &self.stack[pos].aux)
                    .map_err(|e| TimerError::Counters(e.0))?,
            ),
            None => None,
        };

        let frame = self.stack.remove(pos);
        let timer = self.registry.get_mut(id);
        timer.active -= 1;
        let mut negative = None;
        if env.wall {
            let elapsed = wall_now - frame.wall;
            let first = timer.stats.timed() == 0;
            if !timer.stats.wall.record(elapsed, first) {
                negative = Some(elapsed);
            }
        }
        if let (Some(start), Some(end)) = (frame.cpu, cpu_now) {
            timer.stats.cpu.record(start, end);
        }
        if let (Some(counters), Some(delta)) = (env.counters, delta) {
            counters.merge(&mut timer.aux, &delta);
        }
        timer.stats.count += 1;
        self.last = id;

        if let Some(delta) = negative {
            return Err(TimerError::NegativeDelta {
                name: self.registry.get(id).name().to_owned(),
                delta,
            });
        }
        Ok(nesting)
    }

    /// Zero the accumulators of the timer called `name`. Returns false when
    /// no such timer exists on this thread.
    pub fn reset_timer(&mut self, name: &str) -> bool {
        let name = bounded(name);
        let index = self.registry.index_of(name);
        match self.registry.lookup(name, index) {
            Some(id) => {
                self.registry.get_mut(id).reset();
                true
            }
            None => false,
        }
    }

    /// Zero the accumulators of every timer on this thread.
    pub fn reset(&mut self) {
        for timer in self.registry.iter_mut() {
            timer.reset();
        }
    }

    /// Push and pop a scratch frame, mirroring the stack work of a start/stop
    /// pair without touching any timer.
    pub(crate) fn simulate_bookkeeping(&mut self) -> usize {
        let top = self.top();
        let depth = self.stack.len();
        if depth < self.max_depth {
            self.stack.push(Frame {
                timer: top,
                ..Frame::root()
            });
            self.stack.pop();
        }
        depth
    }

    /// Move the start stamp of the top frame by `seconds`.
    #[cfg(test)]
    pub(crate) fn shift_top_start(&mut self, seconds: f64) {
        if let Some(frame) = self.stack.last_mut() {
            frame.wall += seconds;
        }
    }

    /// Timer on top of the call stack.
    #[must_use]
    pub fn top(&self) -> TimerId {
        self.stack.last().map_or(TimerId::ROOT, |f| f.timer)
    }

    /// Current stack depth; 0 when only the root is on the stack.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.len() - 1
    }

    /// Timer most recently started or stopped.
    #[must_use]
    pub const fn last_touched(&self) -> TimerId {
        self.last
    }

    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    #[must_use]
    pub fn timer(&self, id: TimerId) -> &Timer {
        self.registry.get(id)
    }

    /// Look a timer up by name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&Timer> {
        let name = bounded(name);
        self.registry
            .lookup(name, self.registry.index_of(name))
            .map(|id| self.registry.get(id))
    }

    /// Look a timer id up by name.
    #[must_use]
    pub fn find_id(&self, name: &str) -> Option<TimerId> {
        let name = bounded(name);
        self.registry.lookup(name, self.registry.index_of(name))
    }

    /// Cached timer for a code address.
    #[must_use]
    pub fn lookup_address(&self, addr: usize) -> Option<TimerId> {
        self.addresses.get(&addr).copied()
    }

    /// All timers, root first, in creation order.
    pub fn timers(&self) -> impl Iterator<Item = &Timer> {
        self.registry.iter()
    }

    /// User regions in creation order (root excluded).
    pub fn regions(&self) -> impl Iterator<Item = &Timer> {
        self.registry.iter().skip(1)
    }
}

fn sample_end(env: &Env<'_>) -> (f64, Option<CpuSample>) {
    let wall = if env.wall { env.clock.now() } else { 0.0 };
    let cpu = if env.cpu { cpu::sample() } else { None };
    (wall, cpu)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ClockSource;
    use crate::hooks::CounterError;
    use std::sync::atomic::{AtomicI64, Ordering};

    fn clock() -> Clock {
        Clock::init(ClockSource::ClockGettime).unwrap()
    }

    #[test]
    fn start_stop_counts_once() {
        let clock = clock();
        let env = Env::wall_only(&clock);
        let mut state = ThreadState::new(64, 16);

        state.start("a", &env).unwrap();
        assert!(state.find("a").unwrap().onflg());
        assert_eq!(state.stop("a", &env).unwrap(), Nesting::Perfect);

        let a = state.find("a").unwrap();
        assert_eq!(a.count(), 1);
        assert!(!a.onflg());
        assert!(a.wall().accum >= 0.0);
        assert_eq!(state.depth(), 0);
    }

    #[test]
    fn nested_pairs_build_one_edge() {
        let clock = clock();
        let env = Env::wall_only(&clock);
        let mut state = ThreadState::new(64, 16);
        const N: u64 = 25;

        for _ in 0..N {
            state.start("A", &env).unwrap();
            state.start("B", &env).unwrap();
            state.stop("B", &env).unwrap();
            state.stop("A", &env).unwrap();
        }

        assert_eq!(state.regions().count(), 2);
        let a = state.find_id("A").unwrap();
        let b = state.timer(state.find_id("B").unwrap());
        assert_eq!(b.parents().collect::<Vec<_>>(), vec![(a, N)]);
        assert_eq!(state.timer(a).count(), N);
        assert_eq!(b.count(), N);
        assert_eq!(
            state.timer(a).parents().collect::<Vec<_>>(),
            vec![(TimerId::ROOT, N)]
        );
    }

    #[test]
    fn multiple_parents_are_attributed() {
        let clock = clock();
        let env = Env::wall_only(&clock);
        let mut state = ThreadState::new(64, 16);

        for caller in ["x", "y", "x"] {
            state.start(caller, &env).unwrap();
            state.start("leaf", &env).unwrap();
            state.stop("leaf", &env).unwrap();
            state.stop(caller, &env).unwrap();
        }

        let x = state.find_id("x").unwrap();
        let y = state.find_id("y").unwrap();
        let leaf = state.find("leaf").unwrap();
        assert_eq!(leaf.parents().collect::<Vec<_>>(), vec![(x, 2), (y, 1)]);
        assert_eq!(leaf.count(), 3);
    }

    #[test]
    fn overflow_leaves_active_timers_untouched() {
        let clock = clock();
        let env = Env::wall_only(&clock);
        // Root plus two user frames.
        let mut state = ThreadState::new(64, 3);

        state.start("a", &env).unwrap();
        state.start("b", &env).unwrap();
        let before_a = *state.find("a").unwrap().stats();
        let before_b = *state.find("b").unwrap().stats();

        let err = state.start("c", &env).unwrap_err();
        assert!(matches!(err, TimerError::StackOverflow { limit: 3, .. }));
        assert!(state.find("c").is_none());
        assert_eq!(*state.find("a").unwrap().stats(), before_a);
        assert_eq!(*state.find("b").unwrap().stats(), before_b);
        assert_eq!(state.depth(), 2);

        // The stop paired with the rejected start is absorbed.
        state.stop("c", &env).unwrap();
        state.stop("b", &env).unwrap();
        state.stop("a", &env).unwrap();
        assert_eq!(state.find("a").unwrap().count(), 1);
        assert_eq!(state.find("b").unwrap().count(), 1);
    }

    #[test]
    fn rejected_start_does_not_swallow_enclosing_stop() {
        let clock = clock();
        let env = Env::wall_only(&clock);
        let mut state = ThreadState::new(64, 2);

        state.start("a", &env).unwrap();
        assert!(matches!(
            state.start("b", &env),
            Err(TimerError::StackOverflow { limit: 2, .. })
        ));

        // The caller skips the stop of "b"; "a" must still close.
        assert_eq!(state.stop("a", &env).unwrap(), Nesting::Perfect);
        let a = state.find("a").unwrap();
        assert_eq!(a.count(), 1);
        assert!(!a.onflg());
        assert_eq!(state.depth(), 0);

        // Nothing is owed any more, and "b" never existed.
        assert!(matches!(
            state.stop("b", &env),
            Err(TimerError::NotStarted { .. })
        ));
    }

    #[test]
    fn rejected_address_start_is_absorbed_by_its_own_stop() {
        let clock = clock();
        let env = Env::wall_only(&clock);
        let mut state = ThreadState::new(64, 2);

        state.start_address(0x10, None, &env).unwrap();
        assert!(state.start_address(0x20, None, &env).is_err());
        assert_eq!(state.stop_address(0x20, &env).unwrap(), Nesting::Perfect);
        assert!(state.find("0x10").unwrap().onflg());
        state.stop_address(0x10, &env).unwrap();
        assert_eq!(state.find("0x10").unwrap().count(), 1);
        assert!(state.find("0x20").is_none());
    }

    #[test]
    fn negative_interval_is_booked_then_reported() {
        let clock = clock();
        let env = Env::wall_only(&clock);
        let mut state = ThreadState::new(64, 16);

        state.start("a", &env).unwrap();
        state.shift_top_start(1000.0);
        assert!(matches!(
            state.stop("a", &env),
            Err(TimerError::NegativeDelta { delta, .. }) if delta < 0.0
        ));

        let a = state.find("a").unwrap();
        assert!(!a.wall().is_valid());
        assert_eq!(a.wall().negcount, 1);
        assert_eq!(a.count(), 1);
        assert!(!a.onflg());
        assert_eq!(state.depth(), 0);
    }

    #[test]
    fn extremes_seed_from_first_non_negative_interval() {
        let clock = clock();
        let env = Env::wall_only(&clock);
        let mut state = ThreadState::new(64, 16);

        state.start("a", &env).unwrap();
        state.shift_top_start(1000.0);
        assert!(state.stop("a", &env).is_err());
        state.start("a", &env).unwrap();
        state.shift_top_start(-2.0);
        state.stop("a", &env).unwrap();

        let wall = state.find("a").unwrap().wall();
        assert!(wall.min >= 2.0);
        assert_eq!(wall.min, wall.max);
        assert_eq!(state.find("a").unwrap().stats().timed(), 1);
    }

    #[test]
    fn root_name_cannot_be_started() {
        let clock = clock();
        let env = Env::wall_only(&clock);
        let mut state = ThreadState::new(64, 16);

        assert!(matches!(
            state.start(ROOT_NAME, &env),
            Err(TimerError::ReservedName { .. })
        ));
        assert_eq!(state.depth(), 0);
        let root = state.find(ROOT_NAME).unwrap();
        assert_eq!(root.nparents(), 0);
        assert!(root.children().is_empty());

        // A resolver naming an address after the root falls back to the
        // placeholder.
        state.start_address(0x1000, Some(&RootSymbols), &env).unwrap();
        assert_eq!(state.top(), state.find_id("0x1000").unwrap());
    }

    struct RootSymbols;

    impl SymbolResolver for RootSymbols {
        fn resolve(&self, _addr: usize) -> Option<String> {
            Some(ROOT_NAME.to_owned())
        }
    }

    #[test]
    fn recursion_times_each_level() {
        let clock = clock();
        let env = Env::wall_only(&clock);
        let mut state = ThreadState::new(64, 16);

        state.start("fib", &env).unwrap();
        state.start("fib", &env).unwrap();
        assert_eq!(state.find("fib").unwrap().depth_active(), 2);
        state.stop("fib", &env).unwrap();
        assert!(state.find("fib").unwrap().onflg());
        state.stop("fib", &env).unwrap();

        let fib = state.find("fib").unwrap();
        assert_eq!(fib.count(), 2);
        assert!(!fib.onflg());
        // The outer activation encloses the inner one.
        assert!(fib.wall().max >= fib.wall().min);
    }

    #[test]
    fn stop_below_top_is_imperfect() {
        let clock = clock();
        let env = Env::wall_only(&clock);
        let mut state = ThreadState::new(64, 16);

        state.start("outer", &env).unwrap();
        state.start("inner", &env).unwrap();
        assert_eq!(state.stop("outer", &env).unwrap(), Nesting::Imperfect);
        assert_eq!(state.top(), state.find_id("inner").unwrap());
        assert_eq!(state.stop("inner", &env).unwrap(), Nesting::Perfect);
        assert_eq!(state.depth(), 0);
    }

    #[test]
    fn stop_errors() {
        let clock = clock();
        let env = Env::wall_only(&clock);
        let mut state = ThreadState::new(64, 16);

        assert!(matches!(
            state.stop("never", &env),
            Err(TimerError::NotStarted { .. })
        ));
        state.start("a", &env).unwrap();
        state.stop("a", &env).unwrap();
        assert!(matches!(
            state.stop("a", &env),
            Err(TimerError::AlreadyOff { .. })
        ));
        assert!(matches!(
            state.stop(ROOT_NAME, &env),
            Err(TimerError::StackUnderflow { .. })
        ));
        assert!(state.find(ROOT_NAME).unwrap().onflg());
    }

    #[test]
    fn reset_keeps_identity_and_edges() {
        let clock = clock();
        let env = Env::wall_only(&clock);
        let mut state = ThreadState::new(64, 16);

        state.start("outer", &env).unwrap();
        state.start("inner", &env).unwrap();
        state.stop("inner", &env).unwrap();
        state.stop("outer", &env).unwrap();

        assert!(state.reset_timer("inner"));
        assert!(!state.reset_timer("missing"));
        let inner = state.find("inner").unwrap();
        assert_eq!(inner.count(), 0);
        assert_eq!(inner.wall().accum, 0.0);
        assert_eq!(inner.nparents(), 1);
        let outer = state.find("outer").unwrap();
        assert_eq!(outer.count(), 1);
        assert_eq!(outer.children().len(), 1);
        assert_eq!(state.regions().count(), 2);
    }

    struct Ticker(AtomicI64);

    impl AuxCounters for Ticker {
        fn configure(&mut self, _events: &[&str]) -> std::result::Result<(), CounterError> {
            Ok(())
        }

        fn start(&self, _thread: usize) -> std::result::Result<AuxSlot, CounterError> {
            let mut slot = AuxSlot::default();
            slot.0[0] = self.0.fetch_add(10, Ordering::Relaxed);
            Ok(slot)
        }

        fn stop(
            &self,
            _thread: usize,
            baseline: &AuxSlot,
        ) -> std::result::Result<AuxSlot, CounterError> {
            let mut slot = AuxSlot::default();
            slot.0[0] = self.0.load(Ordering::Relaxed) - baseline.0[0];
            Ok(slot)
        }

        fn merge(&self, into: &mut AuxSlot, from: &AuxSlot) {
            into.0[0] += from.0[0];
        }

        fn format(&self, slot: &AuxSlot) -> String {
            slot.0[0].to_string()
        }
    }

    #[test]
    fn counters_bracket_each_activation() {
        let clock = clock();
        let ticker = Ticker(AtomicI64::new(0));
        let env = Env {
            counters: Some(&ticker),
            ..Env::wall_only(&clock)
        };
        let mut state = ThreadState::new(64, 16);

        state.start("a", &env).unwrap();
        state.start("b", &env).unwrap();
        state.stop("b", &env).unwrap();
        state.stop("a", &env).unwrap();

        // Each start advances the ticker by 10.
        assert_eq!(state.find("b").unwrap().aux().0[0], 10);
        assert_eq!(state.find("a").unwrap().aux().0[0], 20);
    }

    struct Symbols;

    impl SymbolResolver for Symbols {
        fn resolve(&self, addr: usize) -> Option<String> {
            (addr == 0x1000).then(|| "known_fn".to_owned())
        }
    }

    #[test]
    fn address_regions_use_resolver_or_placeholder() {
        let clock = clock();
        let env = Env::wall_only(&clock);
        let mut state = ThreadState::new(64, 16);

        state.start_address(0x1000, Some(&Symbols), &env).unwrap();
        state.start_address(0x2000, Some(&Symbols), &env).unwrap();
        state.stop_address(0x2000, &env).unwrap();
        state.stop_address(0x1000, &env).unwrap();

        assert_eq!(state.find("known_fn").unwrap().count(), 1);
        assert_eq!(state.find("0x2000").unwrap().count(), 1);
        assert_eq!(state.lookup_address(0x1000), state.find_id("known_fn"));
    }

    #[test]
    fn placebo_clock_yields_zero_time() {
        let clock = Clock::init(ClockSource::Placebo).unwrap();
        let env = Env::wall_only(&clock);
        let mut state = ThreadState::new(8, 8);
        state.start("p", &env).unwrap();
        state.stop("p", &env).unwrap();
        assert_eq!(state.find("p").unwrap().wall().accum, 0.0);
    }
}
