//! Self-calibrating estimate of the instrumentation cost.
//!
//! Each layer of a start/stop call is run in a tight loop of [`ITERATIONS`]
//! calls timed with the production clock. The per-call figures are then
//! combined into the cost charged to a timer's own interval and the cost
//! leaked into its caller's interval.

use std::fmt;
use std::hint::black_box;

use serde::{Deserialize, Serialize};

use crate::callgraph::ThreadState;
use crate::clock::Clock;
use crate::hooks::AuxCounters;
use crate::options::MAX_CHARS;
use crate::registry::{hash, Registry};
use crate::stats::bounded;

/// Calls per micro-benchmark.
pub const ITERATIONS: u32 = 1000;

/// Name probed when the caller's table holds no regions yet.
const PROBE_NAME: &str = "overhead_probe";

/// Address probed in the address-cache benchmark.
const PROBE_ADDRESS: usize = 0x1000;

/// Per-call cost of each instrumentation layer, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Overhead {
    /// Copying the region name into a bounded buffer.
    pub shim: f64,
    /// Resolving the calling thread's slot.
    pub thread: f64,
    /// Computing the hash index of a name.
    pub hash: f64,
    /// Finding a timer in its hash bucket.
    pub lookup: f64,
    /// Reading the underlying clock.
    pub clock: f64,
    /// Reading the hardware counters, zero without a collaborator.
    pub counters: f64,
    /// Pushing and popping a call-stack frame, zero after imperfect nesting.
    pub stack: f64,
    /// Finding a timer through the address cache. Not part of the totals.
    pub address: f64,
    /// Imperfect nesting was seen, so `stack` was not measured.
    pub imperfect_nesting: bool,
}

impl Overhead {
    /// Cost charged to a timer's own interval.
    #[must_use]
    pub fn self_overhead(&self) -> f64 {
        self.clock
    }

    /// Cost leaked into the enclosing timer's interval per start/stop pair.
    #[must_use]
    pub fn parent_overhead(&self) -> f64 {
        self.shim
            + self.clock
            + self.stack
            + 2.0 * (self.thread + self.hash + self.lookup + self.counters)
    }

    /// Sum of every layer counted once.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.shim + self.thread + self.hash + self.lookup + self.clock + self.stack + self.counters
    }
}

impl fmt::Display for Overhead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total overhead of 1 start/stop pair: {:9.3e} sec", self.total())?;
        writeln!(f, "  binding shim:        {:9.3e}", self.shim)?;
        writeln!(f, "  thread lookup:       {:9.3e}", self.thread)?;
        writeln!(f, "  hash index:          {:9.3e}", self.hash)?;
        writeln!(f, "  table lookup:        {:9.3e}", self.lookup)?;
        writeln!(f, "  clock read:          {:9.3e}", self.clock)?;
        writeln!(f, "  counter read:        {:9.3e}", self.counters)?;
        if self.imperfect_nesting {
            writeln!(f, "  stack bookkeeping:   not measured (imperfect nesting)")?;
        } else {
            writeln!(f, "  stack bookkeeping:   {:9.3e}", self.stack)?;
        }
        writeln!(f, "  address lookup:      {:9.3e} (informational)", self.address)?;
        writeln!(f, "Self overhead:   {:9.3e} sec", self.self_overhead())?;
        write!(f, "Parent overhead: {:9.3e} sec", self.parent_overhead())
    }
}

/// Inputs to one calibration run.
pub(crate) struct Calibration<'a> {
    pub clock: &'a Clock,
    /// The calling thread's registry; only read.
    pub registry: &'a Registry,
    pub counters: Option<&'a dyn AuxCounters>,
    pub thread: usize,
    /// Resolves the calling thread's slot the way `attach` does.
    pub thread_lookup: &'a dyn Fn() -> Option<usize>,
    pub imperfect_nesting: bool,
    pub max_stack_depth: usize,
}

/// Average cost of one call of `f`.
fn per_call(clock: &Clock, mut f: impl FnMut()) -> f64 {
    let t1 = clock.now();
    for _ in 0..ITERATIONS {
        f();
    }
    let t2 = clock.now();
    (t2 - t1) / f64::from(ITERATIONS)
}

pub(crate) fn calibrate(cal: &Calibration<'_>) -> Overhead {
    let clock = cal.clock;
    let table_size = cal.registry.table_size();

    let shim = per_call(clock, || {
        let mut buf = [0u8; MAX_CHARS + 1];
        let src = bounded(black_box(PROBE_NAME)).as_bytes();
        buf[..src.len()].copy_from_slice(src);
        black_box(&buf);
    });

    let thread = per_call(clock, || {
        black_box((cal.thread_lookup)());
    });

    let hash_cost = per_call(clock, || {
        black_box(hash(black_box(PROBE_NAME), table_size));
    });

    let (index, name) = cal
        .registry
        .first_occupied()
        .unwrap_or_else(|| (cal.registry.index_of(PROBE_NAME), PROBE_NAME));
    let lookup = per_call(clock, || {
        black_box(cal.registry.lookup(black_box(name), index));
    });

    let clock_cost = per_call(clock, || {
        black_box(clock.now());
    });

    let counters = cal.counters.map_or(0.0, |counters| {
        per_call(clock, || {
            let _ = black_box(counters.start(cal.thread));
        })
    });

    let mut scratch = ThreadState::new(table_size.min(64), cal.max_stack_depth);
    let stack = if cal.imperfect_nesting {
        0.0
    } else {
        per_call(clock, || {
            black_box(scratch.simulate_bookkeeping());
        })
    };

    let address = per_call(clock, || {
        black_box(scratch.lookup_address(black_box(PROBE_ADDRESS)));
    });

    Overhead {
        shim,
        thread,
        hash: hash_cost,
        lookup,
        clock: clock_cost,
        counters,
        stack,
        address,
        imperfect_nesting: cal.imperfect_nesting,
    }
}
