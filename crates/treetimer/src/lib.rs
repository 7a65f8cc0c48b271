//! Per-thread call-tree timing.
//!
//! This crate instruments application code with named start/stop regions,
//! accumulates wall-clock, CPU and optional hardware-counter statistics per
//! region and thread, records which region called which, and estimates its
//! own overhead.
//!
//! # Feature Flags
//!
//! - `profiling`: Enable the [`region!`] macro. When disabled, the macro
//!   expands to nothing for zero overhead.
//!
//! # Usage
//!
//! Configure and initialize one [`Library`] at startup:
//!
//! ```ignore
//! let mut lib = treetimer::Library::new();
//! lib.set_option(treetimer::Setting::Cpu(true))?;
//! lib.initialize()?;
//! ```
//!
//! Each thread attaches once and times regions through its handle:
//!
//! ```ignore
//! let mut timers = lib.attach()?;
//! timers.start("solve")?;
//! // ... work
//! timers.stop("solve")?;
//! ```
//!
//! Query after the handles are dropped:
//!
//! ```ignore
//! let secs = lib.wallclock("solve", 0)?;
//! let merged = lib.merged("solve")?;
//! ```

pub mod callgraph;
pub mod clock;
mod context;
mod cpu;
mod error;
pub mod hooks;
mod macros;
pub mod options;
pub mod overhead;
pub mod registry;
mod report;
pub mod stats;
pub mod summary;
mod thread;
pub mod timer;
mod tsc;

// Re-export public API
pub use callgraph::{Nesting, ThreadState};
pub use clock::{Clock, ClockSource};
pub use context::{Library, Stamp, TimerQuery};
pub use cpu::CpuSample;
pub use error::{ErrorKind, Result, TimerError};
pub use hooks::{AuxCounters, CounterError, RegionReducer, SymbolResolver};
pub use macros::Region;
pub use options::{Options, Setting};
pub use overhead::Overhead;
pub use stats::{AuxSlot, CpuStats, RegionStats, WallStats};
pub use summary::{RegionSummary, ThreadWork};
pub use thread::ThreadTimers;
pub use timer::{Timer, TimerId, ROOT_NAME};
