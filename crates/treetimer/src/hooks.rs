//! Seams for external collaborators.
//!
//! Hardware-counter acquisition, symbol resolution and cross-process reduction
//! live outside this crate. They plug in through these traits.

use thiserror::Error;

use crate::stats::AuxSlot;
use crate::summary::RegionSummary;

/// Failure reported by a hardware-counter collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct CounterError(pub String);

/// Hardware performance counters.
///
/// The timing core calls `start` right before pushing a frame and `stop`
/// right after popping it, and stores what comes back in the timer's
/// [`AuxSlot`] without looking at it.
pub trait AuxCounters: Send + Sync {
    /// Select the events to count. Called once, before initialization.
    fn configure(&mut self, events: &[&str]) -> Result<(), CounterError>;

    /// Prepare per-thread state the first time a thread attaches.
    fn thread_init(&self, _thread: usize) -> Result<(), CounterError> {
        Ok(())
    }

    /// Capture a baseline for the calling thread.
    fn start(&self, thread: usize) -> Result<AuxSlot, CounterError>;

    /// Return the counts accumulated since `baseline`.
    fn stop(&self, thread: usize, baseline: &AuxSlot) -> Result<AuxSlot, CounterError>;

    /// Fold `from` into `into`.
    fn merge(&self, into: &mut AuxSlot, from: &AuxSlot);

    /// Render a slot for printing.
    fn format(&self, slot: &AuxSlot) -> String;
}

/// Maps a code address to a region name for call sites that supply no name.
pub trait SymbolResolver: Send + Sync {
    /// Best-effort name for `addr`, `None` when unknown.
    fn resolve(&self, addr: usize) -> Option<String>;
}

/// Placeholder name used when an address cannot be resolved.
#[must_use]
pub fn placeholder_name(addr: usize) -> String {
    format!("{addr:#x}")
}

/// Consumer of per-thread region summaries, e.g. a cross-rank reduction.
///
/// Receives read-only copies; it can never change timer state.
pub trait RegionReducer {
    /// Called once per thread with that thread's regions in creation order.
    fn reduce_thread(&mut self, thread: usize, regions: &mut dyn Iterator<Item = RegionSummary>);
}
