//! Timer nodes stored in a per-thread arena.

use crate::stats::{AuxSlot, CpuStats, RegionStats, WallStats};

/// Name of the implicit root timer seeded on every thread.
pub const ROOT_NAME: &str = "GPTL_ROOT";

/// Stable index of a timer within its thread's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub(crate) u32);

impl TimerId {
    /// The root timer of every thread.
    pub const ROOT: Self = Self(0);

    /// Position in creation order.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// One named region on one thread.
#[derive(Debug, Clone)]
pub struct Timer {
    name: String,
    pub(crate) hash_index: usize,
    /// Open activations on the call stack.
    pub(crate) active: u32,
    pub(crate) stats: RegionStats,
    pub(crate) aux: AuxSlot,
    pub(crate) children: Vec<TimerId>,
    pub(crate) parents: Vec<TimerId>,
    pub(crate) parent_count: Vec<u64>,
}

impl Timer {
    pub(crate) fn new(name: &str, hash_index: usize) -> Self {
        Self {
            name: name.to_owned(),
            hash_index,
            active: 0,
            stats: RegionStats::default(),
            aux: AuxSlot::default(),
            children: Vec::new(),
            parents: Vec::new(),
            parent_count: Vec::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hash bucket this timer lives in.
    #[must_use]
    pub const fn hash_index(&self) -> usize {
        self.hash_index
    }

    /// True while at least one activation is open.
    #[must_use]
    pub const fn onflg(&self) -> bool {
        self.active > 0
    }

    /// Number of open activations (above one only under recursion).
    #[must_use]
    pub const fn depth_active(&self) -> u32 {
        self.active
    }

    /// Completed start/stop pairs.
    #[must_use]
    pub const fn count(&self) -> u64 {
        self.stats.count
    }

    #[must_use]
    pub const fn wall(&self) -> &WallStats {
        &self.stats.wall
    }

    #[must_use]
    pub const fn cpu(&self) -> &CpuStats {
        &self.stats.cpu
    }

    #[must_use]
    pub const fn aux(&self) -> &AuxSlot {
        &self.aux
    }

    #[must_use]
    pub const fn stats(&self) -> &RegionStats {
        &self.stats
    }

    /// Timers started at least once directly beneath this one.
    #[must_use]
    pub fn children(&self) -> &[TimerId] {
        &self.children
    }

    /// Distinct callers and how often each started this timer.
    pub fn parents(&self) -> impl Iterator<Item = (TimerId, u64)> + '_ {
        self.parents
            .iter()
            .copied()
            .zip(self.parent_count.iter().copied())
    }

    /// Number of distinct callers.
    #[must_use]
    pub fn nparents(&self) -> usize {
        self.parents.len()
    }

    /// Zero every accumulator; name, edges and activations stay.
    pub(crate) fn reset(&mut self) {
        self.stats = RegionStats::default();
        self.aux = AuxSlot::default();
    }
}
