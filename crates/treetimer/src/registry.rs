//! Per-thread hash table of timers.
//!
//! Timers live in an arena in creation order; the table maps a hash index to
//! the ids sharing it. Collisions chain inside the bucket, the table is never
//! rehashed.

use crate::options::MAX_CHARS;
use crate::timer::{Timer, TimerId, ROOT_NAME};

/// Bucket index for `name` in a table of `table_size` buckets.
///
/// Position-weighted byte sum over the first [`MAX_CHARS`] bytes. Depends only
/// on the bytes, so every thread maps a name to the same bucket.
#[inline]
#[must_use]
pub fn hash(name: &str, table_size: usize) -> usize {
    let mut indx: usize = 0;
    for (i, &b) in name.as_bytes().iter().take(MAX_CHARS).enumerate() {
        indx = indx.wrapping_add((i + 1) * usize::from(b));
    }
    indx % table_size
}

/// Timer arena plus hash buckets for one thread.
#[derive(Debug, Clone)]
pub struct Registry {
    timers: Vec<Timer>,
    table: Box<[Vec<TimerId>]>,
}

impl Registry {
    /// Create a registry seeded with the root timer.
    #[must_use]
    pub fn new(table_size: usize) -> Self {
        let table_size = table_size.max(1);
        let mut registry = Self {
            timers: Vec::new(),
            table: vec![Vec::new(); table_size].into_boxed_slice(),
        };
        let root = registry.insert(ROOT_NAME, hash(ROOT_NAME, table_size));
        debug_assert_eq!(root, TimerId::ROOT);
        registry
    }

    #[must_use]
    pub fn table_size(&self) -> usize {
        self.table.len()
    }

    /// Bucket index for `name` in this table.
    #[inline]
    #[must_use]
    pub fn index_of(&self, name: &str) -> usize {
        hash(name, self.table.len())
    }

    /// Find the timer called `name` in bucket `index`.
    #[inline]
    #[must_use]
    pub fn lookup(&self, name: &str, index: usize) -> Option<TimerId> {
        self.table[index]
            .iter()
            .copied()
            .find(|id| self.timers[id.index()].name() == name)
    }

    /// Create a timer called `name` in bucket `index`.
    pub fn insert(&mut self, name: &str, index: usize) -> TimerId {
        let id = TimerId(self.timers.len() as u32);
        self.timers.push(Timer::new(name, index));
        self.table[index].push(id);
        id
    }

    /// Find or create the timer called `name`.
    pub fn resolve(&mut self, name: &str) -> TimerId {
        let index = self.index_of(name);
        match self.lookup(name, index) {
            Some(id) => id,
            None => self.insert(name, index),
        }
    }

    /// Record that `parent` started `child`, creating the edge on first use.
    pub fn link(&mut self, parent: TimerId, child: TimerId) {
        let known = self.timers[parent.index()].children.contains(&child);
        if !known {
            self.timers[parent.index()].children.push(child);
            let node = &mut self.timers[child.index()];
            node.parents.push(parent);
            node.parent_count.push(0);
        }
        let node = &mut self.timers[child.index()];
        if let Some(slot) = node.parents.iter().position(|&p| p == parent) {
            node.parent_count[slot] += 1;
        }
    }

    #[must_use]
    pub fn get(&self, id: TimerId) -> &Timer {
        &self.timers[id.index()]
    }

    pub(crate) fn get_mut(&mut self, id: TimerId) -> &mut Timer {
        &mut self.timers[id.index()]
    }

    /// Every timer, root first, in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Timer> {
        self.timers.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Timer> {
        self.timers.iter_mut()
    }

    /// Number of timers including the root.
    #[must_use]
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Entries per bucket, for collision diagnostics.
    #[must_use]
    pub fn bucket_occupancy(&self) -> Vec<usize> {
        self.table.iter().map(Vec::len).collect()
    }

    /// First bucket holding a non-root timer, with that timer's name.
    #[must_use]
    pub fn first_occupied(&self) -> Option<(usize, &str)> {
        self.table.iter().enumerate().find_map(|(index, bucket)| {
            bucket
                .iter()
                .find(|id| **id != TimerId::ROOT)
                .map(|id| (index, self.timers[id.index()].name()))
        })
    }
}
