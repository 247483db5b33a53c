//! Reorder buffer releasing sentence results strictly by ordinal.
//!
//! Synthesis finishes out of order; results are parked by ordinal and
//! released as soon as the next expected ordinal is present.

use std::collections::BTreeMap;

#[derive(Debug)]
pub struct ReorderBuffer<T> {
    /// Results indexed by ordinal for ordering.
    parked: BTreeMap<u32, T>,
    /// Next ordinal to release.
    next: u32,
}

impl<T> ReorderBuffer<T> {
    pub fn new() -> Self {
        Self {
            parked: BTreeMap::new(),
            next: 0,
        }
    }

    /// Parks a result and returns every result that is now releasable, in
    /// ordinal order. Ordinals already released are ignored.
    pub fn insert(&mut self, ordinal: u32, item: T) -> Vec<(u32, T)> {
        if ordinal < self.next {
            return Vec::new();
        }
        self.parked.insert(ordinal, item);

        let mut released = Vec::new();
        while let Some(item) = self.parked.remove(&self.next) {
            released.push((self.next, item));
            self.next += 1;
        }
        released
    }

    pub fn next_ordinal(&self) -> u32 {
        self.next
    }

    /// Number of parked results waiting on an earlier ordinal.
    pub fn parked(&self) -> usize {
        self.parked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parked.is_empty()
    }
}

impl<T> Default for ReorderBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}
