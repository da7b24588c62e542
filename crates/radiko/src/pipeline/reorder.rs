use std::collections::{BTreeMap, VecDeque};

use tracing::debug;

/// Holds completed downloads until everything dispatched before them has
/// been released. Sequence numbers need not be contiguous: release order is
/// the dispatch order, which the walker guarantees to be ascending.
#[derive(Debug)]
pub struct ReorderBuffer<T> {
    dispatched: VecDeque<u64>,
    completed: BTreeMap<u64, T>,
}

impl<T> Default for ReorderBuffer<T> {
    fn default() -> Self {
        Self {
            dispatched: VecDeque::new(),
            completed: BTreeMap::new(),
        }
    }
}

impl<T> ReorderBuffer<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a sequence number whose result will arrive later. Numbers
    /// not above the last dispatched one are ignored and return `false`.
    pub fn dispatch(&mut self, sequence: u64) -> bool {
        if self.dispatched.back().is_some_and(|&last| sequence <= last) {
            debug!(sequence, "Ignoring out-of-order dispatch");
            return false;
        }
        self.dispatched.push_back(sequence);
        true
    }

    pub fn complete(&mut self, sequence: u64, item: T) {
        self.completed.insert(sequence, item);
    }

    /// Next item in dispatch order, if it has completed.
    pub fn pop_ready(&mut self) -> Option<(u64, T)> {
        let &next = self.dispatched.front()?;
        let item = self.completed.remove(&next)?;
        self.dispatched.pop_front();
        Some((next, item))
    }

    /// Dispatched but not yet released.
    pub fn pending(&self) -> usize {
        self.dispatched.len()
    }

    /// Completed but waiting for a predecessor.
    pub fn buffered(&self) -> usize {
        self.completed.len()
    }
}
