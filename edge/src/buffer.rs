//! Bounded holding area for readings the ingestor has not acknowledged.
//!
//! When full, `append` evicts the oldest entries. This is a deliberate lossy
//! mode: during a long outage the device keeps only the most recent
//! `capacity` readings instead of growing without bound.

use std::collections::VecDeque;

pub const DEFAULT_CAPACITY: usize = 100;

#[derive(Debug)]
pub struct DeliveryBuffer<T> {
    entries: VecDeque<(u64, T)>,
    capacity: usize,
    next_seq: u64,
    evicted: u64,
}

/// Ordered copy of the buffer taken for a retry, plus the sequence mark
/// needed to acknowledge exactly those entries later.
#[derive(Debug, Clone)]
pub struct Snapshot<T> {
    items: Vec<T>,
    through: u64,
}

impl<T> Snapshot<T> {
    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: Clone> DeliveryBuffer<T> {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            next_seq: 0,
            evicted: 0,
        }
    }

    /// Adds `item` at the tail, evicting from the head past capacity.
    /// Returns how many entries were dropped.
    pub fn append(&mut self, item: T) -> usize {
        self.entries.push_back((self.next_seq, item));
        self.next_seq += 1;

        let mut dropped = 0;
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
            dropped += 1;
        }
        self.evicted += dropped as u64;
        dropped
    }

    /// Copies the whole buffer, oldest first, without removing anything.
    pub fn snapshot(&self) -> Snapshot<T> {
        Snapshot {
            items: self.entries.iter().map(|(_, item)| item.clone()).collect(),
            through: self.next_seq,
        }
    }

    /// Removes the entries covered by `snapshot`. Anything appended after the
    /// snapshot was taken stays buffered.
    pub fn acknowledge(&mut self, snapshot: &Snapshot<T>) -> usize {
        let before = self.entries.len();
        while self
            .entries
            .front()
            .is_some_and(|(seq, _)| *seq < snapshot.through)
        {
            self.entries.pop_front();
        }
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total readings lost to eviction since start-up.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|(_, item)| item)
    }
}

impl<T: Clone> Default for DeliveryBuffer<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
