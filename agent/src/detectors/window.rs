//! Bounded FIFO of recent actions. Oldest entry is evicted on overflow.

use crate::signal::Action;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct ActionWindow {
    capacity: usize,
    entries: VecDeque<Action>,
}

impl ActionWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Append, returning the evicted action if the window was full.
    pub fn push(&mut self, action: Action) -> Option<Action> {
        let evicted = if self.entries.len() == self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(action);
        evicted
    }

    /// The last `n` actions, oldest first.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &Action> {
        self.entries.iter().skip(self.entries.len().saturating_sub(n))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Action> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
