//! Bounded history of processed message ids.

use std::collections::{HashSet, VecDeque};

/// How many ids are remembered before the oldest is forgotten.
pub const SEEN_CAPACITY: usize = 100;

/// FIFO set of recently seen message ids. Membership is O(1); the oldest id is evicted first.
#[derive(Debug, Clone)]
pub struct SeenSet {
    order: VecDeque<String>,
    members: HashSet<String>,
    capacity: usize,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::with_capacity(SEEN_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity + 1),
            members: HashSet::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    /// Remember `id`. Re-recording a remembered id does not refresh its position.
    pub fn record(&mut self, id: &str) {
        if !self.members.insert(id.to_owned()) {
            return;
        }
        self.order.push_back(id.to_owned());
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Ids oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }
}

impl Default for SeenSet {
    fn default() -> Self {
        Self::new()
    }
}
