use std::collections::{HashSet, VecDeque};

use uuid::Uuid;

const DEFAULT_CAPACITY: usize = 512;

/// Bounded set of recently seen message ids. The gateway can redeliver a
/// message across a reconnect; remembering what was already shown keeps the
/// user from being notified twice. Oldest entries are evicted first.
pub struct SeenMessages {
    order: VecDeque<Uuid>,
    seen: HashSet<Uuid>,
    capacity: usize,
}

impl SeenMessages {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a message id. Returns false if it was already present.
    pub fn insert(&mut self, id: Uuid) -> bool {
        if !self.seen.insert(id) {
            return false;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        true
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for SeenMessages {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}
