//! Capped chat history replayed to new sessions

use std::collections::VecDeque;

use crate::protocol::ChatMessage;

/// Default number of chat messages kept in memory
pub const MAX_HISTORY: usize = 100;

/// Insertion-ordered record of the most recent chat messages.
///
/// Only chat lines are stored; announcements and user counts are transient
/// and never reach this type. Once `capacity` is exceeded the oldest entries
/// are dropped.
#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<ChatMessage>,
    capacity: usize,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a message, evicting the oldest ones past capacity
    pub fn push(&mut self, message: ChatMessage) {
        self.entries.push_back(message);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Oldest first
    pub fn iter(&self) -> impl Iterator<Item = &ChatMessage> {
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
}

impl Default for History {
    fn default() -> Self {
        Self::new(MAX_HISTORY)
    }
}
