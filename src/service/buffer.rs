//! Bounded FIFO of received lines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One received line and the time it was framed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampedMessage {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl TimestampedMessage {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
        }
    }
}

/// FIFO with a fixed capacity. Pushing onto a full buffer evicts the oldest
/// entry.
/// Upper bound on the up-front allocation; `capacity` is only an eviction
/// bound and may be arbitrarily large.
const INITIAL_ALLOCATION: usize = 1024;

#[derive(Debug)]
pub struct MessageBuffer {
    messages: VecDeque<TimestampedMessage>,
    capacity: usize,
    evicted: u64,
}

impl MessageBuffer {
    /// `capacity` must be at least 1; callers validate it before opening.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            messages: VecDeque::with_capacity(capacity.min(INITIAL_ALLOCATION)),
            capacity,
            evicted: 0,
        }
    }

    pub fn push(&mut self, message: TimestampedMessage) {
        if self.messages.len() == self.capacity {
            self.messages.pop_front();
            self.evicted += 1;
        }
        self.messages.push_back(message);
    }

    /// Remove and return everything, oldest first.
    pub fn drain(&mut self) -> Vec<TimestampedMessage> {
        self.messages.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total messages dropped to make room since creation.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}
