//! Bounded retry queue for failed saves
//!
//! Failed autosaves park their snapshot here and the drain timer retries them
//! in FIFO order. Three rules keep the queue from growing without bound:
//!
//! - capacity: when full, the oldest entry is evicted to make room
//! - staleness: entries older than the horizon are dropped, never retried
//! - back-pressure: the first failed retry ends a drain pass
//!
//! Every snapshot only ever carries points that are at least as high as the
//! one before it, so dropping an old entry never loses progress that a newer
//! save does not also carry.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::record::{Points, WalletAddress};

/// Default maximum number of queued saves per wallet
pub const DEFAULT_RETRY_CAPACITY: usize = 50;

/// Default age after which a queued save is discarded
pub const DEFAULT_STALENESS_HORIZON: Duration = Duration::from_secs(5 * 60);

/// Default interval between drain passes
pub const DEFAULT_DRAIN_INTERVAL: Duration = Duration::from_secs(60);

/// Retry contract for failed saves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub capacity: usize,
    pub staleness_horizon: Duration,
    pub drain_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_RETRY_CAPACITY,
            staleness_horizon: DEFAULT_STALENESS_HORIZON,
            drain_interval: DEFAULT_DRAIN_INTERVAL,
        }
    }
}

/// A save waiting to be retried
#[derive(Debug, Clone, PartialEq)]
pub struct RetryEntry {
    pub address: WalletAddress,
    pub points: Points,
    pub queued_at: Instant,
    pub seq: u64,
}

impl RetryEntry {
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.queued_at)
    }
}

/// FIFO queue with a fixed capacity
#[derive(Debug)]
pub struct RetryQueue {
    entries: VecDeque<RetryEntry>,
    capacity: usize,
    next_seq: u64,
}

impl RetryQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            next_seq: 0,
        }
    }

    /// Append a snapshot, returning the entry evicted to make room
    pub fn push(&mut self, address: WalletAddress, points: Points, queued_at: Instant) -> Option<RetryEntry> {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(RetryEntry {
            address,
            points,
            queued_at,
            seq: self.next_seq,
        });
        self.next_seq += 1;
        evicted
    }

    pub fn front(&self) -> Option<&RetryEntry> {
        self.entries.front()
    }

    /// Remove the head if it is still the entry with `seq`
    pub fn complete(&mut self, seq: u64) -> bool {
        if self.entries.front().is_some_and(|e| e.seq == seq) {
            self.entries.pop_front();
            true
        } else {
            false
        }
    }

    /// Drop every entry older than `horizon`, returning how many were dropped
    pub fn drop_stale(&mut self, horizon: Duration, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.age(now) <= horizon);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
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
