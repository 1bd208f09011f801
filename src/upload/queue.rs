//! Bounded, ordered buffer of pending location samples.
//!
//! The queue favors recency: under sustained offline periods the oldest
//! entries are evicted first so memory stays bounded. Nothing leaves the
//! queue silently; evictions and attempt-limit drops increment counters
//! that the caller logs.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tracing::{debug, warn};

use crate::gps::LocationSample;

/// A queued sample with its retry bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub sample: LocationSample,
    pub enqueued_at: DateTime<Utc>,
    pub attempts: u32,
}

/// FIFO queue of samples awaiting upload.
///
/// Entries keep their enqueue order; sequence numbers are monotonic, so
/// order by position and order by sequence coincide.
#[derive(Debug)]
pub struct UploadQueue {
    entries: VecDeque<QueueEntry>,
    capacity: usize,
    max_attempts: u32,
    evicted: u64,
    dropped: u64,
}

impl UploadQueue {
    pub fn new(capacity: usize, max_attempts: u32) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(64)),
            capacity,
            max_attempts,
            evicted: 0,
            dropped: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries evicted to stay within capacity
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Entries dropped for exceeding the attempt limit
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Append a fresh sample, evicting the oldest entry on overflow
    pub fn enqueue(&mut self, sample: LocationSample) {
        self.entries.push_back(QueueEntry {
            sample,
            enqueued_at: Utc::now(),
            attempts: 0,
        });
        self.enforce_capacity();
    }

    /// Take up to `max_n` entries off the front, in order.
    ///
    /// The batch leaves the queue: the caller must either
    /// [`acknowledge_through`](Self::acknowledge_through) the confirmed
    /// part and [`requeue`](Self::requeue) the rest, or requeue the whole
    /// batch on failure.
    pub fn peek_batch(&mut self, max_n: usize) -> Vec<QueueEntry> {
        let n = max_n.min(self.entries.len());
        self.entries.drain(..n).collect()
    }

    /// Remove every entry with sequence number `<= seq`
    pub fn acknowledge_through(&mut self, seq: u64) {
        let before = self.entries.len();
        self.entries.retain(|e| e.sample.seq > seq);
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!("acknowledged {} entries through seq {}", removed, seq);
        }
    }

    /// Re-insert failed entries at the front, preserving their order.
    ///
    /// Attempt counts increment; entries that reach the attempt limit are
    /// dropped and counted instead of requeued.
    pub fn requeue(&mut self, entries: Vec<QueueEntry>) {
        for mut entry in entries.into_iter().rev() {
            entry.attempts += 1;
            if entry.attempts >= self.max_attempts {
                warn!(
                    "dropping sample seq {} after {} attempts",
                    entry.sample.seq, entry.attempts
                );
                self.dropped += 1;
                continue;
            }
            self.entries.push_front(entry);
        }
        self.enforce_capacity();
    }

    fn enforce_capacity(&mut self) {
        while self.entries.len() > self.capacity {
            let evicted = self.entries.pop_front();
            self.evicted += 1;
            if let Some(entry) = evicted {
                warn!(
                    "queue full, evicting oldest sample seq {} ({} evicted total)",
                    entry.sample.seq, self.evicted
                );
            }
        }
    }
}
