//! Drains the upload queue over an established data session.
//!
//! Batches are strictly sequence-ordered: the head of the queue always
//! ships first, and nothing is acknowledged beyond what the collector
//! confirmed. Failed or partially-confirmed batches go back to the front
//! of the queue in their original order.

use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use super::collector::{Collector, CollectorResponse, UploadBatch};
use super::queue::UploadQueue;
use crate::error::UploadError;

/// Result of one drain cycle
#[derive(Debug, Clone)]
pub enum UploadOutcome {
    /// Queue was empty, nothing to do
    Idle,
    /// A batch was sent and acknowledged (possibly partially)
    Drained { sent: usize, acked_through: u64 },
    /// The batch could not be delivered and was requeued
    Failed(UploadError),
}

/// Periodic queue drainer
pub struct Uploader {
    queue: Arc<Mutex<UploadQueue>>,
    collector: Arc<dyn Collector>,
    device_id: u32,
    batch_size: usize,
    consecutive_failures: u32,
}

impl Uploader {
    pub fn new(
        queue: Arc<Mutex<UploadQueue>>,
        collector: Arc<dyn Collector>,
        device_id: u32,
        batch_size: usize,
    ) -> Self {
        Self {
            queue,
            collector,
            device_id,
            batch_size,
            consecutive_failures: 0,
        }
    }

    /// Upload failures since the last successful drain
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Take one batch off the queue and ship it to the collector.
    ///
    /// The queue lock is held only to snapshot the batch and to apply the
    /// outcome, never across the network send.
    pub async fn drain_once(&mut self) -> UploadOutcome {
        let entries = self.queue.lock().unwrap().peek_batch(self.batch_size);
        if entries.is_empty() {
            return UploadOutcome::Idle;
        }

        let batch = UploadBatch {
            device_id: self.device_id,
            samples: entries.iter().map(|e| e.sample.clone()).collect(),
        };
        let highest = batch.highest_seq().unwrap_or(0);
        let sent = batch.samples.len();

        match self.collector.upload(&batch).await {
            Ok(CollectorResponse::Ack { acknowledged_through }) => {
                // Never trust an acknowledgment beyond what we sent
                let acked = acknowledged_through.min(highest);
                if acknowledged_through > highest {
                    warn!(
                        "collector acknowledged seq {} beyond sent {}, clamping",
                        acknowledged_through, highest
                    );
                }

                let tail: Vec<_> = entries
                    .into_iter()
                    .filter(|e| e.sample.seq > acked)
                    .collect();

                let mut queue = self.queue.lock().unwrap();
                queue.acknowledge_through(acked);
                if !tail.is_empty() {
                    debug!(
                        "partial acknowledgment through {}, requeueing {} entries",
                        acked,
                        tail.len()
                    );
                    queue.requeue(tail);
                }
                drop(queue);

                self.consecutive_failures = 0;
                info!("drained {} sample(s), acknowledged through seq {}", sent, acked);
                UploadOutcome::Drained {
                    sent,
                    acked_through: acked,
                }
            }
            Ok(CollectorResponse::Rejected { rejected }) => {
                self.fail(entries, UploadError::Rejected(rejected))
            }
            Err(e) => self.fail(entries, e),
        }
    }

    fn fail(&mut self, entries: Vec<super::queue::QueueEntry>, error: UploadError) -> UploadOutcome {
        warn!(
            "upload of {} entries failed ({} consecutive): {}",
            entries.len(),
            self.consecutive_failures + 1,
            error
        );
        self.queue.lock().unwrap().requeue(entries);
        self.consecutive_failures += 1;
        UploadOutcome::Failed(error)
    }
}
