//! # Upload Module
//!
//! Offline-buffered telemetry upload to the remote collector.
//!
//! This module handles:
//! - The bounded, ordered queue of pending location samples
//! - Batch serialization to the collector's JSON wire format
//! - HTTP POST through the modem's SIM808 HTTP stack
//! - Partial-batch acknowledgment and ordered requeue on failure

pub mod collector;
pub mod queue;
pub mod uploader;

pub use collector::{Collector, CollectorResponse, ModemHttpCollector, UploadBatch};
pub use queue::{QueueEntry, UploadQueue};
pub use uploader::{UploadOutcome, Uploader};
