//! # Bike Beacon Library
//!
//! Embedded telemetry client for a bicycle tracker.
//!
//! This library drives a combined GPS/cellular modem (SIM808 family) over a
//! serial UART: it acquires GPS fixes, maintains a cellular data session,
//! uploads buffered location reports to a remote collector, and reflects the
//! device state on a tri-color status LED.

pub mod config;
pub mod error;
pub mod modem;
pub mod gps;
pub mod net;
pub mod upload;
pub mod status;
