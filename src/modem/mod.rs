//! # Modem Module
//!
//! AT-command session over the GPS/cellular modem's serial UART.
//!
//! This module handles:
//! - Opening the serial port at 115,200 baud (SIM808 default)
//! - Line-oriented reads with bounded timeouts
//! - Framing and sending AT commands, one in flight at a time
//! - Matching response lines to the pending command or to registered
//!   unsolicited-event handlers
//! - Per-command timeout and retry

pub mod command;
pub mod session;
pub mod transport;

pub use command::{Command, ResponseLines};
pub use session::CommandSession;
pub use transport::{SerialTransport, Transport};
