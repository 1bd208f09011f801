//! Byte-stream transport over the modem's serial UART.
//!
//! Exposes a line-oriented read with a bounded timeout plus a raw write,
//! abstracted behind a trait so the command session can be driven by a
//! scripted mock in tests.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use crate::error::{BikeBeaconError, CommandError};

/// SIM808 default baud rate
pub const MODEM_BAUD_RATE: u32 = 115_200;

/// Default modem device paths to try (in order of preference)
const DEFAULT_DEVICE_PATHS: &[&str] = &[
    "/dev/ttyS0",   // Pi header UART (FONA808 wiring)
    "/dev/ttyUSB0", // USB-to-serial adapters
    "/dev/ttyAMA0", // PL011 UART on older Pi models
];

/// Line-oriented byte-stream over the serial link.
///
/// `read_line` returns `Ok(None)` when the timeout elapses with no complete
/// line available; link-level failures surface as
/// [`CommandError::TransportError`].
#[async_trait]
pub trait Transport: Send {
    /// Read one CR/LF-terminated line, waiting at most `timeout`
    async fn read_line(&mut self, timeout: Duration) -> Result<Option<Bytes>, CommandError>;

    /// Write raw bytes to the link
    async fn write(&mut self, data: &[u8]) -> Result<(), CommandError>;
}

/// Serial transport over the modem UART
pub struct SerialTransport {
    port: tokio_serial::SerialStream,
    device_path: String,
    buffer: BytesMut,
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("device_path", &self.device_path)
            .finish_non_exhaustive()
    }
}

impl SerialTransport {
    /// Open the modem serial port, auto-detecting the device path
    ///
    /// # Errors
    ///
    /// Returns error if no modem device is found or connection fails
    pub fn open(baud_rate: u32) -> Result<Self, BikeBeaconError> {
        Self::open_with_paths(DEFAULT_DEVICE_PATHS, baud_rate)
    }

    /// Open the modem serial port trying the given device paths in order
    pub fn open_with_paths(paths: &[&str], baud_rate: u32) -> Result<Self, BikeBeaconError> {
        for path in paths {
            debug!("Trying to open serial port: {}", path);

            match Self::open_port(path, baud_rate) {
                Ok(port) => {
                    info!("Successfully opened modem device at {}", path);
                    return Ok(Self {
                        port,
                        device_path: path.to_string(),
                        buffer: BytesMut::with_capacity(256),
                    });
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                    continue;
                }
            }
        }

        Err(BikeBeaconError::SerialPortNotFound(paths.join(", ")))
    }

    /// Open a specific serial port with modem settings (8N1)
    fn open_port(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream, BikeBeaconError> {
        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| BikeBeaconError::Serial(format!("Failed to open {}: {}", path, e)))?;

        Ok(port)
    }

    /// Get the device path of the opened serial port
    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    /// Split one complete line off the front of the buffer, if present.
    ///
    /// The returned line has its CR/LF terminator stripped.
    fn take_line(&mut self) -> Option<Bytes> {
        let newline = self.buffer.iter().position(|&b| b == b'\n')?;
        let mut line = self.buffer.split_to(newline + 1);
        // strip LF and any preceding CR
        line.truncate(newline);
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        Some(line.freeze())
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn read_line(&mut self, timeout: Duration) -> Result<Option<Bytes>, CommandError> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if let Some(line) = self.take_line() {
                return Ok(Some(line));
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            let mut chunk = [0u8; 128];
            match tokio::time::timeout(remaining, self.port.read(&mut chunk)).await {
                Err(_) => return Ok(None),
                Ok(Ok(0)) => {
                    return Err(CommandError::TransportError(
                        "serial port closed".to_string(),
                    ));
                }
                Ok(Ok(n)) => self.buffer.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => {
                    return Err(CommandError::TransportError(format!(
                        "read from {} failed: {}",
                        self.device_path, e
                    )));
                }
            }
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), CommandError> {
        self.port
            .write_all(data)
            .await
            .map_err(|e| CommandError::TransportError(format!("write failed: {}", e)))?;

        self.port
            .flush()
            .await
            .map_err(|e| CommandError::TransportError(format!("flush failed: {}", e)))?;

        debug!("Sent {} bytes to modem", data.len());
        Ok(())
    }
}
