//! # Error Types
//!
//! Custom error types for Bike Beacon using `thiserror`.
//!
//! The taxonomy follows the escalation path of the device: command-level
//! failures (`CommandError`) are absorbed and retried by the issuing
//! component, session-level failures (`SessionError`) drive backoff and
//! state transitions, and upload failures (`UploadError`) requeue data for
//! the next drain cycle. Only `TransportError` is fatal to a session.

use thiserror::Error;

/// Failure of a single AT command exchange.
#[derive(Debug, Clone, Error)]
pub enum CommandError {
    /// No terminal response within the timeout window, retries exhausted
    #[error("command timed out after {attempts} attempt(s)")]
    Timeout { attempts: u32 },

    /// The modem answered with an explicit error token
    #[error("modem rejected command: {0}")]
    ModemError(String),

    /// Link-level read/write failure; fatal to the current session
    #[error("transport error: {0}")]
    TransportError(String),
}

impl CommandError {
    /// Whether this failure should force a network session reset.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CommandError::TransportError(_))
    }
}

/// Failure to establish or keep the cellular data session.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// Not registered on the cellular network yet
    #[error("not registered on network (status {0})")]
    NotRegistered(u8),

    /// Bearer activation command sequence failed
    #[error("bearer activation failed: {0}")]
    BearerFailed(String),

    /// The modem answered with something we could not interpret
    #[error("unexpected modem response: {0}")]
    Protocol(String),

    /// Underlying command failure
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Failure of a single upload attempt against the collector.
#[derive(Debug, Clone, Error)]
pub enum UploadError {
    /// Collector returned an explicit rejection
    #[error("collector rejected batch: {0}")]
    Rejected(String),

    /// Collector response could not be parsed
    #[error("malformed collector response: {0}")]
    MalformedResponse(String),

    /// Underlying command failure while talking to the modem
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Main error type for Bike Beacon
#[derive(Debug, Error)]
pub enum BikeBeaconError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// No modem found at any of the candidate device paths
    #[error("No modem found at: {0}")]
    SerialPortNotFound(String),

    /// Serial port errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// Command session errors
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Network session errors
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Upload errors
    #[error(transparent)]
    Upload(#[from] UploadError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Bike Beacon
pub type Result<T> = std::result::Result<T, BikeBeaconError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_is_fatal() {
        assert!(CommandError::TransportError("read failed".into()).is_fatal());
        assert!(!CommandError::Timeout { attempts: 3 }.is_fatal());
        assert!(!CommandError::ModemError("+CME ERROR: 10".into()).is_fatal());
    }

    #[test]
    fn test_command_error_converts_into_session_error() {
        let err: SessionError = CommandError::Timeout { attempts: 2 }.into();
        match err {
            SessionError::Command(CommandError::Timeout { attempts }) => {
                assert_eq!(attempts, 2);
            }
            other => panic!("Expected Command(Timeout), got: {:?}", other),
        }
    }

    #[test]
    fn test_error_display_mentions_cause() {
        let err = UploadError::Rejected("unknown device".into());
        assert!(err.to_string().contains("unknown device"));

        let err = SessionError::NotRegistered(2);
        assert!(err.to_string().contains("status 2"));
    }
}
