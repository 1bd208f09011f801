//! # Network Module
//!
//! Cellular registration and GPRS bearer management.
//!
//! This module handles:
//! - Tracking the session state machine (unregistered through data-session-up)
//! - Registration checks (`AT+CREG?`) and deregistration events (`+CREG` URC)
//! - Bearer activation via the SIM808 SAPBR command sequence
//! - Exponential backoff between failed establishment attempts

pub mod backoff;

pub use backoff::Backoff;

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{CommandError, SessionError};
use crate::modem::{Command, CommandSession};

/// Cellular session state, owned by [`NetworkSessionManager`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unregistered,
    Registering,
    RegisteredNoData,
    DataSessionUp,
    DataSessionError,
}

/// Establishes and supervises the cellular data session.
///
/// State is published through a watch channel so the uploader and status
/// indicator observe transitions without polling the modem themselves.
pub struct NetworkSessionManager {
    session: Arc<CommandSession>,
    state: Arc<watch::Sender<SessionState>>,
    state_rx: watch::Receiver<SessionState>,
    backoff: Mutex<Backoff>,
    apn: String,
    timeout: Duration,
}

impl NetworkSessionManager {
    /// Create the manager and hook deregistration/bearer-loss events.
    ///
    /// Registers unsolicited handlers for `+CREG` status changes and
    /// `+PDP: DEACT` so session loss is observed even mid-upload.
    pub fn new(
        session: Arc<CommandSession>,
        apn: impl Into<String>,
        backoff: Backoff,
        timeout: Duration,
    ) -> Self {
        let (tx, rx) = watch::channel(SessionState::Unregistered);
        let state = Arc::new(tx);

        let creg_state = Arc::clone(&state);
        session.register_unsolicited_handler("+CREG:", move |line| {
            let stat = line
                .strip_prefix("+CREG:")
                .and_then(|rest| rest.split(',').next())
                .and_then(|field| field.trim().parse::<u8>().ok());
            match stat {
                Some(1) | Some(5) => {
                    if *creg_state.borrow() != SessionState::DataSessionUp {
                        info!("network registration reported by modem");
                        creg_state.send_replace(SessionState::RegisteredNoData);
                    }
                }
                Some(stat) => {
                    warn!("network deregistration event (status {})", stat);
                    let next = if *creg_state.borrow() == SessionState::DataSessionUp {
                        SessionState::DataSessionError
                    } else {
                        SessionState::Unregistered
                    };
                    creg_state.send_replace(next);
                }
                None => debug!("ignoring unparseable +CREG event: {}", line),
            }
        });

        let pdp_state = Arc::clone(&state);
        session.register_unsolicited_handler("+PDP: DEACT", move |_line| {
            warn!("bearer deactivated by network");
            pdp_state.send_replace(SessionState::DataSessionError);
        });

        Self {
            session,
            state,
            state_rx: rx,
            backoff: Mutex::new(backoff),
            apn: apn.into(),
            timeout,
        }
    }

    /// Current session state
    pub fn current_state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Subscribe to session state transitions
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Whether uploads can run right now
    pub fn is_usable(&self) -> bool {
        self.current_state() == SessionState::DataSessionUp
    }

    /// The delay to wait before the next establishment attempt
    pub fn next_backoff(&self) -> Duration {
        self.backoff.lock().unwrap().next_delay()
    }

    /// Record a command failure observed by another component.
    ///
    /// Transport loss is fatal to the session and forces re-establishment.
    pub fn note_failure(&self, err: &CommandError) {
        if err.is_fatal() {
            warn!("transport failure, marking data session down: {}", err);
            self.state.send_replace(SessionState::DataSessionError);
        }
    }

    /// Bring the data session up if it is not already.
    ///
    /// Idempotent: returns immediately when the session is usable. On
    /// failure the state reflects where establishment stopped and the
    /// caller should wait [`next_backoff`](Self::next_backoff) before
    /// retrying.
    pub async fn ensure_session(&self) -> Result<(), SessionError> {
        if self.current_state() == SessionState::DataSessionUp {
            return Ok(());
        }

        self.state.send_replace(SessionState::Registering);

        let stat = match self.check_registration().await {
            Ok(stat) => stat,
            Err(e) => {
                self.fail_establishment(&e);
                return Err(e);
            }
        };
        if stat != 1 && stat != 5 {
            debug!("not registered yet (status {})", stat);
            return Err(SessionError::NotRegistered(stat));
        }
        self.state.send_replace(SessionState::RegisteredNoData);

        match self.open_bearer().await {
            Ok(()) => {
                info!("data session up (APN {})", self.apn);
                self.state.send_replace(SessionState::DataSessionUp);
                self.backoff.lock().unwrap().reset();
                Ok(())
            }
            Err(e) => {
                warn!("bearer activation failed: {}", e);
                self.state.send_replace(SessionState::DataSessionError);
                Err(e)
            }
        }
    }

    /// Close the bearer, best effort
    pub async fn teardown(&self) {
        let _ = self
            .session
            .send(&Command::new("AT+SAPBR=0,1").timeout(self.timeout))
            .await;
        self.state.send_replace(SessionState::Unregistered);
    }

    /// Transport loss during establishment kills the session outright;
    /// everything else leaves the state where establishment stopped
    fn fail_establishment(&self, err: &SessionError) {
        if matches!(err, SessionError::Command(c) if c.is_fatal()) {
            warn!("transport failure during establishment: {}", err);
            self.state.send_replace(SessionState::DataSessionError);
        }
    }

    async fn check_registration(&self) -> Result<u8, SessionError> {
        // The modem powers up with registration URCs off
        self.session
            .send(&Command::new("AT+CREG=1").timeout(self.timeout))
            .await?;

        let resp = self
            .session
            .send(
                &Command::new("AT+CREG?")
                    .expect_prefix("+CREG:")
                    .timeout(self.timeout),
            )
            .await?;

        resp.field_after("+CREG:")
            .and_then(|fields| fields.split(',').nth(1))
            .and_then(|stat| stat.trim().parse::<u8>().ok())
            .ok_or_else(|| SessionError::Protocol("unparseable +CREG response".to_string()))
    }

    async fn open_bearer(&self) -> Result<(), SessionError> {
        self.session
            .send(&Command::new("AT+SAPBR=3,1,\"CONTYPE\",\"GPRS\"").timeout(self.timeout))
            .await?;
        self.session
            .send(&Command::new(format!("AT+SAPBR=3,1,\"APN\",\"{}\"", self.apn)).timeout(self.timeout))
            .await?;

        // Opening an already-open bearer answers ERROR; the query below is
        // the source of truth either way
        let open = Command::new("AT+SAPBR=1,1").timeout(self.timeout * 5).retries(0);
        match self.session.send(&open).await {
            Ok(_) => {}
            Err(CommandError::ModemError(line)) => {
                debug!("bearer open rejected ({}), querying state", line);
            }
            Err(e) => return Err(e.into()),
        }

        let query = self
            .session
            .send(
                &Command::new("AT+SAPBR=2,1")
                    .expect_prefix("+SAPBR:")
                    .timeout(self.timeout),
            )
            .await?;

        let status = query
            .field_after("+SAPBR:")
            .and_then(|fields| fields.split(',').nth(1))
            .and_then(|s| s.trim().parse::<u8>().ok());

        match status {
            Some(1) => Ok(()),
            Some(other) => Err(SessionError::BearerFailed(format!(
                "bearer status {} after open",
                other
            ))),
            None => Err(SessionError::Protocol(
                "unparseable +SAPBR response".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modem::transport::mocks::{MockTransport, ScriptedRead};

    fn manager(reads: Vec<ScriptedRead>) -> NetworkSessionManager {
        let session = Arc::new(CommandSession::new(Box::new(MockTransport::new(reads))));
        NetworkSessionManager::new(
            session,
            "internet",
            Backoff::new(Duration::from_secs(5), Duration::from_secs(300)),
            Duration::from_millis(100),
        )
    }

    fn happy_path_reads() -> Vec<ScriptedRead> {
        vec![
            // AT+CREG=1 (URC enable)
            ScriptedRead::Line(b"OK"),
            // AT+CREG?
            ScriptedRead::Line(b"+CREG: 0,1"),
            ScriptedRead::Line(b"OK"),
            // CONTYPE, APN
            ScriptedRead::Line(b"OK"),
            ScriptedRead::Line(b"OK"),
            // AT+SAPBR=1,1
            ScriptedRead::Line(b"OK"),
            // AT+SAPBR=2,1
            ScriptedRead::Line(b"+SAPBR: 1,1,\"10.115.33.2\""),
            ScriptedRead::Line(b"OK"),
        ]
    }

    #[tokio::test]
    async fn test_ensure_session_brings_bearer_up() {
        let manager = manager(happy_path_reads());
        assert_eq!(manager.current_state(), SessionState::Unregistered);

        manager.ensure_session().await.unwrap();
        assert_eq!(manager.current_state(), SessionState::DataSessionUp);
        assert!(manager.is_usable());
    }

    #[tokio::test]
    async fn test_ensure_session_is_idempotent_when_up() {
        let manager = manager(happy_path_reads());
        manager.ensure_session().await.unwrap();

        // No scripted reads remain; issuing any command would time out,
        // so an immediate Ok proves the call was a no-op
        manager.ensure_session().await.unwrap();
        assert_eq!(manager.current_state(), SessionState::DataSessionUp);
    }

    #[tokio::test]
    async fn test_not_registered_leaves_registering_state() {
        let manager = manager(vec![
            ScriptedRead::Line(b"OK"),
            ScriptedRead::Line(b"+CREG: 0,2"),
            ScriptedRead::Line(b"OK"),
        ]);

        match manager.ensure_session().await.unwrap_err() {
            SessionError::NotRegistered(stat) => assert_eq!(stat, 2),
            other => panic!("Expected NotRegistered, got: {:?}", other),
        }
        assert_eq!(manager.current_state(), SessionState::Registering);
    }

    #[tokio::test]
    async fn test_bearer_failure_marks_data_session_error() {
        let manager = manager(vec![
            ScriptedRead::Line(b"OK"),
            ScriptedRead::Line(b"+CREG: 0,1"),
            ScriptedRead::Line(b"OK"),
            ScriptedRead::Line(b"OK"),
            ScriptedRead::Line(b"OK"),
            // open rejected, query reports bearer closed
            ScriptedRead::Line(b"ERROR"),
            ScriptedRead::Line(b"+SAPBR: 1,3"),
            ScriptedRead::Line(b"OK"),
        ]);

        match manager.ensure_session().await.unwrap_err() {
            SessionError::BearerFailed(_) => {}
            other => panic!("Expected BearerFailed, got: {:?}", other),
        }
        assert_eq!(manager.current_state(), SessionState::DataSessionError);
    }

    #[tokio::test]
    async fn test_pdp_deact_event_drops_session() {
        let mut reads = happy_path_reads();
        reads.push(ScriptedRead::Line(b"+PDP: DEACT"));
        reads.push(ScriptedRead::TimeOut);

        let manager = manager(reads);
        manager.ensure_session().await.unwrap();
        assert_eq!(manager.current_state(), SessionState::DataSessionUp);

        // The URC arrives while the link is idle
        Arc::clone(&manager.session)
            .pump_unsolicited(Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(manager.current_state(), SessionState::DataSessionError);
    }

    #[tokio::test]
    async fn test_creg_dereg_urc_while_up_marks_error() {
        let mut reads = happy_path_reads();
        reads.push(ScriptedRead::Line(b"+CREG: 0"));
        reads.push(ScriptedRead::TimeOut);

        let manager = manager(reads);
        manager.ensure_session().await.unwrap();

        Arc::clone(&manager.session)
            .pump_unsolicited(Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(manager.current_state(), SessionState::DataSessionError);
    }

    #[tokio::test]
    async fn test_transport_failure_during_establishment_marks_error() {
        // The link dies under the very first registration command
        let manager = manager(vec![ScriptedRead::Fail("link down")]);

        let err = manager.ensure_session().await.unwrap_err();
        assert!(matches!(&err, SessionError::Command(c) if c.is_fatal()));
        assert_eq!(manager.current_state(), SessionState::DataSessionError);
    }

    #[tokio::test]
    async fn test_transport_failure_forces_session_reset() {
        let manager = manager(happy_path_reads());
        manager.ensure_session().await.unwrap();

        manager.note_failure(&CommandError::TransportError("link reset".into()));
        assert_eq!(manager.current_state(), SessionState::DataSessionError);
    }

    #[tokio::test]
    async fn test_backoff_resets_on_success() {
        let manager = manager(happy_path_reads());

        // Burn a few backoff steps as failed attempts would
        assert_eq!(manager.next_backoff(), Duration::from_secs(5));
        assert_eq!(manager.next_backoff(), Duration::from_secs(10));

        manager.ensure_session().await.unwrap();
        assert_eq!(manager.next_backoff(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_non_fatal_failure_does_not_drop_session() {
        let manager = manager(happy_path_reads());
        manager.ensure_session().await.unwrap();

        manager.note_failure(&CommandError::Timeout { attempts: 3 });
        assert_eq!(manager.current_state(), SessionState::DataSessionUp);
    }
}
