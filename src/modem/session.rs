//! AT command session: one-in-flight request/response over the transport.
//!
//! The modem link is half duplex: only one command may await a response at
//! any time. Concurrent callers serialize through an async mutex whose
//! waiter queue models the pending-command queue. Response lines are
//! classified against the pending command's contract first; lines the
//! command does not claim are offered to the registered unsolicited-event
//! handlers before being kept as payload.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::command::{Command, LineKind, ResponseLines};
use super::transport::Transport;
use crate::error::CommandError;

type UnsolicitedCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Serialized AT command session over a [`Transport`]
pub struct CommandSession {
    io: tokio::sync::Mutex<Box<dyn Transport>>,
    handlers: std::sync::Mutex<Vec<(String, UnsolicitedCallback)>>,
}

impl CommandSession {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            io: tokio::sync::Mutex::new(transport),
            handlers: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Register a callback for unsolicited lines starting with `prefix`.
    ///
    /// Handlers run inline on the session task while a command is pending
    /// (or during [`pump_unsolicited`](Self::pump_unsolicited)); they must
    /// not block. Dispatching a handler does not reset the pending
    /// command's timeout.
    pub fn register_unsolicited_handler(
        &self,
        prefix: impl Into<String>,
        callback: impl Fn(&str) + Send + Sync + 'static,
    ) {
        let mut handlers = self.handlers.lock().unwrap();
        handlers.push((prefix.into(), Box::new(callback)));
    }

    /// Send one command and collect its response.
    ///
    /// Writes the framed command, then reads lines until a terminal token
    /// arrives or the timeout window elapses. Each retry rewrites the
    /// command and restarts the window. Undecodable bytes are discarded
    /// without resetting the timeout.
    ///
    /// # Errors
    ///
    /// - `Timeout`: no terminal response within the window, retries exhausted
    /// - `ModemError`: the modem answered with an explicit error token
    /// - `TransportError`: link-level failure; fatal to the current session
    pub async fn send(&self, cmd: &Command) -> Result<ResponseLines, CommandError> {
        let mut io = self.io.lock().await;

        let mut attempts = 0;
        loop {
            attempts += 1;
            debug!("-> {} (attempt {})", cmd.text(), attempts);
            io.write(&cmd.wire_bytes()).await?;

            match self.read_response(io.as_mut(), cmd).await? {
                Some(response) => return Ok(response),
                None => {
                    if attempts > cmd.max_retries() {
                        warn!(
                            "command {} timed out after {} attempt(s)",
                            cmd.text(),
                            attempts
                        );
                        return Err(CommandError::Timeout { attempts });
                    }
                    warn!("command {} timed out, retrying", cmd.text());
                }
            }
        }
    }

    /// Read lines for one attempt; `Ok(None)` means the window elapsed.
    async fn read_response(
        &self,
        io: &mut dyn Transport,
        cmd: &Command,
    ) -> Result<Option<ResponseLines>, CommandError> {
        let deadline = Instant::now() + cmd.timeout_window();
        let mut lines = Vec::new();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            let raw = match io.read_line(remaining).await? {
                Some(raw) => raw,
                None => return Ok(None),
            };

            let line = match std::str::from_utf8(&raw) {
                Ok(text) => text.trim(),
                Err(_) => {
                    debug!("discarding {} undecodable bytes", raw.len());
                    continue;
                }
            };

            if line.is_empty() || cmd.is_echo(line) {
                continue;
            }

            match cmd.classify(line) {
                LineKind::Terminal => {
                    debug!("<- {} ({} payload line(s))", line, lines.len());
                    return Ok(Some(ResponseLines::new(lines, line)));
                }
                LineKind::Error => {
                    warn!("modem error for {}: {}", cmd.text(), line);
                    return Err(CommandError::ModemError(line.to_string()));
                }
                LineKind::Expected => lines.push(line.to_string()),
                LineKind::Other => {
                    if !self.dispatch_unsolicited(line) {
                        lines.push(line.to_string());
                    }
                }
            }
        }
    }

    /// Drain unsolicited lines while no command is pending.
    ///
    /// Reads for at most `window`, offering every decoded line to the
    /// handler table. Lines no handler claims are discarded.
    pub async fn pump_unsolicited(&self, window: Duration) -> Result<(), CommandError> {
        let mut io = self.io.lock().await;
        let deadline = Instant::now() + window;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(());
            }

            let raw = match io.read_line(remaining).await? {
                Some(raw) => raw,
                None => return Ok(()),
            };

            if let Ok(text) = std::str::from_utf8(&raw) {
                let line = text.trim();
                if !line.is_empty() && !self.dispatch_unsolicited(line) {
                    debug!("discarding unclaimed line: {}", line);
                }
            }
        }
    }

    /// Offer a line to the handler table; true if a handler claimed it
    fn dispatch_unsolicited(&self, line: &str) -> bool {
        let handlers = self.handlers.lock().unwrap();
        for (prefix, callback) in handlers.iter() {
            if line.starts_with(prefix.as_str()) {
                debug!("unsolicited: {}", line);
                callback(line);
                return true;
            }
        }
        false
    }
}

impl std::fmt::Debug for CommandSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSession").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modem::transport::mocks::{MockTransport, ScriptedRead};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::{Arc, Mutex};

    fn session(reads: Vec<ScriptedRead>) -> CommandSession {
        CommandSession::new(Box::new(MockTransport::new(reads)))
    }

    #[tokio::test]
    async fn test_simple_command_collects_payload_until_ok() {
        let session = session(vec![
            ScriptedRead::Line(b"AT+CGPSSTATUS?"), // echo
            ScriptedRead::Line(b""),
            ScriptedRead::Line(b"+CGPSSTATUS: Location 3D Fix"),
            ScriptedRead::Line(b"OK"),
        ]);

        let cmd = Command::new("AT+CGPSSTATUS?").expect_prefix("+CGPSSTATUS:");
        let resp = session.send(&cmd).await.unwrap();

        assert_eq!(resp.lines(), &["+CGPSSTATUS: Location 3D Fix"]);
        assert_eq!(resp.terminal(), "OK");
    }

    #[tokio::test]
    async fn test_modem_error_token_fails_command() {
        let session = session(vec![ScriptedRead::Line(b"+CME ERROR: 107")]);

        let err = session.send(&Command::new("AT+SAPBR=1,1")).await.unwrap_err();
        match err {
            CommandError::ModemError(line) => assert!(line.contains("107")),
            other => panic!("Expected ModemError, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_after_retries_exhausted_never_hangs() {
        let session = session(vec![
            ScriptedRead::TimeOut,
            ScriptedRead::TimeOut,
            ScriptedRead::TimeOut,
        ]);

        let cmd = Command::new("AT").retries(2);
        let err = session.send(&cmd).await.unwrap_err();

        match err {
            CommandError::Timeout { attempts } => assert_eq!(attempts, 3),
            other => panic!("Expected Timeout, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_after_one_silent_window() {
        // First attempt times out, second attempt gets the OK
        let session = session(vec![ScriptedRead::TimeOut, ScriptedRead::Line(b"OK")]);
        let cmd = Command::new("AT").retries(2);
        assert!(session.send(&cmd).await.is_ok());
    }

    #[tokio::test]
    async fn test_transport_failure_propagates() {
        let session = session(vec![ScriptedRead::Fail("link down")]);

        let err = session.send(&Command::new("AT")).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_undecodable_bytes_discarded_before_terminal() {
        let session = session(vec![
            ScriptedRead::Line(b"\xff\xfe\x00garbage"),
            ScriptedRead::Line(b"OK"),
        ]);

        let resp = session.send(&Command::new("AT+CGPSINF=0")).await.unwrap();
        assert!(resp.lines().is_empty());
    }

    #[tokio::test]
    async fn test_unsolicited_line_dispatched_during_pending_command() {
        let session = session(vec![
            ScriptedRead::Line(b"+PDP: DEACT"),
            ScriptedRead::Line(b"+CGPSINF: 0,0,0,0,0,0,0,0,0"),
            ScriptedRead::Line(b"OK"),
        ]);

        let events: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        session.register_unsolicited_handler("+PDP:", move |line| {
            sink.lock().unwrap().push(line.to_string());
        });

        let cmd = Command::new("AT+CGPSINF=0").expect_prefix("+CGPSINF:");
        let resp = session.send(&cmd).await.unwrap();

        // The URC went to the handler, not into the command's payload
        assert_eq!(resp.lines(), &["+CGPSINF: 0,0,0,0,0,0,0,0,0"]);
        assert_eq!(events.lock().unwrap().as_slice(), &["+PDP: DEACT"]);
    }

    #[tokio::test]
    async fn test_expected_prefix_wins_over_handler_with_same_prefix() {
        let session = session(vec![
            ScriptedRead::Line(b"+CREG: 0,1"),
            ScriptedRead::Line(b"OK"),
        ]);

        let events: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        session.register_unsolicited_handler("+CREG:", move |line| {
            sink.lock().unwrap().push(line.to_string());
        });

        let cmd = Command::new("AT+CREG?").expect_prefix("+CREG:");
        let resp = session.send(&cmd).await.unwrap();

        assert_eq!(resp.lines(), &["+CREG: 0,1"]);
        assert!(events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pump_unsolicited_dispatches_idle_lines() {
        let session = session(vec![
            ScriptedRead::Line(b"+CREG: 0"),
            ScriptedRead::TimeOut,
        ]);

        let events: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        session.register_unsolicited_handler("+CREG:", move |line| {
            sink.lock().unwrap().push(line.to_string());
        });

        session
            .pump_unsolicited(Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(events.lock().unwrap().as_slice(), &["+CREG: 0"]);
    }

    /// Transport that panics if a second command is written while the
    /// first still awaits its terminal response.
    struct OneInFlightTransport {
        inflight: bool,
    }

    #[async_trait]
    impl Transport for OneInFlightTransport {
        async fn read_line(&mut self, _timeout: Duration) -> Result<Option<Bytes>, CommandError> {
            assert!(self.inflight, "read without a pending command");
            self.inflight = false;
            Ok(Some(Bytes::from_static(b"OK")))
        }

        async fn write(&mut self, _data: &[u8]) -> Result<(), CommandError> {
            assert!(
                !self.inflight,
                "second command written while one was in flight"
            );
            self.inflight = true;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_concurrent_senders_serialize_one_in_flight() {
        let session = Arc::new(CommandSession::new(Box::new(OneInFlightTransport {
            inflight: false,
        })));

        let mut tasks = Vec::new();
        for i in 0..8 {
            let session = Arc::clone(&session);
            tasks.push(tokio::spawn(async move {
                session.send(&Command::new(format!("AT+TEST={}", i))).await
            }));
        }

        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }
    }
}
