//! AT command descriptors and response-line classification.
//!
//! A [`Command`] owns everything the session needs to drive one exchange:
//! the wire text, the tokens that terminate the response, an optional
//! expected payload prefix, the timeout window, and the retry budget.

use std::time::Duration;

/// Default per-command timeout
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Default retry budget (retries beyond the first attempt)
pub const DEFAULT_COMMAND_RETRIES: u32 = 2;

/// Modem error tokens recognized on any command
const ERROR_TOKENS: &[&str] = &["ERROR", "+CME ERROR:", "+CMS ERROR:"];

/// How a single response line relates to the pending command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    /// Terminal success token; the command is complete
    Terminal,
    /// Explicit modem error token; the command failed
    Error,
    /// Line matching the command's expected payload prefix
    Expected,
    /// Anything else; candidate for unsolicited dispatch
    Other,
}

/// One AT-style command with its response contract
#[derive(Debug, Clone)]
pub struct Command {
    text: String,
    /// Raw commands are written verbatim, without the CR/LF terminator
    /// (used for HTTP POST body bytes after a `DOWNLOAD` prompt)
    raw: bool,
    success_tokens: Vec<String>,
    expect_prefix: Option<String>,
    timeout: Duration,
    max_retries: u32,
}

impl Command {
    /// A normal AT command, terminated by CR/LF, expecting a final `OK`
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            raw: false,
            success_tokens: vec!["OK".to_string()],
            expect_prefix: None,
            timeout: DEFAULT_COMMAND_TIMEOUT,
            max_retries: DEFAULT_COMMAND_RETRIES,
        }
    }

    /// Raw bytes written verbatim (no CR/LF), still awaiting a final `OK`.
    ///
    /// Raw sends are never retried: replaying a partial body would
    /// desynchronize the modem's byte counter.
    pub fn raw(body: impl Into<String>) -> Self {
        Self {
            max_retries: 0,
            raw: true,
            ..Self::new(body)
        }
    }

    /// Replace the terminal success token (e.g. `DOWNLOAD`, `+HTTPACTION:`)
    pub fn terminal(mut self, token: impl Into<String>) -> Self {
        self.success_tokens = vec![token.into()];
        self
    }

    /// Expect payload lines starting with the given prefix.
    ///
    /// Lines carrying this prefix are attributed to this command even when
    /// an unsolicited handler is registered for the same prefix.
    pub fn expect_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.expect_prefix = Some(prefix.into());
        self
    }

    /// Override the per-attempt timeout window
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the retry budget
    pub fn retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn timeout_window(&self) -> Duration {
        self.timeout
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Bytes to put on the wire for this command
    pub fn wire_bytes(&self) -> Vec<u8> {
        if self.raw {
            self.text.as_bytes().to_vec()
        } else {
            let mut bytes = Vec::with_capacity(self.text.len() + 2);
            bytes.extend_from_slice(self.text.as_bytes());
            bytes.extend_from_slice(b"\r\n");
            bytes
        }
    }

    /// Whether the line is this command's own echo
    pub fn is_echo(&self, line: &str) -> bool {
        !self.raw && line == self.text
    }

    /// Classify a decoded response line against this command's contract
    pub fn classify(&self, line: &str) -> LineKind {
        if self
            .success_tokens
            .iter()
            .any(|t| line == t || line.starts_with(t.as_str()))
        {
            return LineKind::Terminal;
        }
        if ERROR_TOKENS.iter().any(|t| line.starts_with(t)) {
            return LineKind::Error;
        }
        match &self.expect_prefix {
            Some(prefix) if line.starts_with(prefix.as_str()) => LineKind::Expected,
            _ => LineKind::Other,
        }
    }
}

/// Payload lines collected for a completed command, plus its terminal line
#[derive(Debug, Clone)]
pub struct ResponseLines {
    lines: Vec<String>,
    terminal: String,
}

impl ResponseLines {
    pub fn new(lines: Vec<String>, terminal: impl Into<String>) -> Self {
        Self {
            lines,
            terminal: terminal.into(),
        }
    }

    /// All payload lines, in arrival order
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// The terminal line that completed the command (e.g. `OK`,
    /// `+HTTPACTION: 1,200,17`)
    pub fn terminal(&self) -> &str {
        &self.terminal
    }

    /// First payload line starting with the given prefix, with the prefix
    /// stripped and surrounding whitespace trimmed
    pub fn field_after(&self, prefix: &str) -> Option<&str> {
        self.lines
            .iter()
            .find_map(|l| l.strip_prefix(prefix))
            .map(str::trim)
    }
}
