//! Collector wire format and the modem-side HTTP client.
//!
//! A batch is POSTed as JSON; the collector answers with the highest
//! sequence number it accepted, or an explicit rejection reason:
//!
//! ```text
//! -> {"device_id":117,"samples":[{"seq":1,...},{"seq":2,...}]}
//! <- {"acknowledged_through":2}
//! <- {"rejected":"unknown device"}
//! ```
//!
//! The concrete client drives the SIM808 HTTP stack over the established
//! bearer, sharing the command session with every other component.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::UploadError;
use crate::gps::LocationSample;
use crate::modem::{Command, CommandSession};

/// Window the modem is given to complete one HTTP action
const HTTP_ACTION_TIMEOUT: Duration = Duration::from_secs(30);

/// One upload request
#[derive(Debug, Clone, Serialize)]
pub struct UploadBatch {
    pub device_id: u32,
    pub samples: Vec<LocationSample>,
}

impl UploadBatch {
    /// Highest sequence number contained in the batch
    pub fn highest_seq(&self) -> Option<u64> {
        self.samples.last().map(|s| s.seq)
    }
}

/// The collector's answer to an upload
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum CollectorResponse {
    Ack { acknowledged_through: u64 },
    Rejected { rejected: String },
}

/// Request/response contract with the remote collector
#[async_trait]
pub trait Collector: Send + Sync {
    async fn upload(&self, batch: &UploadBatch) -> Result<CollectorResponse, UploadError>;
}

/// HTTP POST through the SIM808 HTTP command stack
pub struct ModemHttpCollector {
    session: Arc<CommandSession>,
    endpoint: String,
    timeout: Duration,
}

impl ModemHttpCollector {
    pub fn new(session: Arc<CommandSession>, endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            session,
            endpoint: endpoint.into(),
            timeout,
        }
    }

    async fn post(&self, body: &str) -> Result<String, UploadError> {
        // A leftover HTTP context from an aborted upload makes HTTPINIT
        // fail; clear it first and ignore the result
        let _ = self
            .session
            .send(&Command::new("AT+HTTPTERM").timeout(self.timeout).retries(0))
            .await;

        self.session
            .send(&Command::new("AT+HTTPINIT").timeout(self.timeout))
            .await?;

        let result = self.post_inner(body).await;

        // Best-effort teardown regardless of outcome
        let _ = self
            .session
            .send(&Command::new("AT+HTTPTERM").timeout(self.timeout).retries(0))
            .await;

        result
    }

    async fn post_inner(&self, body: &str) -> Result<String, UploadError> {
        self.session
            .send(&Command::new("AT+HTTPPARA=\"CID\",1").timeout(self.timeout))
            .await?;
        self.session
            .send(
                &Command::new(format!("AT+HTTPPARA=\"URL\",\"{}\"", self.endpoint))
                    .timeout(self.timeout),
            )
            .await?;
        self.session
            .send(
                &Command::new("AT+HTTPPARA=\"CONTENT\",\"application/json\"")
                    .timeout(self.timeout),
            )
            .await?;

        // The modem prompts DOWNLOAD, then expects exactly `len` raw bytes
        self.session
            .send(
                &Command::new(format!("AT+HTTPDATA={},5000", body.len()))
                    .terminal("DOWNLOAD")
                    .timeout(self.timeout),
            )
            .await?;
        self.session.send(&Command::raw(body)).await?;

        let action = self
            .session
            .send(
                &Command::new("AT+HTTPACTION=1")
                    .terminal("+HTTPACTION:")
                    .timeout(HTTP_ACTION_TIMEOUT)
                    .retries(0),
            )
            .await?;

        let status = action
            .terminal()
            .strip_prefix("+HTTPACTION:")
            .and_then(|rest| rest.split(',').nth(1))
            .and_then(|s| s.trim().parse::<u16>().ok())
            .ok_or_else(|| {
                UploadError::MalformedResponse(format!(
                    "unparseable HTTPACTION result: {}",
                    action.terminal()
                ))
            })?;

        if status != 200 {
            return Err(UploadError::Rejected(format!("HTTP status {}", status)));
        }

        let read = self
            .session
            .send(&Command::new("AT+HTTPREAD").timeout(self.timeout))
            .await?;

        let response_body: String = read
            .lines()
            .iter()
            .filter(|l| !l.starts_with("+HTTPREAD:"))
            .cloned()
            .collect();

        debug!("collector answered {} byte(s)", response_body.len());
        Ok(response_body)
    }
}

#[async_trait]
impl Collector for ModemHttpCollector {
    async fn upload(&self, batch: &UploadBatch) -> Result<CollectorResponse, UploadError> {
        let body = serde_json::to_string(batch)
            .map_err(|e| UploadError::MalformedResponse(format!("serialize failed: {}", e)))?;

        let response_body = self.post(&body).await?;

        serde_json::from_str(&response_body).map_err(|e| {
            UploadError::MalformedResponse(format!("{} in: {}", e, response_body))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gps::FixQuality;
    use crate::modem::transport::mocks::{MockTransport, ScriptedRead};
    use chrono::{TimeZone, Utc};

    fn batch(seqs: &[u64]) -> UploadBatch {
        UploadBatch {
            device_id: 117,
            samples: seqs
                .iter()
                .map(|&seq| LocationSample {
                    seq,
                    timestamp: Utc.with_ymd_and_hms(2020, 3, 1, 12, 0, 0).unwrap(),
                    latitude: 22.55,
                    longitude: 114.068,
                    altitude: Some(97.4),
                    fix_quality: FixQuality::Fix3d,
                })
                .collect(),
        }
    }

    #[test]
    fn test_batch_serializes_with_device_id_and_ordered_samples() {
        let json = serde_json::to_value(batch(&[1, 2, 3])).unwrap();
        assert_eq!(json["device_id"], 117);
        assert_eq!(json["samples"].as_array().unwrap().len(), 3);
        assert_eq!(json["samples"][0]["seq"], 1);
        assert_eq!(json["samples"][2]["seq"], 3);
    }

    #[test]
    fn test_highest_seq() {
        assert_eq!(batch(&[1, 2, 3]).highest_seq(), Some(3));
        assert_eq!(batch(&[]).highest_seq(), None);
    }

    #[test]
    fn test_response_parses_ack_and_rejection() {
        let ack: CollectorResponse = serde_json::from_str("{\"acknowledged_through\":3}").unwrap();
        assert_eq!(ack, CollectorResponse::Ack { acknowledged_through: 3 });

        let rejected: CollectorResponse =
            serde_json::from_str("{\"rejected\":\"unknown device\"}").unwrap();
        assert_eq!(
            rejected,
            CollectorResponse::Rejected {
                rejected: "unknown device".to_string()
            }
        );

        assert!(serde_json::from_str::<CollectorResponse>("{\"nope\":1}").is_err());
    }

    fn http_happy_reads(response_body: &'static [u8]) -> Vec<ScriptedRead> {
        vec![
            // HTTPTERM (clearing leftover context answers ERROR)
            ScriptedRead::Line(b"ERROR"),
            // HTTPINIT
            ScriptedRead::Line(b"OK"),
            // CID, URL, CONTENT
            ScriptedRead::Line(b"OK"),
            ScriptedRead::Line(b"OK"),
            ScriptedRead::Line(b"OK"),
            // HTTPDATA prompt, then body accepted
            ScriptedRead::Line(b"DOWNLOAD"),
            ScriptedRead::Line(b"OK"),
            // HTTPACTION terminal
            ScriptedRead::Line(b"+HTTPACTION: 1,200,24"),
            // HTTPREAD
            ScriptedRead::Line(b"+HTTPREAD: 24"),
            ScriptedRead::Line(response_body),
            ScriptedRead::Line(b"OK"),
            // trailing HTTPTERM
            ScriptedRead::Line(b"OK"),
        ]
    }

    #[tokio::test]
    async fn test_modem_http_post_round_trip() {
        let session = Arc::new(CommandSession::new(Box::new(MockTransport::new(
            http_happy_reads(b"{\"acknowledged_through\":3}"),
        ))));
        let collector = ModemHttpCollector::new(
            Arc::clone(&session),
            "http://collector.example.com/api/v1/locations",
            Duration::from_millis(100),
        );

        let resp = collector.upload(&batch(&[1, 2, 3])).await.unwrap();
        assert_eq!(resp, CollectorResponse::Ack { acknowledged_through: 3 });
    }

    #[tokio::test]
    async fn test_http_error_status_is_rejection() {
        let mut reads = http_happy_reads(b"{}");
        // Replace the HTTPACTION terminal with a server error
        reads[7] = ScriptedRead::Line(b"+HTTPACTION: 1,503,0");
        reads.truncate(8);
        // trailing HTTPTERM
        reads.push(ScriptedRead::Line(b"OK"));

        let session = Arc::new(CommandSession::new(Box::new(MockTransport::new(reads))));
        let collector = ModemHttpCollector::new(
            session,
            "http://collector.example.com/api/v1/locations",
            Duration::from_millis(100),
        );

        match collector.upload(&batch(&[1])).await.unwrap_err() {
            UploadError::Rejected(reason) => assert!(reason.contains("503")),
            other => panic!("Expected Rejected, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_garbled_response_body_is_malformed() {
        let session = Arc::new(CommandSession::new(Box::new(MockTransport::new(
            http_happy_reads(b"not json at all"),
        ))));
        let collector = ModemHttpCollector::new(
            session,
            "http://collector.example.com/api/v1/locations",
            Duration::from_millis(100),
        );

        assert!(matches!(
            collector.upload(&batch(&[1])).await.unwrap_err(),
            UploadError::MalformedResponse(_)
        ));
    }
}
