//! # GPS Module
//!
//! Location acquisition through the modem's GPS engine.
//!
//! This module handles:
//! - Powering the GPS engine on and off (`AT+CGPSPWR`)
//! - Polling fix status (`AT+CGPSSTATUS?`) and location (`AT+CGPSINF=0`)
//! - Parsing the SIM808 field layout into decimal-degree samples
//! - Fix-quality validation and per-boot sequence numbering

pub mod reading;

pub use reading::{FixQuality, GpsReading, LocationSample};

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::CommandError;
use crate::modem::{Command, CommandSession};

/// GPS tracker: polls the modem and emits validated location samples.
///
/// Sequence numbers are monotonically increasing per boot and are consumed
/// only by accepted samples; rejected polls leave the counter untouched.
pub struct GpsTracker {
    session: Arc<CommandSession>,
    min_fix: FixQuality,
    timeout: Duration,
    next_seq: u64,
    last_quality: FixQuality,
}

impl GpsTracker {
    pub fn new(session: Arc<CommandSession>, min_fix: FixQuality, timeout: Duration) -> Self {
        Self {
            session,
            min_fix,
            timeout,
            next_seq: 1,
            last_quality: FixQuality::Unknown,
        }
    }

    /// Power on the GPS engine
    pub async fn power_on(&self) -> Result<(), CommandError> {
        self.session
            .send(&Command::new("AT+CGPSPWR=1").timeout(self.timeout))
            .await?;
        Ok(())
    }

    /// Power off the GPS engine
    pub async fn power_off(&self) -> Result<(), CommandError> {
        self.session
            .send(&Command::new("AT+CGPSPWR=0").timeout(self.timeout))
            .await?;
        Ok(())
    }

    /// Fix quality reported by the most recent poll
    pub fn last_fix_quality(&self) -> FixQuality {
        self.last_quality
    }

    /// Poll the modem once for a location sample.
    ///
    /// Returns `Ok(None)` when the fix quality is below the configured
    /// minimum or the response does not parse into a valid position; no
    /// sequence number is consumed in either case.
    ///
    /// # Errors
    ///
    /// Propagates command failures (timeout, modem error, transport error)
    /// so the caller can escalate transport loss to a session reset.
    pub async fn poll(&mut self) -> Result<Option<LocationSample>, CommandError> {
        let status = self
            .session
            .send(
                &Command::new("AT+CGPSSTATUS?")
                    .expect_prefix("+CGPSSTATUS:")
                    .timeout(self.timeout),
            )
            .await?;

        let quality = status
            .field_after("+CGPSSTATUS:")
            .map(FixQuality::from_status)
            .unwrap_or(FixQuality::Unknown);
        self.last_quality = quality;

        if quality < self.min_fix {
            debug!("fix quality {:?} below minimum {:?}", quality, self.min_fix);
            return Ok(None);
        }

        let inf = self
            .session
            .send(
                &Command::new("AT+CGPSINF=0")
                    .expect_prefix("+CGPSINF:")
                    .timeout(self.timeout),
            )
            .await?;

        let fields = match inf.field_after("+CGPSINF:") {
            Some(fields) => fields,
            None => {
                warn!("location query returned no +CGPSINF line");
                return Ok(None);
            }
        };

        let gps_reading = match GpsReading::parse(fields) {
            Ok(gps_reading) => gps_reading,
            Err(e) => {
                warn!("rejecting unparseable location response: {}", e);
                return Ok(None);
            }
        };

        if !gps_reading.in_valid_range() {
            warn!(
                "rejecting out-of-range position: {}, {}",
                gps_reading.latitude, gps_reading.longitude
            );
            return Ok(None);
        }

        let sample = LocationSample {
            seq: self.next_seq,
            timestamp: gps_reading.utc_time,
            latitude: gps_reading.latitude,
            longitude: gps_reading.longitude,
            altitude: Some(gps_reading.altitude),
            fix_quality: quality,
        };
        self.next_seq += 1;

        debug!(
            "sample #{}: {:.5}, {:.5} moving {:.1}m/s {}",
            sample.seq,
            sample.latitude,
            sample.longitude,
            gps_reading.speed,
            gps_reading.heading()
        );
        Ok(Some(sample))
    }
}
