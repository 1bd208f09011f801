//! SIM808 GPS response parsing.
//!
//! `AT+CGPSINF=0` answers with a single information line:
//!
//! ```text
//! +CGPSINF: <mode>,<longitude>,<latitude>,<altitude>,<UTC>,<TTFF>,<num>,<speed>,<course>
//! ```
//!
//! Coordinates arrive as degrees-and-minutes (`DDDMM.MMMMM` longitude,
//! `DDMM.MMMMM` latitude), UTC as `YYYYMMDDHHMMSS.000`, speed in knots.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Knots to meters per second
const KNOTS_TO_MS: f64 = 0.514_444_7;

/// Compass points for course-to-heading conversion
const DIRECTIONS: [&str; 8] = ["N", "NE", "E", "SE", "S", "SW", "W", "NW"];

/// GPS positioning confidence, ordered worst to best
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum FixQuality {
    #[serde(rename = "unknown")]
    Unknown,
    #[serde(rename = "no_fix")]
    NoFix,
    #[serde(rename = "fix_2d")]
    Fix2d,
    #[serde(rename = "fix_3d")]
    Fix3d,
}

impl FixQuality {
    /// Parse the `AT+CGPSSTATUS?` answer text (e.g. `Location 3D Fix`)
    pub fn from_status(status: &str) -> Self {
        if status.contains("3D Fix") {
            FixQuality::Fix3d
        } else if status.contains("2D Fix") {
            FixQuality::Fix2d
        } else if status.contains("Not Fix") {
            FixQuality::NoFix
        } else {
            FixQuality::Unknown
        }
    }

    /// Whether this quality counts as a usable lock
    pub fn is_locked(self) -> bool {
        self >= FixQuality::Fix2d
    }
}

/// A malformed `+CGPSINF` response
#[derive(Debug, Error)]
#[error("malformed GPS response: {0}")]
pub struct GpsParseError(String);

/// One decoded `+CGPSINF` information line
#[derive(Debug, Clone, PartialEq)]
pub struct GpsReading {
    /// Decimal degrees, WGS84
    pub longitude: f64,
    /// Decimal degrees, WGS84
    pub latitude: f64,
    /// Meters above sea level
    pub altitude: f64,
    pub utc_time: DateTime<Utc>,
    pub satellites_in_view: u32,
    /// Meters per second (modem reports knots)
    pub speed: f64,
    /// Course over ground in degrees
    pub course: f64,
}

impl GpsReading {
    /// Parse the comma-separated field list after the `+CGPSINF:` prefix
    pub fn parse(fields: &str) -> Result<Self, GpsParseError> {
        let parts: Vec<&str> = fields.split(',').map(str::trim).collect();
        if parts.len() != 9 {
            return Err(GpsParseError(format!(
                "expected 9 fields, got {}",
                parts.len()
            )));
        }

        // parts[0] is the info mode, parts[5] the time-to-first-fix
        let longitude = parse_longitude(parts[1])?;
        let latitude = parse_latitude(parts[2])?;
        let altitude = parse_f64(parts[3], "altitude")?;
        let utc_time = parse_utc_time(parts[4])?;
        let satellites_in_view = parts[6]
            .parse::<u32>()
            .map_err(|_| GpsParseError(format!("bad satellite count: {}", parts[6])))?;
        let speed = parse_f64(parts[7], "speed")? * KNOTS_TO_MS;
        let course = parse_f64(parts[8], "course")?;

        Ok(Self {
            longitude,
            latitude,
            altitude,
            utc_time,
            satellites_in_view,
            speed,
            course,
        })
    }

    /// Whether the position lies within valid WGS84 ranges
    pub fn in_valid_range(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Compass heading derived from the course
    pub fn heading(&self) -> &'static str {
        let sector = 360.0 / DIRECTIONS.len() as f64;
        let index = (self.course / sector).round() as usize % DIRECTIONS.len();
        DIRECTIONS[index]
    }
}

/// A validated, sequence-numbered location report.
///
/// Serialized as one record of the collector upload batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationSample {
    /// Monotonically increasing per device boot
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    pub fix_quality: FixQuality,
}

fn parse_f64(field: &str, name: &str) -> Result<f64, GpsParseError> {
    field
        .parse::<f64>()
        .map_err(|_| GpsParseError(format!("bad {}: {}", name, field)))
}

/// Parse `DDMM.MMMMM` latitude into decimal degrees
fn parse_latitude(field: &str) -> Result<f64, GpsParseError> {
    parse_coordinate(field, 2)
}

/// Parse `DDDMM.MMMMM` longitude into decimal degrees
fn parse_longitude(field: &str) -> Result<f64, GpsParseError> {
    parse_coordinate(field, 3)
}

/// Convert a degrees-and-minutes field with `deg_digits` degree digits.
///
/// The modem omits leading zeros, so the integer part is padded back to
/// `deg_digits + 2` characters before splitting.
fn parse_coordinate(field: &str, deg_digits: usize) -> Result<f64, GpsParseError> {
    let bad = || GpsParseError(format!("bad coordinate: {}", field));

    let (negative, unsigned) = match field.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, field),
    };

    let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, "0"));
    if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad());
    }

    let padded = format!("{:0>width$}", int_part, width = deg_digits + 2);
    if padded.len() > deg_digits + 2 {
        return Err(bad());
    }

    let degrees: f64 = padded[..deg_digits].parse().map_err(|_| bad())?;
    let minutes: f64 = format!("{}.{}", &padded[deg_digits..], frac_part)
        .parse()
        .map_err(|_| bad())?;

    let value = degrees + minutes / 60.0;
    Ok(if negative { -value } else { value })
}

/// Parse `YYYYMMDDHHMMSS.000` into a UTC timestamp
fn parse_utc_time(field: &str) -> Result<DateTime<Utc>, GpsParseError> {
    NaiveDateTime::parse_from_str(field, "%Y%m%d%H%M%S%.3f")
        .map(|naive| naive.and_utc())
        .map_err(|_| GpsParseError(format!("bad UTC time: {}", field)))
}
