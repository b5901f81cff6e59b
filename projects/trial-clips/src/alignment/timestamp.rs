use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Absolute wall-clock instant with microsecond precision, as written by the
/// trial recorder and the camera frame logs (`YYYY-MM-DD HH:MM:SS[.ffffff]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(NaiveDateTime);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid timestamp '{0}'")]
pub struct TimestampParseError(pub String);

impl Timestamp {
    /// Parses a recorder timestamp. A missing fractional part is read as
    /// `.000000`; fractions are right-padded to six digits, or truncated when
    /// longer.
    pub fn parse(raw: &str) -> Result<Self, TimestampParseError> {
        let trimmed = raw.trim();
        let err = || TimestampParseError(trimmed.to_string());

        let (whole, fraction) = match trimmed.split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (trimmed, ""),
        };
        if !fraction.chars().all(|c| c.is_ascii_digit()) {
            return Err(err());
        }

        let mut micros: String = fraction.chars().take(6).collect();
        while micros.len() < 6 {
            micros.push('0');
        }

        let normalized = format!("{}.{}", whole, micros);
        NaiveDateTime::parse_from_str(&normalized, FORMAT)
            .map(Timestamp)
            .map_err(|_| err())
    }

    #[cfg(test)]
    pub fn from_datetime(dt: NaiveDateTime) -> Self {
        Self(dt)
    }

    #[cfg(test)]
    pub fn as_datetime(&self) -> NaiveDateTime {
        self.0
    }

    /// Signed difference `self - other`.
    pub fn since(&self, other: Timestamp) -> TimeDelta {
        self.0.signed_duration_since(other.0)
    }

    /// Absolute distance in microseconds.
    pub fn distance_micros(&self, other: Timestamp) -> u64 {
        self.since(other)
            .num_microseconds()
            .map(|us| us.unsigned_abs())
            .unwrap_or(u64::MAX)
    }

    /// `self + millis`, or `None` when the offset is not finite or the
    /// result falls outside the representable calendar range.
    pub fn checked_offset_millis(&self, millis: f64) -> Option<Timestamp> {
        let micros = (millis * 1000.0).round();
        if !micros.is_finite() || micros.abs() >= i64::MAX as f64 {
            return None;
        }
        self.0
            .checked_add_signed(TimeDelta::microseconds(micros as i64))
            .map(Self)
    }

    #[cfg(test)]
    pub fn offset_millis(&self, millis: f64) -> Timestamp {
        self.checked_offset_millis(millis)
            .expect("offset within calendar range")
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(FORMAT))
    }
}

impl FromStr for Timestamp {
    type Err = TimestampParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timestamp::parse(s)
    }
}

/// Renders a signed time difference as seconds with six decimals, e.g.
/// `-0.005000`.
pub fn format_offset(delta: TimeDelta) -> String {
    let micros = delta.num_microseconds().unwrap_or(i64::MAX);
    let sign = if micros < 0 { "-" } else { "" };
    let abs = micros.unsigned_abs();
    format!("{}{}.{:06}", sign, abs / 1_000_000, abs % 1_000_000)
}

/// Inverse of [`format_offset`].
pub fn parse_offset(raw: &str) -> Result<TimeDelta, TimestampParseError> {
    let trimmed = raw.trim();
    let err = || TimestampParseError(trimmed.to_string());

    let (negative, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };
    let (secs, fraction) = body.split_once('.').unwrap_or((body, ""));
    if fraction.len() > 6 || !fraction.chars().all(|c| c.is_ascii_digit()) {
        return Err(err());
    }

    let secs: i64 = secs.parse().map_err(|_| err())?;
    let mut padded = fraction.to_string();
    while padded.len() < 6 {
        padded.push('0');
    }
    let frac: i64 = padded.parse().map_err(|_| err())?;

    let micros = secs * 1_000_000 + frac;
    Ok(TimeDelta::microseconds(if negative { -micros } else { micros }))
}
