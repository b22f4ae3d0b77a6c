//! Durations as they appear in service specs
//!
//! The Engine API encodes durations as integer nanoseconds. Stack files
//! written by hand usually carry Go-style strings (`"10s"`, `"1m30s"`), so
//! both forms are accepted on the way in and normalized before a spec is
//! submitted to the manager.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Failure to decode a duration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid duration {input:?}: {reason}")]
pub struct DurationError {
    pub input: String,
    pub reason: String,
}

/// A duration field of a service spec
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SpecDuration {
    /// Signed nanoseconds
    Nanos(i64),
    /// Go-style duration text
    Text(String),
}

impl SpecDuration {
    /// Decode to signed nanoseconds
    pub fn to_nanos(&self) -> std::result::Result<i64, DurationError> {
        match self {
            SpecDuration::Nanos(n) => Ok(*n),
            SpecDuration::Text(text) => parse_nanos(text),
        }
    }

    /// The same duration in Engine API form
    pub fn normalized(&self) -> std::result::Result<Self, DurationError> {
        self.to_nanos().map(SpecDuration::Nanos)
    }

    /// Whether the decoded value is negative
    pub fn is_negative(&self) -> std::result::Result<bool, DurationError> {
        self.to_nanos().map(|n| n < 0)
    }
}

impl From<i64> for SpecDuration {
    fn from(nanos: i64) -> Self {
        SpecDuration::Nanos(nanos)
    }
}

impl From<Duration> for SpecDuration {
    fn from(d: Duration) -> Self {
        SpecDuration::Nanos(i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
    }
}

impl std::fmt::Display for SpecDuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpecDuration::Nanos(n) => write!(f, "{}ns", n),
            SpecDuration::Text(t) => write!(f, "{}", t),
        }
    }
}

/// Parse a signed duration string into nanoseconds
pub fn parse_nanos(input: &str) -> std::result::Result<i64, DurationError> {
    let err = |reason: &str| DurationError {
        input: input.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(err("empty duration"));
    }

    let (negative, body) = match trimmed.as_bytes()[0] {
        b'-' => (true, &trimmed[1..]),
        b'+' => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    // A bare zero carries no unit
    if body == "0" {
        return Ok(0);
    }

    let parsed = humantime::parse_duration(body).map_err(|e| err(&e.to_string()))?;
    let nanos = i64::try_from(parsed.as_nanos()).map_err(|_| err("duration out of range"))?;

    Ok(if negative { -nanos } else { nanos })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_units() {
        assert_eq!(parse_nanos("10s").unwrap(), 10_000_000_000);
        assert_eq!(parse_nanos("250ms").unwrap(), 250_000_000);
        assert_eq!(parse_nanos("1m30s").unwrap(), 90_000_000_000);
        assert_eq!(parse_nanos("0").unwrap(), 0);
    }

    #[test]
    fn test_parse_signed() {
        assert_eq!(parse_nanos("-5s").unwrap(), -5_000_000_000);
        assert_eq!(parse_nanos("+2h").unwrap(), 7_200_000_000_000);
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_nanos("").is_err());
        assert!(parse_nanos("soon").is_err());
        assert!(parse_nanos("10 parsecs").is_err());
    }

    #[test]
    fn test_deserialize_both_forms() {
        let n: SpecDuration = serde_json::from_str("5000").unwrap();
        assert_eq!(n, SpecDuration::Nanos(5000));

        let t: SpecDuration = serde_json::from_str("\"5s\"").unwrap();
        assert_eq!(t.to_nanos().unwrap(), 5_000_000_000);
        assert_eq!(t.normalized().unwrap(), SpecDuration::Nanos(5_000_000_000));
    }

    #[test]
    fn test_negative_detection() {
        assert!(SpecDuration::Nanos(-1).is_negative().unwrap());
        assert!(!SpecDuration::Text("1s".to_string()).is_negative().unwrap());
        assert!(SpecDuration::Text("bogus".to_string()).is_negative().is_err());
    }
}
