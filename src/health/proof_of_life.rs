//! Heartbeat payload carried in a manager's work-item status blob
//!
//! ```text
//! ProofOfLife (Millisecs=1718031234567) (Timestamp=2024-06-10 14:53:54.567) (Version=1)
//! ```
//!
//! The version group is optional on input; payloads without it are read as
//! version 1.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

/// Prefix every heartbeat payload starts with
pub const PROOF_OF_LIFE_PREFIX: &str = "ProofOfLife ";

/// Payload format version written by this build
pub const PROOF_OF_LIFE_VERSION: u32 = 1;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Errors decoding a heartbeat payload
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProofOfLifeError {
    #[error("status blob does not carry a proof of life: {0:?}")]
    Missing(String),

    #[error("malformed proof of life {payload:?}: {reason}")]
    Malformed { payload: String, reason: String },

    #[error("unsupported proof of life version {0}")]
    UnsupportedVersion(u32),
}

/// Decoded heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProofOfLife {
    pub millis: i64,
    pub version: u32,
}

impl ProofOfLife {
    pub fn at(millis: i64) -> Self {
        Self {
            millis,
            version: PROOF_OF_LIFE_VERSION,
        }
    }

    /// Wall-clock time of the heartbeat (UTC)
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.millis).single()
    }

    /// Age of this heartbeat relative to `now_millis`
    pub fn age_millis(&self, now_millis: i64) -> i64 {
        now_millis - self.millis
    }

    /// Encode as the status-blob text
    pub fn format(&self) -> String {
        self.to_string()
    }

    /// Decode a status blob
    pub fn parse(payload: &str) -> Result<Self, ProofOfLifeError> {
        if !payload.starts_with(PROOF_OF_LIFE_PREFIX) {
            return Err(ProofOfLifeError::Missing(payload.to_string()));
        }

        let malformed = |reason: &str| ProofOfLifeError::Malformed {
            payload: payload.to_string(),
            reason: reason.to_string(),
        };

        let captures = pattern()
            .captures(payload)
            .ok_or_else(|| malformed("expected Millisecs and Timestamp groups"))?;

        let millis: i64 = captures[1]
            .parse()
            .map_err(|_| malformed("Millisecs is not an integer"))?;

        NaiveDateTime::parse_from_str(&captures[2], TIMESTAMP_FORMAT)
            .map_err(|_| malformed("Timestamp is not yyyy-MM-dd HH:mm:ss.SSS"))?;

        let version = match captures.get(3) {
            Some(v) => v
                .as_str()
                .parse()
                .map_err(|_| malformed("Version is not an integer"))?,
            None => 1,
        };
        if version > PROOF_OF_LIFE_VERSION {
            return Err(ProofOfLifeError::UnsupportedVersion(version));
        }

        Ok(Self { millis, version })
    }
}

impl fmt::Display for ProofOfLife {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let timestamp = self
            .timestamp()
            .map(|ts| ts.format(TIMESTAMP_FORMAT).to_string())
            .unwrap_or_default();
        write!(
            f,
            "{PROOF_OF_LIFE_PREFIX}(Millisecs={}) (Timestamp={}) (Version={})",
            self.millis, timestamp, self.version
        )
    }
}

fn pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^ProofOfLife \(Millisecs=(-?\d+)\) \(Timestamp=([^)]*)\)(?: \(Version=(\d+)\))?",
        )
        .expect("Invalid regex pattern")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_matches_wire_text() {
        let pol = ProofOfLife::at(1_718_031_234_567);
        assert_eq!(
            pol.format(),
            "ProofOfLife (Millisecs=1718031234567) (Timestamp=2024-06-10 14:53:54.567) (Version=1)"
        );
    }

    #[test]
    fn test_parse_without_version() {
        let pol = ProofOfLife::parse(
            "ProofOfLife (Millisecs=1718031234567) (Timestamp=2024-06-10 14:53:54.567)",
        )
        .unwrap();
        assert_eq!(pol.millis, 1_718_031_234_567);
        assert_eq!(pol.version, 1);
    }

    #[test]
    fn test_parse_formatted_value() {
        let pol = ProofOfLife::at(1_600_000_000_123);
        assert_eq!(ProofOfLife::parse(&pol.format()).unwrap(), pol);
    }

    #[test]
    fn test_missing_prefix() {
        assert!(matches!(
            ProofOfLife::parse("Started"),
            Err(ProofOfLifeError::Missing(_))
        ));
    }

    #[test]
    fn test_bad_timestamp_is_malformed() {
        let err = ProofOfLife::parse("ProofOfLife (Millisecs=12) (Timestamp=yesterday)")
            .unwrap_err();
        assert!(matches!(err, ProofOfLifeError::Malformed { .. }));
    }

    #[test]
    fn test_future_version_rejected() {
        let err = ProofOfLife::parse(
            "ProofOfLife (Millisecs=12) (Timestamp=1970-01-01 00:00:00.012) (Version=9)",
        )
        .unwrap_err();
        assert_eq!(err, ProofOfLifeError::UnsupportedVersion(9));
    }

    #[test]
    fn test_age() {
        assert_eq!(ProofOfLife::at(1_000).age_millis(46_000), 45_000);
    }
}
