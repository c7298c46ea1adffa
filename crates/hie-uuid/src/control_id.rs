//! HL7 message control IDs.

use crate::{UuidError, UuidResult};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use std::sync::atomic::{AtomicU32, Ordering};
use std::{fmt, str::FromStr};

const TIMESTAMP_LEN: usize = 17;
const SEQUENCE_LEN: usize = 4;
const NONCE_LEN: usize = 8;
const SEQUENCE_MODULUS: u32 = 10_000;

/// A message control ID.
///
/// Format: `YYYYMMDDHHMMSSmmm` + `SSSS` + `xxxxxxxx` (timestamp, process sequence, random
/// nonce). 29 characters, digits and lowercase hex only.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ControlId {
    timestamp: DateTime<Utc>,
    sequence: u16,
    nonce: u32,
}

impl ControlId {
    /// Total length of the rendered identifier.
    pub const LEN: usize = TIMESTAMP_LEN + SEQUENCE_LEN + NONCE_LEN;

    /// Returns the generation time (millisecond precision).
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Returns the per-process sequence component.
    pub fn sequence(&self) -> u16 {
        self.sequence
    }
}

impl fmt::Display for ControlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{:04}{:08x}",
            self.timestamp.format("%Y%m%d%H%M%S%3f"),
            self.sequence,
            self.nonce
        )
    }
}

impl FromStr for ControlId {
    type Err = UuidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != Self::LEN || !s.is_ascii() {
            return Err(UuidError::InvalidInput(format!(
                "control ID must be {} ASCII characters, got: '{}'",
                Self::LEN,
                s
            )));
        }

        let (timestamp_part, rest) = s.split_at(TIMESTAMP_LEN);
        let (sequence_part, nonce_part) = rest.split_at(SEQUENCE_LEN);

        if !timestamp_part.bytes().all(|b| b.is_ascii_digit())
            || !sequence_part.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(UuidError::InvalidInput(format!(
                "control ID timestamp and sequence must be digits: '{}'",
                s
            )));
        }
        if !nonce_part
            .bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        {
            return Err(UuidError::InvalidInput(format!(
                "control ID nonce must be lowercase hex: '{}'",
                s
            )));
        }

        let (seconds_part, millis_part) = timestamp_part.split_at(14);
        let naive = NaiveDateTime::parse_from_str(seconds_part, "%Y%m%d%H%M%S").map_err(|e| {
            UuidError::InvalidInput(format!(
                "invalid control ID timestamp '{}': {}",
                timestamp_part, e
            ))
        })?;
        let millis: i64 = millis_part
            .parse()
            .map_err(|_| UuidError::InvalidInput(format!("invalid milliseconds in '{s}'")))?;
        let sequence: u16 = sequence_part
            .parse()
            .map_err(|_| UuidError::InvalidInput(format!("invalid sequence in '{s}'")))?;
        let nonce = u32::from_str_radix(nonce_part, 16)
            .map_err(|_| UuidError::InvalidInput(format!("invalid nonce in '{s}'")))?;

        Ok(Self {
            timestamp: DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc)
                + Duration::milliseconds(millis),
            sequence,
            nonce,
        })
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for ControlId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for ControlId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Generates [`ControlId`]s.
///
/// Safe to share between threads and tasks. Uniqueness within a process comes from the
/// millisecond timestamp plus a wrapping atomic sequence; the random nonce separates
/// independent processes that generate in the same millisecond.
#[derive(Debug, Default)]
pub struct ControlIdGenerator {
    sequence: AtomicU32,
}

impl ControlIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generates a fresh control ID.
    pub fn generate(&self) -> ControlId {
        let next = self.sequence.fetch_add(1, Ordering::Relaxed) % SEQUENCE_MODULUS;
        let now = Utc::now();
        let timestamp = now
            - Duration::nanoseconds(i64::from(now.timestamp_subsec_nanos() % 1_000_000));

        ControlId {
            timestamp,
            sequence: next as u16,
            nonce: rand::random(),
        }
    }

    /// Parses a previously generated control ID.
    pub fn parse(input: &str) -> UuidResult<ControlId> {
        input.parse()
    }
}
