//! Message types, processing environments and the header envelope.

use crate::{Hl7Error, Hl7Result};
use hie_types::NonEmptyText;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// The two outbound message types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// Encounter information without observations (`ADT^A08`).
    AdmitUpdate,
    /// Encounter with vital-sign observations (`ORU^R01`).
    ObservationResult,
}

impl MessageType {
    /// Every message type, in ledger order.
    pub const ALL: [MessageType; 2] = [MessageType::AdmitUpdate, MessageType::ObservationResult];

    /// Chooses the message type from assessment presence.
    pub fn for_visit(has_assessment: bool) -> Self {
        if has_assessment {
            Self::ObservationResult
        } else {
            Self::AdmitUpdate
        }
    }

    /// Ledger name, e.g. `ADMIT_UPDATE`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdmitUpdate => "ADMIT_UPDATE",
            Self::ObservationResult => "OBSERVATION_RESULT",
        }
    }

    /// MSH-9 value: message code, trigger event and message structure.
    pub fn msh_message_type(&self) -> &'static str {
        match self {
            Self::AdmitUpdate => "ADT^A08^ADT_A01",
            Self::ObservationResult => "ORU^R01^ORU_R01",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = Hl7Error;

    /// Parses a ledger name, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ADMIT_UPDATE" => Ok(Self::AdmitUpdate),
            "OBSERVATION_RESULT" => Ok(Self::ObservationResult),
            _ => Err(Hl7Error::InvalidInput(format!("unknown message type: {s}"))),
        }
    }
}

/// Processing environment, carried in MSH-11.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Test,
    Production,
}

impl Environment {
    /// The HL7 processing ID flag: `T` for test, `P` for production.
    pub fn processing_id(&self) -> &'static str {
        match self {
            Self::Test => "T",
            Self::Production => "P",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Test => "test",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = Hl7Error;

    fn from_str(s: &str) -> Hl7Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "test" | "t" => Ok(Self::Test),
            "production" | "prod" | "p" => Ok(Self::Production),
            _ => Err(Hl7Error::InvalidInput(format!("unknown environment: {s}"))),
        }
    }
}

/// Everything the `MSH` header needs besides the control ID and timestamp.
///
/// Built from an institution's resolved messaging configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageEnvelope {
    pub sending_application: NonEmptyText,
    pub sending_facility: NonEmptyText,
    pub receiving_application: NonEmptyText,
    pub receiving_facility: NonEmptyText,
    pub environment: Environment,
    pub version: NonEmptyText,
}
