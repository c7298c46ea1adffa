//! HL7v2 wire support for the HIE messaging pipeline.
//!
//! This crate renders clinic visits into HL7v2 ER7 text (pipe-delimited segments separated
//! by carriage returns) and reads such text back into segments for inspection.
//!
//! This crate focuses on:
//! - the two outbound message types ([`MessageType`]) and their trigger events
//! - delimiter escaping of every text field
//! - mapping assessment measurements to coded `OBX` observations
//!
//! It knows nothing about delivery, persistence or per-institution policy; callers supply a
//! fully resolved [`MessageEnvelope`] and a control ID.

mod builder;
mod encoding;
mod observation;
mod parse;
mod types;

pub use builder::{BuildInput, RenderedMessage};
pub use encoding::{escape, format_date, format_timestamp, unescape};
pub use observation::{observations, Observation, ValueType};
pub use parse::{ParsedMessage, Segment};
pub use types::{Environment, MessageEnvelope, MessageType};

/// Segment terminator for ER7 encoding.
pub const SEGMENT_TERMINATOR: char = '\r';

/// Errors returned by the `hl7` crate.
#[derive(Debug, thiserror::Error)]
pub enum Hl7Error {
    #[error("field {field} contains control character U+{codepoint:04X} which cannot be escaped")]
    UnescapableCharacter { field: &'static str, codepoint: u32 },

    #[error("field {field} has a non-finite numeric value")]
    NonFiniteValue { field: &'static str },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("malformed message: {0}")]
    Parse(String),
}

/// Type alias for Results that can fail with an [`Hl7Error`].
pub type Hl7Result<T> = Result<T, Hl7Error>;

/// HL7 operations.
///
/// A zero-sized type used for namespacing; all methods are associated functions.
pub struct Hl7;

impl Hl7 {
    /// Render a visit event into an HL7v2 message.
    ///
    /// The message type follows assessment presence: no assessment gives an
    /// [`MessageType::AdmitUpdate`], an assessment gives [`MessageType::ObservationResult`].
    ///
    /// # Errors
    ///
    /// Returns [`Hl7Error`] if a field contains a character that cannot be escaped or a
    /// measurement is not a finite number.
    pub fn render(input: &BuildInput<'_>) -> Hl7Result<RenderedMessage> {
        builder::render(input)
    }

    /// Parse ER7 text into segments.
    ///
    /// # Errors
    ///
    /// Returns [`Hl7Error::Parse`] if the text does not start with an `MSH` header.
    pub fn parse(text: &str) -> Hl7Result<ParsedMessage> {
        ParsedMessage::parse(text)
    }
}
