//! Identifier utilities for the HIE messaging pipeline.
//!
//! Two kinds of identifier live here:
//!
//! - [`ShardableUuid`]: the ledger's record identifier. It uses a *canonical* representation
//!   of **32 lowercase hexadecimal characters** (no hyphens) and maps to a sharded directory
//!   `parent_dir/<u[0..2]>/<u[2..4]>/<u>/` so the ledger never grows one huge directory.
//! - [`ControlId`]: the HL7 message control ID (MSH-10). Every outbound message carries one,
//!   and the receiving exchange uses it for correlation and de-duplication, so it must be
//!   unique across every message this system ever builds.
//!
//! ## Control ID form
//! `YYYYMMDDHHMMSSmmm` (UTC, millisecond precision) + 4-digit process sequence + 8 lowercase
//! hex random characters, e.g. `202610191435220450007a3f09c1e`.
//!
//! The value is purely alphanumeric so it never needs HL7 escaping.

mod control_id;
mod service;

pub use control_id::{ControlId, ControlIdGenerator};
pub use service::{ShardableUuid, Uuid};

/// Error type for identifier operations.
#[derive(Debug, thiserror::Error)]
pub enum UuidError {
    /// Invalid input provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for identifier operations.
pub type UuidResult<T> = Result<T, UuidError>;
