//! The message ledger.
//!
//! Every message the pipeline builds is recorded here, together with its delivery state.
//! A record starts `PENDING` and moves once, to `SENT` or `FAILED`; terminal records are
//! never modified again.

mod file;

pub use file::FileLedger;

use crate::{HieError, HieResult};
use chrono::{DateTime, Utc};
use hie_uuid::{ControlId, ShardableUuid};
use hl7::MessageType;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Delivery state of a message record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    Pending,
    Sent,
    Failed,
}

impl MessageStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Sent => "SENT",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for MessageStatus {
    type Err = HieError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "SENT" => Ok(Self::Sent),
            "FAILED" => Ok(Self::Failed),
            _ => Err(HieError::InvalidInput(format!(
                "unknown message status '{s}'"
            ))),
        }
    }
}

/// Why a built message was recorded but not queued.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "message_type", rename_all = "snake_case")]
pub enum HoldReason {
    AutoSendDisabled,
    TypeNotAllowed(MessageType),
    ConfigurationFlagged,
    NoRetryBudget,
    WorkerUnavailable,
}

impl fmt::Display for HoldReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AutoSendDisabled => f.write_str("auto-send is disabled"),
            Self::TypeNotAllowed(t) => write!(f, "{t} is not in the auto-send list"),
            Self::ConfigurationFlagged => f.write_str("messaging configuration has issues"),
            Self::NoRetryBudget => f.write_str("retry budget is 0"),
            Self::WorkerUnavailable => f.write_str("delivery worker is not running"),
        }
    }
}

/// One ledger entry: a built (or unbuildable) message and its delivery state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MessageRecord {
    pub id: ShardableUuid,
    pub message_type: MessageType,
    pub control_id: ControlId,
    pub student_id: Uuid,
    pub visit_id: Uuid,
    pub institution_id: Uuid,
    /// ER7 text. Empty when the message could not be built.
    pub message: String,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Delivery attempts made. Zero until the record fails.
    #[serde(default)]
    pub retry_count: u32,
    /// Set when dispatch recorded the message without queueing it. Only held records can
    /// be released.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hold_reason: Option<HoldReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released_at: Option<DateTime<Utc>>,
}

/// The clinical references every record carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordSubject {
    pub student_id: Uuid,
    pub visit_id: Uuid,
    pub institution_id: Uuid,
}

impl MessageRecord {
    /// A freshly built message awaiting delivery.
    pub fn pending(
        subject: RecordSubject,
        message_type: MessageType,
        control_id: ControlId,
        message: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ShardableUuid::new(),
            message_type,
            control_id,
            student_id: subject.student_id,
            visit_id: subject.visit_id,
            institution_id: subject.institution_id,
            message,
            status: MessageStatus::Pending,
            created_at,
            sent_at: None,
            error_message: None,
            retry_count: 0,
            hold_reason: None,
            released_at: None,
        }
    }

    /// A message that could not be built. It is never delivered.
    pub fn build_failed(
        subject: RecordSubject,
        message_type: MessageType,
        control_id: ControlId,
        error: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            status: MessageStatus::Failed,
            error_message: Some(error),
            ..Self::pending(subject, message_type, control_id, String::new(), created_at)
        }
    }

    /// Moves a pending record to `SENT`.
    ///
    /// # Errors
    ///
    /// Returns [`HieError::InvalidTransition`] if the record is already terminal.
    pub fn mark_sent(&mut self, sent_at: DateTime<Utc>) -> HieResult<()> {
        self.ensure_pending(MessageStatus::Sent)?;
        self.status = MessageStatus::Sent;
        self.sent_at = Some(sent_at);
        self.error_message = None;
        Ok(())
    }

    /// Moves a pending record to `FAILED` after `attempts` delivery attempts.
    ///
    /// # Errors
    ///
    /// Returns [`HieError::InvalidTransition`] if the record is already terminal.
    pub fn mark_failed(&mut self, error: &str, attempts: u32) -> HieResult<()> {
        self.ensure_pending(MessageStatus::Failed)?;
        self.status = MessageStatus::Failed;
        self.error_message = Some(error.to_owned());
        self.retry_count = attempts;
        Ok(())
    }

    /// Notes why a pending record was not queued.
    ///
    /// # Errors
    ///
    /// Returns [`HieError::InvalidTransition`] if the record is already terminal.
    pub fn hold(&mut self, reason: HoldReason) -> HieResult<()> {
        self.ensure_pending(MessageStatus::Pending)?;
        self.hold_reason = Some(reason);
        Ok(())
    }

    /// Marks a held pending record as released for delivery.
    ///
    /// # Errors
    ///
    /// Returns [`HieError::InvalidTransition`] if the record is terminal,
    /// [`HieError::NotHeld`] if dispatch already queued it, or [`HieError::ReleaseClaimed`]
    /// if it was released before.
    pub fn release(&mut self, at: DateTime<Utc>) -> HieResult<()> {
        self.ensure_pending(MessageStatus::Pending)?;
        if self.hold_reason.is_none() {
            return Err(HieError::NotHeld(self.id));
        }
        if self.released_at.is_some() {
            return Err(HieError::ReleaseClaimed(self.id));
        }
        self.released_at = Some(at);
        Ok(())
    }

    fn ensure_pending(&self, to: MessageStatus) -> HieResult<()> {
        if self.status.is_terminal() {
            return Err(HieError::InvalidTransition {
                record_id: self.id,
                from: self.status,
                to,
            });
        }
        Ok(())
    }
}

/// Filters for listing ledger records. Every set field must match.
///
/// `created_from` is inclusive and `created_to` exclusive.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LedgerQuery {
    pub institution_id: Option<Uuid>,
    pub student_id: Option<Uuid>,
    pub visit_id: Option<Uuid>,
    pub status: Option<MessageStatus>,
    pub message_type: Option<MessageType>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
}

impl LedgerQuery {
    pub fn matches(&self, record: &MessageRecord) -> bool {
        self.institution_id.is_none_or(|id| id == record.institution_id)
            && self.student_id.is_none_or(|id| id == record.student_id)
            && self.visit_id.is_none_or(|id| id == record.visit_id)
            && self.status.is_none_or(|s| s == record.status)
            && self.message_type.is_none_or(|t| t == record.message_type)
            && self.created_from.is_none_or(|from| record.created_at >= from)
            && self.created_to.is_none_or(|to| record.created_at < to)
    }
}

/// Durable storage for message records.
///
/// Implementations must keep control IDs unique across all records and must reject any
/// change to a terminal record.
pub trait MessageStore: Send + Sync {
    /// Stores a new record.
    ///
    /// # Errors
    ///
    /// Returns [`HieError::ControlIdTaken`] if another record already uses the control ID.
    fn insert(&self, record: &MessageRecord) -> HieResult<()>;

    fn get(&self, id: &ShardableUuid) -> HieResult<MessageRecord>;

    /// Marks a pending record as sent and returns the updated record.
    fn mark_sent(&self, id: &ShardableUuid, sent_at: DateTime<Utc>) -> HieResult<MessageRecord>;

    /// Marks a pending record as failed and returns the updated record.
    fn mark_failed(
        &self,
        id: &ShardableUuid,
        error: &str,
        attempts: u32,
    ) -> HieResult<MessageRecord>;

    /// Records why a pending record was not queued and returns the updated record.
    fn mark_held(&self, id: &ShardableUuid, reason: HoldReason) -> HieResult<MessageRecord>;

    /// Claims a held `PENDING` record for release and returns the updated record.
    ///
    /// At most one claim per record succeeds, across every process sharing the store.
    ///
    /// # Errors
    ///
    /// Returns [`HieError::NotHeld`] for records dispatch queued itself and
    /// [`HieError::ReleaseClaimed`] if the record was already released.
    fn claim_release(&self, id: &ShardableUuid, at: DateTime<Utc>) -> HieResult<MessageRecord>;

    /// Gives back a claim whose hand-off to the delivery worker failed.
    fn abandon_release(&self, id: &ShardableUuid) -> HieResult<()>;

    /// Records matching `query`, oldest first.
    fn query(&self, query: &LedgerQuery) -> HieResult<Vec<MessageRecord>>;
}
