//! JSON response bodies.

use hie_core::dispatch::DispatchOutcome;
use hie_core::ledger::MessageRecord;
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorRes {
    pub error: String,
}

impl ErrorRes {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// What dispatch or release did with a visit's message.
#[derive(Debug, Serialize, ToSchema)]
pub struct DispatchRes {
    /// `skipped`, `held`, `queued` or `build_failed`.
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hold_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&DispatchOutcome> for DispatchRes {
    fn from(outcome: &DispatchOutcome) -> Self {
        let empty = |outcome: &str| Self {
            outcome: outcome.to_owned(),
            record_id: None,
            control_id: None,
            hold_reason: None,
            error: None,
        };

        match outcome {
            DispatchOutcome::Skipped => empty("skipped"),
            DispatchOutcome::Held {
                record_id,
                control_id,
                reason,
            } => Self {
                record_id: Some(record_id.to_string()),
                control_id: Some(control_id.to_string()),
                hold_reason: Some(reason.to_string()),
                ..empty("held")
            },
            DispatchOutcome::Queued {
                record_id,
                control_id,
            } => Self {
                record_id: Some(record_id.to_string()),
                control_id: Some(control_id.to_string()),
                ..empty("queued")
            },
            DispatchOutcome::BuildFailed { record_id, error } => Self {
                record_id: Some(record_id.to_string()),
                error: Some(error.clone()),
                ..empty("build_failed")
            },
        }
    }
}

/// A ledger record as served over HTTP.
#[derive(Debug, Serialize, ToSchema)]
pub struct MessageRecordRes {
    pub id: String,
    /// `ADMIT_UPDATE` or `OBSERVATION_RESULT`.
    pub message_type: String,
    pub control_id: String,
    pub student_id: String,
    pub visit_id: String,
    pub institution_id: String,
    /// ER7 text with `\r` segment terminators. Empty when the build failed.
    pub message: String,
    /// `PENDING`, `SENT` or `FAILED`.
    pub status: String,
    /// RFC 3339.
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub retry_count: u32,
    /// Why dispatch left the record pending instead of queueing it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hold_reason: Option<String>,
}

impl From<&MessageRecord> for MessageRecordRes {
    fn from(record: &MessageRecord) -> Self {
        Self {
            id: record.id.to_string(),
            message_type: record.message_type.to_string(),
            control_id: record.control_id.to_string(),
            student_id: record.student_id.to_string(),
            visit_id: record.visit_id.to_string(),
            institution_id: record.institution_id.to_string(),
            message: record.message.clone(),
            status: record.status.to_string(),
            created_at: record.created_at.to_rfc3339(),
            sent_at: record.sent_at.map(|t| t.to_rfc3339()),
            error_message: record.error_message.clone(),
            retry_count: record.retry_count,
            hold_reason: record.hold_reason.map(|r| r.to_string()),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ListMessagesRes {
    pub messages: Vec<MessageRecordRes>,
}
