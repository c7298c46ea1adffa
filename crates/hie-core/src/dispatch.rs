//! Turning finished clinic visits into ledger records and delivery jobs.
//!
//! [`MessagingService::dispatch`] is the single entry point the clinical side calls when a
//! visit is completed. It resolves the institution's configuration, applies the send
//! policy ([`decide`]), builds the HL7 message, records it, and queues delivery when the
//! policy allows. Only persistence failures reach the caller; everything else is recorded
//! and logged.

use crate::config::{ConfigResolver, ResolvedConfig};
use crate::ledger::{MessageRecord, MessageStatus, MessageStore, RecordSubject};
pub use crate::ledger::HoldReason;
use crate::retry::DeliveryJob;
use crate::worker::DeliveryQueue;
use crate::{HieError, HieResult};
use chrono::Utc;
use hie_types::{Assessment, Institution, Student, Visit};
use hie_uuid::{ControlId, ControlIdGenerator, ShardableUuid};
use hl7::{BuildInput, Hl7, MessageType, RenderedMessage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A completed visit, with everything needed to describe it to the exchange.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VisitEvent {
    pub student: Student,
    pub visit: Visit,
    pub institution: Institution,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assessment: Option<Assessment>,
}

impl VisitEvent {
    pub fn message_type(&self) -> MessageType {
        MessageType::for_visit(self.assessment.is_some())
    }

    fn subject(&self) -> RecordSubject {
        RecordSubject {
            student_id: self.student.id,
            visit_id: self.visit.id,
            institution_id: self.institution.id,
        }
    }

    /// The visit must belong to the student and institution it is sent with.
    fn check_consistency(&self) -> HieResult<()> {
        if self.visit.student_id != self.student.id {
            return Err(HieError::InvalidInput(format!(
                "visit {} belongs to student {}, not {}",
                self.visit.id, self.visit.student_id, self.student.id
            )));
        }
        if self.visit.institution_id != self.institution.id {
            return Err(HieError::InvalidInput(format!(
                "visit {} belongs to institution {}, not {}",
                self.visit.id, self.visit.institution_id, self.institution.id
            )));
        }
        Ok(())
    }
}

/// What the send policy says to do with a visit's message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendDecision {
    /// Messaging is disabled: build nothing, record nothing.
    Skip,
    /// Build and record as `PENDING`, but do not deliver.
    Hold(HoldReason),
    /// Build, record and deliver.
    Send,
}

/// The send policy. Pure: depends only on the resolved configuration and message type.
pub fn decide(config: &ResolvedConfig, message_type: MessageType) -> SendDecision {
    if !config.enabled {
        return SendDecision::Skip;
    }
    if config.is_flagged() {
        return SendDecision::Hold(HoldReason::ConfigurationFlagged);
    }
    if !config.auto_send {
        return SendDecision::Hold(HoldReason::AutoSendDisabled);
    }
    if !config.auto_send_types.allows(message_type) {
        return SendDecision::Hold(HoldReason::TypeNotAllowed(message_type));
    }
    if config.retry_budget == 0 {
        return SendDecision::Hold(HoldReason::NoRetryBudget);
    }
    SendDecision::Send
}

/// Result of dispatching one visit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// Messaging is disabled for the institution. Nothing was recorded.
    Skipped,
    /// Recorded as `PENDING` without delivery.
    Held {
        record_id: ShardableUuid,
        control_id: ControlId,
        reason: HoldReason,
    },
    /// Recorded as `PENDING` and handed to the delivery worker.
    Queued {
        record_id: ShardableUuid,
        control_id: ControlId,
    },
    /// The message could not be built. Recorded as `FAILED`.
    BuildFailed {
        record_id: ShardableUuid,
        error: String,
    },
}

/// The messaging pipeline entry point.
#[derive(Clone)]
pub struct MessagingService {
    resolver: ConfigResolver,
    ids: Arc<ControlIdGenerator>,
    store: Arc<dyn MessageStore>,
    queue: DeliveryQueue,
}

impl MessagingService {
    pub fn new(
        resolver: ConfigResolver,
        ids: Arc<ControlIdGenerator>,
        store: Arc<dyn MessageStore>,
        queue: DeliveryQueue,
    ) -> Self {
        Self {
            resolver,
            ids,
            store,
            queue,
        }
    }

    pub fn resolver(&self) -> &ConfigResolver {
        &self.resolver
    }

    pub fn store(&self) -> &dyn MessageStore {
        self.store.as_ref()
    }

    /// Records (and possibly queues) the HL7 message for a completed visit.
    ///
    /// Returns without waiting for delivery.
    ///
    /// # Errors
    ///
    /// Only persistence failures are returned. Build failures are recorded as `FAILED`
    /// records and reported through [`DispatchOutcome::BuildFailed`].
    pub fn dispatch(&self, event: &VisitEvent) -> HieResult<DispatchOutcome> {
        let config = self.resolver.resolve(&event.institution);
        let message_type = event.message_type();
        let decision = decide(&config, message_type);

        if decision == SendDecision::Skip {
            tracing::info!(
                institution_id = %event.institution.id,
                visit_id = %event.visit.id,
                "messaging disabled for institution, visit not sent"
            );
            return Ok(DispatchOutcome::Skipped);
        }

        let control_id = self.ids.generate();
        let created_at = Utc::now();

        let rendered = match self.render(event, &config, &control_id) {
            Ok(rendered) => rendered,
            Err(e) => {
                let record = MessageRecord::build_failed(
                    event.subject(),
                    message_type,
                    control_id,
                    e.to_string(),
                    created_at,
                );
                self.store.insert(&record)?;
                tracing::warn!(
                    record_id = %record.id,
                    visit_id = %event.visit.id,
                    error = %e,
                    "could not build HL7 message, recorded as failed"
                );
                return Ok(DispatchOutcome::BuildFailed {
                    record_id: record.id,
                    error: e.to_string(),
                });
            }
        };

        let mut record = MessageRecord::pending(
            event.subject(),
            rendered.message_type,
            control_id,
            rendered.text,
            created_at,
        );
        if let SendDecision::Hold(reason) = decision {
            record.hold(reason)?;
        }
        self.store.insert(&record)?;

        let outcome = match decision {
            SendDecision::Hold(reason) => held(&record, reason),
            _ => self.enqueue(&record, &config),
        };
        tracing::info!(
            record_id = %record.id,
            control_id = %record.control_id,
            message_type = %record.message_type,
            ?outcome,
            "visit dispatched"
        );
        Ok(outcome)
    }

    /// Hands a held `PENDING` record to the delivery worker on an operator's request.
    ///
    /// The institution's current configuration supplies the environment and retry budget.
    /// Records dispatch queued itself are never released, and a held record is released at
    /// most once.
    ///
    /// # Errors
    ///
    /// Returns an error if the record does not exist, is not `PENDING`, belongs to another
    /// institution, messaging is disabled, the retry budget is 0, the record was never held
    /// or was already released, or the worker refuses it.
    pub fn release(
        &self,
        record_id: &ShardableUuid,
        institution: &Institution,
    ) -> HieResult<DispatchOutcome> {
        let record = self.store.get(record_id)?;
        if record.status != MessageStatus::Pending {
            return Err(HieError::InvalidTransition {
                record_id: record.id,
                from: record.status,
                to: MessageStatus::Pending,
            });
        }
        if record.institution_id != institution.id {
            return Err(HieError::InvalidInput(format!(
                "record {} does not belong to institution {}",
                record.id, institution.id
            )));
        }

        let config = self.resolver.resolve(institution);
        if !config.enabled {
            return Err(HieError::InvalidInput(format!(
                "messaging is disabled for institution {}",
                institution.id
            )));
        }
        if config.retry_budget == 0 {
            return Err(HieError::InvalidInput(format!(
                "institution {} has a retry budget of 0",
                institution.id
            )));
        }

        let record = self.store.claim_release(record_id, Utc::now())?;
        let job = DeliveryJob::for_record(&record, config.environment, config.retry_budget);
        if let Err(e) = self.queue.enqueue(job) {
            if let Err(undo) = self.store.abandon_release(record_id) {
                tracing::error!(record_id = %record.id, error = %undo, "could not undo release claim");
            }
            return Err(HieError::InvalidInput(e.to_string()));
        }

        tracing::info!(record_id = %record.id, "pending message released for delivery");
        Ok(DispatchOutcome::Queued {
            record_id: record.id,
            control_id: record.control_id,
        })
    }

    fn render(
        &self,
        event: &VisitEvent,
        config: &ResolvedConfig,
        control_id: &ControlId,
    ) -> HieResult<RenderedMessage> {
        event.check_consistency()?;
        let envelope = config.envelope();
        let rendered = Hl7::render(&BuildInput {
            student: &event.student,
            visit: &event.visit,
            institution: &event.institution,
            assessment: event.assessment.as_ref(),
            envelope: &envelope,
            control_id,
            generated_at: Utc::now(),
        })?;
        Ok(rendered)
    }

    fn enqueue(&self, record: &MessageRecord, config: &ResolvedConfig) -> DispatchOutcome {
        let job = DeliveryJob::for_record(record, config.environment, config.retry_budget);
        match self.queue.enqueue(job) {
            Ok(()) => DispatchOutcome::Queued {
                record_id: record.id,
                control_id: record.control_id.clone(),
            },
            Err(e) => {
                tracing::error!(
                    record_id = %record.id,
                    error = %e,
                    "could not queue delivery, message left pending"
                );
                if let Err(e) = self.store.mark_held(&record.id, HoldReason::WorkerUnavailable) {
                    tracing::warn!(record_id = %record.id, error = %e, "could not record hold reason");
                }
                held(record, HoldReason::WorkerUnavailable)
            }
        }
    }
}

fn held(record: &MessageRecord, reason: HoldReason) -> DispatchOutcome {
    DispatchOutcome::Held {
        record_id: record.id,
        control_id: record.control_id.clone(),
        reason,
    }
}
