//! Bounded delivery retries with exponential backoff.
//!
//! [`RetryOrchestrator`] drives one record from `PENDING` to its terminal state: it calls
//! the [`DeliveryClient`] up to the record's retry budget, waiting `unit * 2^(n-1)` after
//! failed attempt `n`, and writes exactly one terminal transition to the ledger.

use crate::delivery::{DeliveryClient, DeliveryError, DeliveryRequest};
use crate::ledger::{MessageRecord, MessageStore};
use crate::{HieError, HieResult};
use chrono::Utc;
use hie_uuid::{ControlId, ShardableUuid};
use hl7::Environment;
use std::sync::Arc;
use std::time::Duration;

/// Wait after failed attempt `attempt` (1-based): `unit * 2^(attempt - 1)`.
///
/// Saturates instead of overflowing.
pub fn backoff(attempt: u32, unit: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    unit.saturating_mul(1u32 << exponent)
}

/// Everything needed to deliver one ledger record.
#[derive(Clone, Debug)]
pub struct DeliveryJob {
    pub record_id: ShardableUuid,
    pub message: Arc<str>,
    pub control_id: ControlId,
    pub environment: Environment,
    pub retry_budget: u32,
}

impl DeliveryJob {
    pub fn for_record(record: &MessageRecord, environment: Environment, retry_budget: u32) -> Self {
        Self {
            record_id: record.id,
            message: Arc::from(record.message.as_str()),
            control_id: record.control_id.clone(),
            environment,
            retry_budget,
        }
    }

    fn request(&self) -> DeliveryRequest {
        DeliveryRequest {
            message: Arc::clone(&self.message),
            control_id: self.control_id.clone(),
            environment: self.environment,
        }
    }
}

/// How a delivery job ended. The ledger already reflects it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent { attempts: u32 },
    Failed { attempts: u32, last_error: String },
}

pub struct RetryOrchestrator {
    client: Arc<dyn DeliveryClient>,
    store: Arc<dyn MessageStore>,
    backoff_unit: Duration,
}

impl RetryOrchestrator {
    pub fn new(
        client: Arc<dyn DeliveryClient>,
        store: Arc<dyn MessageStore>,
        backoff_unit: Duration,
    ) -> Self {
        Self {
            client,
            store,
            backoff_unit,
        }
    }

    /// Delivers `job`, retrying within its budget, and records the terminal state.
    ///
    /// A successful record keeps `retry_count` 0; a failed one records the number of
    /// attempts made and the last error.
    ///
    /// # Errors
    ///
    /// Returns [`HieError::InvalidInput`] for a zero budget (nothing is attempted), or a
    /// persistence error if the terminal transition cannot be written.
    pub async fn deliver(&self, job: &DeliveryJob) -> HieResult<DeliveryOutcome> {
        if job.retry_budget == 0 {
            return Err(HieError::InvalidInput(format!(
                "record {} has no delivery attempts available",
                job.record_id
            )));
        }

        let mut last_error = String::new();
        for attempt in 1..=job.retry_budget {
            match self.attempt(job).await {
                Ok(()) => {
                    self.store.mark_sent(&job.record_id, Utc::now())?;
                    tracing::info!(
                        record_id = %job.record_id,
                        control_id = %job.control_id,
                        attempt,
                        "message delivered"
                    );
                    return Ok(DeliveryOutcome::Sent { attempts: attempt });
                }
                Err(error) => {
                    last_error = error.to_string();
                    if attempt < job.retry_budget {
                        let delay = backoff(attempt, self.backoff_unit);
                        tracing::warn!(
                            record_id = %job.record_id,
                            attempt,
                            budget = job.retry_budget,
                            error = %error,
                            delay_ms = delay.as_millis() as u64,
                            "delivery attempt failed, retrying after delay"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        self.store
            .mark_failed(&job.record_id, &last_error, job.retry_budget)?;
        tracing::error!(
            record_id = %job.record_id,
            control_id = %job.control_id,
            attempts = job.retry_budget,
            error = %last_error,
            "message delivery failed after all attempts"
        );
        Ok(DeliveryOutcome::Failed {
            attempts: job.retry_budget,
            last_error,
        })
    }

    /// One call to the client on its own task, so a panic surfaces as a failure.
    async fn attempt(&self, job: &DeliveryJob) -> Result<(), DeliveryError> {
        let client = Arc::clone(&self.client);
        let request = job.request();

        match tokio::spawn(async move { client.deliver(&request).await }).await {
            Ok(result) => result,
            Err(join_error) => Err(DeliveryError::Panicked(panic_message(join_error))),
        }
    }
}

fn panic_message(join_error: tokio::task::JoinError) -> String {
    if !join_error.is_panic() {
        return join_error.to_string();
    }
    let payload = join_error.into_panic();
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_owned()
    }
}
