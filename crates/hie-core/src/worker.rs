//! Background delivery worker.
//!
//! Dispatch never waits on the network: it hands a [`DeliveryJob`] to a [`DeliveryQueue`]
//! and returns. The worker task runs each job through the [`RetryOrchestrator`], at most
//! `max_concurrent` at a time. Dropping every queue handle lets the worker drain what is
//! already queued and finish; [`DeliveryWorker::shutdown`] waits for that.

use crate::retry::{DeliveryJob, RetryOrchestrator};
use hie_uuid::ShardableUuid;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

/// Why a job was not queued.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum EnqueueError {
    #[error("record {0} is already queued for delivery")]
    AlreadyQueued(ShardableUuid),
    #[error("delivery worker is not running")]
    WorkerStopped,
}

type InFlight = Arc<Mutex<HashSet<ShardableUuid>>>;

/// Handle for submitting delivery jobs. Cheap to clone.
#[derive(Clone, Debug)]
pub struct DeliveryQueue {
    sender: mpsc::UnboundedSender<DeliveryJob>,
    in_flight: InFlight,
}

impl DeliveryQueue {
    /// Queues `job` unless the same record is already queued or being delivered.
    pub fn enqueue(&self, job: DeliveryJob) -> Result<(), EnqueueError> {
        let record_id = job.record_id;
        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if !in_flight.insert(record_id) {
                return Err(EnqueueError::AlreadyQueued(record_id));
            }
        }

        if self.sender.send(job).is_err() {
            release(&self.in_flight, &record_id);
            return Err(EnqueueError::WorkerStopped);
        }
        Ok(())
    }
}

fn release(in_flight: &InFlight, record_id: &ShardableUuid) {
    in_flight
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(record_id);
}

/// The running worker task.
pub struct DeliveryWorker {
    handle: JoinHandle<()>,
}

impl DeliveryWorker {
    /// Starts the worker on the current tokio runtime.
    pub fn spawn(orchestrator: RetryOrchestrator, max_concurrent: usize) -> (DeliveryQueue, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let in_flight: InFlight = Arc::default();
        let limit = Arc::new(Semaphore::new(max_concurrent.max(1)));

        let handle = tokio::spawn(run(
            Arc::new(orchestrator),
            receiver,
            limit,
            Arc::clone(&in_flight),
        ));

        (DeliveryQueue { sender, in_flight }, Self { handle })
    }

    /// Waits for the worker to finish every queued job.
    ///
    /// Returns once all [`DeliveryQueue`] handles have been dropped and the queue is empty.
    pub async fn shutdown(self) {
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "delivery worker terminated abnormally");
        }
    }

    #[cfg(test)]
    pub(crate) async fn abort(self) {
        self.handle.abort();
        let _ = self.handle.await;
    }
}

async fn run(
    orchestrator: Arc<RetryOrchestrator>,
    mut receiver: mpsc::UnboundedReceiver<DeliveryJob>,
    limit: Arc<Semaphore>,
    in_flight: InFlight,
) {
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            job = receiver.recv() => {
                let Some(job) = job else { break };
                let orchestrator = Arc::clone(&orchestrator);
                let limit = Arc::clone(&limit);
                let in_flight = Arc::clone(&in_flight);

                tasks.spawn(async move {
                    if let Ok(_permit) = limit.acquire_owned().await {
                        match orchestrator.deliver(&job).await {
                            Ok(outcome) => {
                                tracing::debug!(record_id = %job.record_id, ?outcome, "delivery job finished");
                            }
                            Err(e) => {
                                tracing::error!(record_id = %job.record_id, error = %e, "delivery job could not complete");
                            }
                        }
                    }
                    release(&in_flight, &job.record_id);
                });
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => log_join(joined),
        }
    }

    tracing::info!(remaining = tasks.len(), "delivery queue closed, draining");
    while let Some(joined) = tasks.join_next().await {
        log_join(joined);
    }
    tracing::info!("delivery worker stopped");
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        tracing::error!(error = %e, "delivery task aborted");
    }
}
