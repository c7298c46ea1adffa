//! # HIE Core
//!
//! The clinical interoperability messaging pipeline: per-institution configuration, the
//! message ledger, delivery to the health information exchange with bounded retries, and
//! the dispatch entry point that ties them together.
//!
//! ## Flow
//!
//! 1. [`MessagingService::dispatch`] resolves the institution's [`config::ResolvedConfig`]
//!    and applies the send policy ([`dispatch::decide`]).
//! 2. The `hl7` crate renders the message under a fresh control ID.
//! 3. The [`ledger`] records it `PENDING` before any delivery attempt.
//! 4. If the policy allows, the [`worker`] runs the [`retry::RetryOrchestrator`], which
//!    writes exactly one terminal state (`SENT` or `FAILED`) back to the ledger.
//!
//! Process-wide settings live in [`RuntimeConfig`], resolved once at startup.

pub mod config;
pub mod constants;
pub mod delivery;
pub mod dispatch;
pub mod error;
pub mod ledger;
pub mod retry;
pub mod runtime;
pub mod worker;
mod yaml;

pub use dispatch::{DispatchOutcome, MessagingService, VisitEvent};
pub use error::{HieError, HieResult};
pub use runtime::RuntimeConfig;

use config::{ConfigResolver, ConfigStore};
use delivery::HttpDeliveryClient;
use hie_uuid::ControlIdGenerator;
use ledger::FileLedger;
use retry::RetryOrchestrator;
use std::sync::Arc;
use worker::DeliveryWorker;

/// Wires the file ledger, configuration store and HTTP delivery client into a running
/// pipeline. Must be called inside a tokio runtime.
///
/// Drop every clone of the returned service, then await [`DeliveryWorker::shutdown`] to
/// finish queued deliveries.
///
/// # Errors
///
/// Returns an error if the ledger directories cannot be created or the HTTP client cannot
/// be built.
pub fn start_pipeline(runtime: &RuntimeConfig) -> HieResult<(MessagingService, DeliveryWorker)> {
    let ledger = Arc::new(FileLedger::open(runtime.ledger_dir())?);
    let configs = Arc::new(ConfigStore::new(runtime.data_dir().to_path_buf()));
    let client = Arc::new(HttpDeliveryClient::new(
        runtime.endpoints().clone(),
        runtime.delivery_timeout(),
    )?);

    let orchestrator = RetryOrchestrator::new(client, ledger.clone(), runtime.backoff_unit());
    let (queue, worker) = DeliveryWorker::spawn(orchestrator, runtime.max_concurrent_deliveries());

    tracing::info!(
        data_dir = %runtime.data_dir().display(),
        test_endpoint = runtime.endpoints().test.is_some(),
        production_endpoint = runtime.endpoints().production.is_some(),
        "messaging pipeline started"
    );

    let service = MessagingService::new(
        ConfigResolver::new(configs),
        Arc::new(ControlIdGenerator::new()),
        ledger,
        queue,
    );
    Ok((service, worker))
}
