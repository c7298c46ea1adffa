use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use hie_core::config::{ConfigResolver, ConfigStore, MessagingConfiguration, ResolvedConfig};
use hie_core::ledger::{FileLedger, LedgerQuery, MessageRecord, MessageStatus, MessageStore};
use hie_core::{start_pipeline, DispatchOutcome, RuntimeConfig, VisitEvent};
use hie_types::{Assessment, Institution};
use hie_uuid::{ControlIdGenerator, ShardableUuid};
use hl7::{BuildInput, Hl7, MessageType};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "hie")]
#[command(about = "Clinic visit messaging to the health information exchange")]
struct Cli {
    /// Data directory (overrides HIE_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the HL7 message a visit would produce, without recording it
    Render {
        /// Visit event file (YAML or JSON)
        event: PathBuf,
    },
    /// Record a visit's message and deliver it according to institution policy
    Dispatch {
        /// Visit event file (YAML or JSON)
        event: PathBuf,
    },
    /// List ledger records
    List {
        #[arg(long)]
        institution: Option<Uuid>,
        #[arg(long)]
        student: Option<Uuid>,
        #[arg(long)]
        visit: Option<Uuid>,
        /// PENDING, SENT or FAILED
        #[arg(long)]
        status: Option<MessageStatus>,
        /// ADMIT_UPDATE or OBSERVATION_RESULT
        #[arg(long = "type")]
        message_type: Option<MessageType>,
        /// Created at or after (RFC 3339)
        #[arg(long)]
        from: Option<DateTime<Utc>>,
        /// Created before (RFC 3339)
        #[arg(long)]
        to: Option<DateTime<Utc>>,
    },
    /// Show one ledger record
    Show {
        /// Record UUID
        record_id: String,
        /// Print the message one segment per line instead of the full record
        #[arg(long)]
        segments: bool,
    },
    /// Deliver a PENDING record that policy held back
    Release {
        /// Record UUID
        record_id: String,
        /// Institution file (YAML or JSON)
        #[arg(long)]
        institution: PathBuf,
    },
    /// Show an institution's stored messaging configuration
    ConfigShow {
        /// Institution UUID
        institution_id: Uuid,
        /// Institution file; when given, also print the resolved configuration
        #[arg(long)]
        institution: Option<PathBuf>,
    },
    /// Replace an institution's messaging configuration
    ConfigSet {
        /// Institution UUID
        institution_id: Uuid,
        /// Configuration file (YAML or JSON)
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("hie=warn".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut runtime = RuntimeConfig::from_env_values(|key| std::env::var(key).ok())?;
    if let Some(dir) = cli.data_dir {
        runtime = runtime.with_data_dir(dir);
    }

    match cli.command {
        Some(Commands::Render { event }) => render(&runtime, &event),
        Some(Commands::Dispatch { event }) => dispatch(&runtime, &event).await,
        Some(Commands::List {
            institution,
            student,
            visit,
            status,
            message_type,
            from,
            to,
        }) => {
            let query = LedgerQuery {
                institution_id: institution,
                student_id: student,
                visit_id: visit,
                status,
                message_type,
                created_from: from,
                created_to: to,
            };
            list(&runtime, &query)
        }
        Some(Commands::Show {
            record_id,
            segments,
        }) => show(&runtime, &record_id, segments),
        Some(Commands::Release {
            record_id,
            institution,
        }) => release(&runtime, &record_id, &institution).await,
        Some(Commands::ConfigShow {
            institution_id,
            institution,
        }) => config_show(&runtime, institution_id, institution.as_deref()),
        Some(Commands::ConfigSet {
            institution_id,
            config,
        }) => {
            let config: MessagingConfiguration = read_yaml(&config)?;
            ConfigStore::new(runtime.data_dir().to_path_buf()).save(&institution_id, &config)?;
            println!("Saved messaging configuration for institution {institution_id}");
            Ok(())
        }
        None => {
            println!("No command given. Use --help to see available commands.");
            Ok(())
        }
    }
}

fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn read_event(path: &Path) -> anyhow::Result<VisitEvent> {
    let mut event: VisitEvent = read_yaml(path)?;
    event.assessment = event.assessment.map(Assessment::with_derived_bmi);
    Ok(event)
}

fn open_ledger(runtime: &RuntimeConfig) -> anyhow::Result<FileLedger> {
    Ok(FileLedger::open(runtime.ledger_dir())?)
}

fn render(runtime: &RuntimeConfig, event: &Path) -> anyhow::Result<()> {
    let event = read_event(event)?;
    let resolver = ConfigResolver::new(Arc::new(ConfigStore::new(
        runtime.data_dir().to_path_buf(),
    )));
    let config = resolver.resolve(&event.institution);
    for issue in &config.issues {
        eprintln!("configuration issue: {issue}");
    }

    let control_id = ControlIdGenerator::new().generate();
    let rendered = Hl7::render(&BuildInput {
        student: &event.student,
        visit: &event.visit,
        institution: &event.institution,
        assessment: event.assessment.as_ref(),
        envelope: &config.envelope(),
        control_id: &control_id,
        generated_at: Utc::now(),
    })?;

    println!("{}", segment_lines(&rendered.text));
    Ok(())
}

async fn dispatch(runtime: &RuntimeConfig, event: &Path) -> anyhow::Result<()> {
    let event = read_event(event)?;
    let (service, worker) = start_pipeline(runtime)?;

    let outcome = service.dispatch(&event);
    drop(service);
    worker.shutdown().await;

    let outcome = outcome?;
    println!("{}", describe_outcome(&outcome));
    if let Some(record_id) = outcome_record(&outcome) {
        let record = open_ledger(runtime)?.get(&record_id)?;
        print_record_line(&record);
    }
    Ok(())
}

async fn release(
    runtime: &RuntimeConfig,
    record_id: &str,
    institution: &Path,
) -> anyhow::Result<()> {
    let record_id = ShardableUuid::parse(record_id)?;
    let institution: Institution = read_yaml(institution)?;
    let (service, worker) = start_pipeline(runtime)?;

    let result = service.release(&record_id, &institution);
    drop(service);
    worker.shutdown().await;

    result?;
    let record = open_ledger(runtime)?.get(&record_id)?;
    print_record_line(&record);
    Ok(())
}

fn list(runtime: &RuntimeConfig, query: &LedgerQuery) -> anyhow::Result<()> {
    let records = open_ledger(runtime)?.query(query)?;
    if records.is_empty() {
        println!("No messages found.");
    }
    for record in &records {
        print_record_line(record);
    }
    Ok(())
}

fn show(runtime: &RuntimeConfig, record_id: &str, segments: bool) -> anyhow::Result<()> {
    let record_id = ShardableUuid::parse(record_id)?;
    let record = open_ledger(runtime)?.get(&record_id)?;

    if segments {
        if record.message.is_empty() {
            bail!("record {record_id} has no message text (build failed)");
        }
        let parsed = Hl7::parse(&record.message)?;
        println!("{}", segment_lines(&record.message));
        eprintln!(
            "{} segments ({} OBX, {} NTE)",
            parsed.segments().len(),
            parsed.count("OBX"),
            parsed.count("NTE")
        );
        return Ok(());
    }

    print!("{}", serde_yaml::to_string(&record)?);
    Ok(())
}

fn config_show(
    runtime: &RuntimeConfig,
    institution_id: Uuid,
    institution: Option<&Path>,
) -> anyhow::Result<()> {
    let store = Arc::new(ConfigStore::new(runtime.data_dir().to_path_buf()));
    match store.load(&institution_id) {
        Ok(Some(config)) => print!("{}", serde_yaml::to_string(&config)?),
        Ok(None) => println!("No stored configuration; defaults apply."),
        Err(e) => println!("Stored configuration is unusable: {e}"),
    }

    if let Some(path) = institution {
        let institution: Institution = read_yaml(path)?;
        if institution.id != institution_id {
            bail!("institution file is for {}, not {institution_id}", institution.id);
        }
        let resolved: ResolvedConfig = ConfigResolver::new(store).resolve(&institution);
        println!("---\n# resolved");
        print!("{}", serde_yaml::to_string(&resolved)?);
    }
    Ok(())
}

fn describe_outcome(outcome: &DispatchOutcome) -> String {
    match outcome {
        DispatchOutcome::Skipped => "Messaging disabled for institution; nothing recorded.".into(),
        DispatchOutcome::Held {
            record_id, reason, ..
        } => format!("Recorded {record_id} as PENDING, held: {reason}"),
        DispatchOutcome::Queued { record_id, .. } => {
            format!("Recorded {record_id} and queued for delivery")
        }
        DispatchOutcome::BuildFailed { record_id, error } => {
            format!("Recorded {record_id} as FAILED, message could not be built: {error}")
        }
    }
}

fn outcome_record(outcome: &DispatchOutcome) -> Option<ShardableUuid> {
    match outcome {
        DispatchOutcome::Skipped => None,
        DispatchOutcome::Held { record_id, .. }
        | DispatchOutcome::Queued { record_id, .. }
        | DispatchOutcome::BuildFailed { record_id, .. } => Some(*record_id),
    }
}

fn print_record_line(record: &MessageRecord) {
    println!(
        "{}  {}  {:<18}  {:<7}  retries={}  control_id={}{}",
        record.id,
        record.created_at.to_rfc3339(),
        record.message_type,
        record.status,
        record.retry_count,
        record.control_id,
        record
            .error_message
            .as_deref()
            .map(|e| format!("  error={e}"))
            .unwrap_or_default()
    );
}

fn segment_lines(text: &str) -> String {
    text.split(hl7::SEGMENT_TERMINATOR)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use hie_core::dispatch::HoldReason;

    #[test]
    fn queued_outcome_does_not_claim_delivery() {
        let record_id = ShardableUuid::new();
        let line = describe_outcome(&DispatchOutcome::Queued {
            record_id,
            control_id: ControlIdGenerator::new().generate(),
        });

        assert_eq!(line, format!("Recorded {record_id} and queued for delivery"));
    }

    #[test]
    fn held_outcome_names_the_reason() {
        let line = describe_outcome(&DispatchOutcome::Held {
            record_id: ShardableUuid::new(),
            control_id: ControlIdGenerator::new().generate(),
            reason: HoldReason::NoRetryBudget,
        });

        assert!(line.ends_with("held: retry budget is 0"), "{line}");
    }
}
