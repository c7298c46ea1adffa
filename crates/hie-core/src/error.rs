use crate::ledger::MessageStatus;
use hie_uuid::ShardableUuid;

#[derive(Debug, thiserror::Error)]
pub enum HieError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid identifier: {0}")]
    Uuid(#[from] hie_uuid::UuidError),
    #[error("HL7 error: {0}")]
    Hl7(#[from] hl7::Hl7Error),
    #[error("invalid text: {0}")]
    Text(#[from] hie_types::TextError),

    #[error("failed to create ledger directory: {0}")]
    LedgerDirCreation(std::io::Error),
    #[error("failed to write message record: {0}")]
    RecordWrite(std::io::Error),
    #[error("failed to read message record: {0}")]
    RecordRead(std::io::Error),
    #[error("message record {0} not found")]
    RecordNotFound(ShardableUuid),
    #[error("control ID {0} is already recorded in the ledger")]
    ControlIdTaken(String),
    #[error("message record {0} was queued by dispatch and was never held")]
    NotHeld(ShardableUuid),
    #[error("message record {0} has already been released")]
    ReleaseClaimed(ShardableUuid),
    #[error("message record {record_id} cannot move from {from} to {to}")]
    InvalidTransition {
        record_id: ShardableUuid,
        from: MessageStatus,
        to: MessageStatus,
    },

    #[error("failed to serialize YAML: {0}")]
    YamlSerialization(serde_yaml::Error),
    #[error("failed to deserialize YAML: {0}")]
    YamlDeserialization(String),

    #[error("failed to read messaging configuration: {0}")]
    ConfigRead(std::io::Error),
    #[error("failed to write messaging configuration: {0}")]
    ConfigWrite(std::io::Error),
    #[error("invalid messaging configuration: {0}")]
    InvalidConfiguration(String),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(reqwest::Error),
}

pub type HieResult<T> = std::result::Result<T, HieError>;
