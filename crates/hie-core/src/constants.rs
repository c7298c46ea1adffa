//! Constants used throughout the HIE core crate.
//!
//! Directory names, file names and the named defaults applied when an institution has no
//! stored messaging configuration.

/// Default directory for pipeline data when no explicit directory is configured.
pub const DEFAULT_DATA_DIR: &str = "hie_data";

/// Directory (under the data dir) holding the message ledger.
pub const LEDGER_DIR_NAME: &str = "ledger";

/// Directory (under the ledger dir) holding sharded message records.
pub const RECORDS_DIR_NAME: &str = "records";

/// Directory (under the ledger dir) holding control-ID reservation markers.
pub const CONTROL_IDS_DIR_NAME: &str = "control_ids";

/// Directory (under the ledger dir) holding one marker per released held record.
pub const RELEASES_DIR_NAME: &str = "releases";

/// Filename for a single message record.
pub const RECORD_FILENAME: &str = "record.yaml";

/// Directory (under the data dir) holding per-institution messaging configuration.
pub const INSTITUTIONS_DIR_NAME: &str = "institutions";

/// Receiving application used when an institution does not configure one.
pub const DEFAULT_RECEIVING_APPLICATION: &str = "HIE_GATEWAY";

/// Receiving facility used when an institution does not configure one.
pub const DEFAULT_RECEIVING_FACILITY: &str = "REGIONAL_HIE";

/// HL7 version used when an institution does not configure one.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2.5.1";

/// Delivery attempts per message when an institution does not configure a budget.
pub const DEFAULT_RETRY_BUDGET: u32 = 3;

/// Largest retry budget a configuration may request.
pub const MAX_RETRY_BUDGET: u32 = 10;

/// Default backoff time unit, in milliseconds.
pub const DEFAULT_BACKOFF_UNIT_MS: u64 = 1_000;

/// Default number of deliveries running at once.
pub const DEFAULT_MAX_CONCURRENT_DELIVERIES: usize = 8;

/// Default per-request timeout for the exchange endpoint, in seconds.
pub const DEFAULT_DELIVERY_TIMEOUT_SECS: u64 = 30;

/// Content type for ER7-encoded HL7v2 over HTTP.
pub const HL7_CONTENT_TYPE: &str = "x-application/hl7-v2+er7";
