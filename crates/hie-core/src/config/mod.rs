//! Per-institution messaging configuration.
//!
//! An institution may store a [`MessagingConfiguration`] in which every field is optional.
//! [`ConfigResolver`] merges it with named defaults into a [`ResolvedConfig`] that the
//! dispatch path reads. A stored configuration that cannot be read or does not validate is
//! never fatal: the resolver falls back to defaults, turns auto-send off and records the
//! problem in [`ResolvedConfig::issues`]. The stored `enabled` switch is still honoured, and
//! an unreadable switch counts as disabled.

mod store;

pub use store::ConfigStore;

use crate::constants::{
    DEFAULT_PROTOCOL_VERSION, DEFAULT_RECEIVING_APPLICATION, DEFAULT_RECEIVING_FACILITY,
    DEFAULT_RETRY_BUDGET, MAX_RETRY_BUDGET,
};
use crate::{HieError, HieResult};
use hie_types::{Institution, NonEmptyText};
use hl7::{Environment, MessageEnvelope, MessageType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

/// Stored messaging configuration for one institution.
///
/// Absent fields take the defaults described on [`ResolvedConfig`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MessagingConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sending_application: Option<NonEmptyText>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sending_facility: Option<NonEmptyText>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiving_application: Option<NonEmptyText>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiving_facility: Option<NonEmptyText>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<Environment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<NonEmptyText>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_send: Option<bool>,
    /// Message types sent without operator review. Absent means every type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_send_types: Option<Vec<MessageType>>,
    /// Delivery attempts per message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_budget: Option<u32>,
}

impl MessagingConfiguration {
    /// Checks the constraints the type system does not carry.
    ///
    /// # Errors
    ///
    /// Returns [`HieError::InvalidConfiguration`] if the protocol version is not an HL7v2
    /// version, the retry budget exceeds [`MAX_RETRY_BUDGET`], or the allow-list repeats a
    /// message type.
    pub fn validate(&self) -> HieResult<()> {
        if let Some(version) = &self.protocol_version {
            let valid = version
                .as_str()
                .strip_prefix("2.")
                .is_some_and(|rest| {
                    !rest.is_empty() && rest.split('.').all(|p| p.parse::<u8>().is_ok())
                });
            if !valid {
                return Err(HieError::InvalidConfiguration(format!(
                    "protocol_version '{version}' is not an HL7v2 version"
                )));
            }
        }

        if let Some(budget) = self.retry_budget {
            if budget > MAX_RETRY_BUDGET {
                return Err(HieError::InvalidConfiguration(format!(
                    "retry_budget {budget} exceeds the maximum of {MAX_RETRY_BUDGET}"
                )));
            }
        }

        if let Some(types) = &self.auto_send_types {
            let unique: BTreeSet<_> = types.iter().collect();
            if unique.len() != types.len() {
                return Err(HieError::InvalidConfiguration(
                    "auto_send_types lists a message type more than once".into(),
                ));
            }
        }

        Ok(())
    }
}

/// Which message types may be sent without operator review.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoSendTypes {
    All,
    Only(BTreeSet<MessageType>),
}

impl AutoSendTypes {
    pub fn allows(&self, message_type: MessageType) -> bool {
        match self {
            Self::All => true,
            Self::Only(types) => types.contains(&message_type),
        }
    }
}

/// Effective messaging configuration for one institution.
///
/// Defaults: sending application is the institution code, sending facility the institution
/// name, receiving application `HIE_GATEWAY`, receiving facility `REGIONAL_HIE`, test
/// environment, version 2.5.1, enabled, auto-send on for every type, and a retry budget of 3.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResolvedConfig {
    pub institution_id: Uuid,
    pub sending_application: NonEmptyText,
    pub sending_facility: NonEmptyText,
    pub receiving_application: NonEmptyText,
    pub receiving_facility: NonEmptyText,
    pub environment: Environment,
    pub protocol_version: NonEmptyText,
    pub enabled: bool,
    pub auto_send: bool,
    pub auto_send_types: AutoSendTypes,
    pub retry_budget: u32,
    /// Problems found in the stored configuration. Non-empty means the configuration is
    /// flagged and auto-send is off.
    pub issues: Vec<String>,
}

impl ResolvedConfig {
    /// Merges `stored` over the defaults for `institution`.
    ///
    /// A stored configuration that fails validation is discarded and flagged.
    pub fn resolve(institution: &Institution, stored: Option<&MessagingConfiguration>) -> Self {
        let defaults = Self::defaults(institution);
        let Some(stored) = stored else {
            return defaults;
        };

        if let Err(e) = stored.validate() {
            let enabled = stored.enabled;
            return defaults.flagged(e.to_string(), enabled);
        }

        Self {
            institution_id: institution.id,
            sending_application: stored
                .sending_application
                .clone()
                .unwrap_or(defaults.sending_application),
            sending_facility: stored
                .sending_facility
                .clone()
                .unwrap_or(defaults.sending_facility),
            receiving_application: stored
                .receiving_application
                .clone()
                .unwrap_or(defaults.receiving_application),
            receiving_facility: stored
                .receiving_facility
                .clone()
                .unwrap_or(defaults.receiving_facility),
            environment: stored.environment.unwrap_or(defaults.environment),
            protocol_version: stored
                .protocol_version
                .clone()
                .unwrap_or(defaults.protocol_version),
            enabled: stored.enabled.unwrap_or(defaults.enabled),
            auto_send: stored.auto_send.unwrap_or(defaults.auto_send),
            auto_send_types: match &stored.auto_send_types {
                Some(types) => AutoSendTypes::Only(types.iter().copied().collect()),
                None => AutoSendTypes::All,
            },
            retry_budget: stored.retry_budget.unwrap_or(defaults.retry_budget),
            issues: Vec::new(),
        }
    }

    fn defaults(institution: &Institution) -> Self {
        Self {
            institution_id: institution.id,
            sending_application: institution.code.clone(),
            sending_facility: institution.name.clone(),
            receiving_application: default_text(DEFAULT_RECEIVING_APPLICATION),
            receiving_facility: default_text(DEFAULT_RECEIVING_FACILITY),
            environment: Environment::Test,
            protocol_version: default_text(DEFAULT_PROTOCOL_VERSION),
            enabled: true,
            auto_send: true,
            auto_send_types: AutoSendTypes::All,
            retry_budget: DEFAULT_RETRY_BUDGET,
            issues: Vec::new(),
        }
    }

    /// Defaults with auto-send off and `issue` recorded. `enabled` overrides the default
    /// switch when the stored one could be read.
    fn flagged(mut self, issue: String, enabled: Option<bool>) -> Self {
        self.enabled = enabled.unwrap_or(self.enabled);
        self.auto_send = false;
        self.issues.push(issue);
        self
    }

    pub fn is_flagged(&self) -> bool {
        !self.issues.is_empty()
    }

    /// The MSH identifiers for messages built under this configuration.
    pub fn envelope(&self) -> MessageEnvelope {
        MessageEnvelope {
            sending_application: self.sending_application.clone(),
            sending_facility: self.sending_facility.clone(),
            receiving_application: self.receiving_application.clone(),
            receiving_facility: self.receiving_facility.clone(),
            environment: self.environment,
            version: self.protocol_version.clone(),
        }
    }
}

fn default_text(value: &'static str) -> NonEmptyText {
    NonEmptyText::new(value).unwrap_or_else(|_| unreachable!("default {value:?} is non-empty"))
}

/// Resolves effective configuration from the configuration store.
#[derive(Clone)]
pub struct ConfigResolver {
    store: Arc<ConfigStore>,
}

impl ConfigResolver {
    pub fn new(store: Arc<ConfigStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    /// Effective configuration for `institution`.
    ///
    /// Never fails: an unreadable or invalid stored configuration yields flagged defaults
    /// that keep whatever `enabled` switch could still be read.
    pub fn resolve(&self, institution: &Institution) -> ResolvedConfig {
        match self.store.load(&institution.id) {
            Ok(stored) => ResolvedConfig::resolve(institution, stored.as_ref()),
            Err(e) => {
                tracing::warn!(
                    institution_id = %institution.id,
                    error = %e,
                    "messaging configuration unreadable, using defaults with auto-send off"
                );
                let enabled = self.store.enabled_switch(&institution.id);
                ResolvedConfig::defaults(institution).flagged(e.to_string(), enabled)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn text(s: &str) -> NonEmptyText {
        NonEmptyText::new(s).expect("non-empty")
    }

    fn institution() -> Institution {
        Institution {
            id: Uuid::new_v4(),
            code: text("NHS01"),
            name: text("North Hill School"),
        }
    }

    #[test]
    fn absent_configuration_resolves_to_defaults() {
        let inst = institution();
        let resolved = ResolvedConfig::resolve(&inst, None);

        assert_eq!(resolved.sending_application.as_str(), "NHS01");
        assert_eq!(resolved.sending_facility.as_str(), "North Hill School");
        assert_eq!(resolved.receiving_application.as_str(), "HIE_GATEWAY");
        assert_eq!(resolved.receiving_facility.as_str(), "REGIONAL_HIE");
        assert_eq!(resolved.environment, Environment::Test);
        assert_eq!(resolved.protocol_version.as_str(), "2.5.1");
        assert!(resolved.enabled);
        assert!(resolved.auto_send);
        assert_eq!(resolved.auto_send_types, AutoSendTypes::All);
        assert_eq!(resolved.retry_budget, 3);
        assert!(!resolved.is_flagged());
    }

    #[test]
    fn stored_fields_override_defaults_individually() {
        let inst = institution();
        let stored = MessagingConfiguration {
            receiving_facility: Some(text("STATE_HIE")),
            environment: Some(Environment::Production),
            auto_send_types: Some(vec![MessageType::ObservationResult]),
            retry_budget: Some(5),
            ..Default::default()
        };

        let resolved = ResolvedConfig::resolve(&inst, Some(&stored));

        assert_eq!(resolved.sending_application.as_str(), "NHS01");
        assert_eq!(resolved.receiving_facility.as_str(), "STATE_HIE");
        assert_eq!(resolved.environment, Environment::Production);
        assert_eq!(resolved.retry_budget, 5);
        assert!(resolved
            .auto_send_types
            .allows(MessageType::ObservationResult));
        assert!(!resolved.auto_send_types.allows(MessageType::AdmitUpdate));
        assert_eq!(resolved.envelope().environment, Environment::Production);
    }

    #[test]
    fn empty_allow_list_allows_nothing() {
        let stored = MessagingConfiguration {
            auto_send_types: Some(Vec::new()),
            ..Default::default()
        };
        let resolved = ResolvedConfig::resolve(&institution(), Some(&stored));

        for message_type in MessageType::ALL {
            assert!(!resolved.auto_send_types.allows(message_type));
        }
    }

    #[test]
    fn invalid_configuration_is_flagged_with_auto_send_off() {
        let stored = MessagingConfiguration {
            auto_send: Some(true),
            retry_budget: Some(MAX_RETRY_BUDGET + 1),
            receiving_facility: Some(text("IGNORED")),
            ..Default::default()
        };

        let resolved = ResolvedConfig::resolve(&institution(), Some(&stored));

        assert!(resolved.is_flagged());
        assert!(resolved.enabled);
        assert!(!resolved.auto_send);
        assert_eq!(resolved.receiving_facility.as_str(), "REGIONAL_HIE");
        assert!(resolved.issues[0].contains("retry_budget"));
    }

    #[test]
    fn invalid_configuration_keeps_messaging_disabled() {
        let stored = MessagingConfiguration {
            enabled: Some(false),
            retry_budget: Some(MAX_RETRY_BUDGET + 1),
            ..Default::default()
        };

        let resolved = ResolvedConfig::resolve(&institution(), Some(&stored));

        assert!(resolved.is_flagged());
        assert!(!resolved.enabled);
    }

    #[test]
    fn resolver_keeps_disable_switch_of_malformed_file() {
        let dir = TempDir::new().expect("tempdir");
        let store = Arc::new(ConfigStore::new(dir.path().to_path_buf()));
        let resolver = ConfigResolver::new(store.clone());
        std::fs::create_dir_all(store.institutions_dir()).expect("mkdir");

        let disabled = institution();
        std::fs::write(
            store.config_path(&disabled.id),
            "enabled: false\nretry_budget: lots\n",
        )
        .expect("write");
        let resolved = resolver.resolve(&disabled);
        assert!(resolved.is_flagged());
        assert!(!resolved.enabled);

        let unreadable = institution();
        std::fs::write(store.config_path(&unreadable.id), "enabled: [\n").expect("write");
        let resolved = resolver.resolve(&unreadable);
        assert!(resolved.is_flagged());
        assert!(!resolved.enabled);
    }

    #[test]
    fn validate_checks_protocol_version_and_duplicates() {
        let bad_version = MessagingConfiguration {
            protocol_version: Some(text("3.0")),
            ..Default::default()
        };
        assert!(bad_version.validate().is_err());

        let good_version = MessagingConfiguration {
            protocol_version: Some(text("2.3")),
            ..Default::default()
        };
        assert!(good_version.validate().is_ok());

        let duplicates = MessagingConfiguration {
            auto_send_types: Some(vec![MessageType::AdmitUpdate, MessageType::AdmitUpdate]),
            ..Default::default()
        };
        assert!(duplicates.validate().is_err());
    }

    #[test]
    fn resolver_flags_malformed_stored_file() {
        let dir = TempDir::new().expect("tempdir");
        let store = Arc::new(ConfigStore::new(dir.path().to_path_buf()));
        let inst = institution();

        std::fs::create_dir_all(store.institutions_dir()).expect("mkdir");
        std::fs::write(
            store.config_path(&inst.id),
            "auto_send: true\nauto_send_types: [ADT_A08_ONLY]\n",
        )
        .expect("write");

        let resolved = ConfigResolver::new(store).resolve(&inst);

        assert!(resolved.is_flagged());
        assert!(resolved.enabled);
        assert!(!resolved.auto_send);
        assert!(resolved.issues[0].contains("auto_send_types"));
    }

    #[test]
    fn resolver_reads_saved_configuration() {
        let dir = TempDir::new().expect("tempdir");
        let store = Arc::new(ConfigStore::new(dir.path().to_path_buf()));
        let inst = institution();
        let stored = MessagingConfiguration {
            auto_send: Some(false),
            ..Default::default()
        };
        store.save(&inst.id, &stored).expect("save");

        let resolved = ConfigResolver::new(store).resolve(&inst);

        assert!(!resolved.auto_send);
        assert!(!resolved.is_flagged());
    }
}
