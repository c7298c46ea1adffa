use super::MessagingConfiguration;
use crate::constants::INSTITUTIONS_DIR_NAME;
use crate::{yaml, HieError, HieResult};
use hie_uuid::ShardableUuid;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

/// File-backed store of per-institution messaging configuration.
///
/// One YAML file per institution: `<data_dir>/institutions/<uuid>.yaml`. Saves through one
/// store are serialised.
#[derive(Debug)]
pub struct ConfigStore {
    institutions_dir: PathBuf,
    save_lock: Mutex<()>,
}

impl ConfigStore {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            institutions_dir: data_dir.join(INSTITUTIONS_DIR_NAME),
            save_lock: Mutex::new(()),
        }
    }

    pub fn institutions_dir(&self) -> &Path {
        &self.institutions_dir
    }

    pub fn config_path(&self, institution_id: &Uuid) -> PathBuf {
        let id = ShardableUuid::from_uuid(*institution_id);
        self.institutions_dir.join(format!("{id}.yaml"))
    }

    /// Loads the stored configuration, or `None` if the institution has none.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, does not match the configuration schema,
    /// or fails [`MessagingConfiguration::validate`].
    pub fn load(&self, institution_id: &Uuid) -> HieResult<Option<MessagingConfiguration>> {
        let path = self.config_path(institution_id);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(HieError::ConfigRead(e)),
        };

        let config: MessagingConfiguration = yaml::parse(&text, "messaging configuration")?;
        config.validate()?;
        Ok(Some(config))
    }

    /// Validates and stores `config`, replacing any previous configuration.
    ///
    /// # Errors
    ///
    /// Returns [`HieError::InvalidConfiguration`] if validation fails, leaving the stored
    /// configuration unchanged, or an I/O error if the file cannot be written.
    pub fn save(&self, institution_id: &Uuid, config: &MessagingConfiguration) -> HieResult<()> {
        config.validate()?;
        let _guard = self.save_lock.lock().unwrap_or_else(PoisonError::into_inner);

        fs::create_dir_all(&self.institutions_dir).map_err(HieError::ConfigWrite)?;
        let text = yaml::render(config)?;
        yaml::write_atomic(&self.config_path(institution_id), &text)
            .map_err(HieError::ConfigWrite)?;

        tracing::info!(institution_id = %institution_id, "messaging configuration saved");
        Ok(())
    }

    /// Reads only the `enabled` switch from a file that failed [`ConfigStore::load`].
    ///
    /// Returns `None` when the file is a YAML mapping without an `enabled` key. Returns
    /// `Some(false)` when the switch cannot be read, so a damaged file never re-enables an
    /// institution that had messaging switched off.
    pub fn enabled_switch(&self, institution_id: &Uuid) -> Option<bool> {
        let Ok(text) = fs::read_to_string(self.config_path(institution_id)) else {
            return Some(false);
        };
        match serde_yaml::from_str::<serde_yaml::Value>(&text) {
            Ok(serde_yaml::Value::Mapping(map)) => match map.get("enabled") {
                None => None,
                Some(serde_yaml::Value::Bool(enabled)) => Some(*enabled),
                Some(_) => Some(false),
            },
            Ok(serde_yaml::Value::Null) => None,
            _ => Some(false),
        }
    }
}
