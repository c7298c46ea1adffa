//! YAML parsing and atomic file writes shared by the ledger and configuration store.

use crate::{HieError, HieResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{self, Write};
use std::path::Path;

/// Parses YAML text into `T`, reporting the path of the first mismatching field.
pub(crate) fn parse<T: DeserializeOwned>(yaml_text: &str, what: &str) -> HieResult<T> {
    let deserializer = serde_yaml::Deserializer::from_str(yaml_text);

    serde_path_to_error::deserialize::<_, T>(deserializer).map_err(|err| {
        let path = err.path().to_string();
        let source = err.into_inner();
        let path = if path.is_empty() || path == "." {
            "<root>"
        } else {
            path.as_str()
        };
        HieError::YamlDeserialization(format!("{what} schema mismatch at {path}: {source}"))
    })
}

pub(crate) fn render<T: Serialize>(value: &T) -> HieResult<String> {
    serde_yaml::to_string(value).map_err(HieError::YamlSerialization)
}

/// Writes `contents` to `path` through a uniquely named sibling temporary file and a
/// rename.
///
/// Readers see either the previous file or the complete new one, and concurrent writers
/// never share a temporary file.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> io::Result<()> {
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut file = tempfile::Builder::new()
        .prefix(".")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    file.write_all(contents.as_bytes())?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}
