use super::{HoldReason, LedgerQuery, MessageRecord, MessageStore};
use crate::constants::{
    CONTROL_IDS_DIR_NAME, RECORDS_DIR_NAME, RECORD_FILENAME, RELEASES_DIR_NAME,
};
use crate::{yaml, HieError, HieResult};
use chrono::{DateTime, Utc};
use hie_uuid::ShardableUuid;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// File-backed message ledger.
///
/// Layout under the ledger directory:
///
/// ```text
/// records/<s1>/<s2>/<uuid>/record.yaml
/// control_ids/<control id>            (contains the owning record id)
/// releases/<uuid>                      (present once a held record is released)
/// ```
///
/// Control-ID and release markers are created with `create_new`, so two records can never
/// claim the same control ID, and a held record is released at most once, even across
/// processes sharing the directory. Record files are replaced atomically.
#[derive(Debug)]
pub struct FileLedger {
    ledger_dir: PathBuf,
    update_lock: Mutex<()>,
}

impl FileLedger {
    /// Opens (creating if needed) a ledger rooted at `ledger_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`HieError::LedgerDirCreation`] if the directories cannot be created.
    pub fn open(ledger_dir: PathBuf) -> HieResult<Self> {
        for dir in [RECORDS_DIR_NAME, CONTROL_IDS_DIR_NAME, RELEASES_DIR_NAME] {
            fs::create_dir_all(ledger_dir.join(dir)).map_err(HieError::LedgerDirCreation)?;
        }
        Ok(Self {
            ledger_dir,
            update_lock: Mutex::new(()),
        })
    }

    pub fn ledger_dir(&self) -> &Path {
        &self.ledger_dir
    }

    fn records_dir(&self) -> PathBuf {
        self.ledger_dir.join(RECORDS_DIR_NAME)
    }

    fn record_path(&self, id: &ShardableUuid) -> PathBuf {
        id.sharded_dir(&self.records_dir()).join(RECORD_FILENAME)
    }

    fn marker_path(&self, record: &MessageRecord) -> PathBuf {
        self.ledger_dir
            .join(CONTROL_IDS_DIR_NAME)
            .join(record.control_id.to_string())
    }

    fn release_marker_path(&self, id: &ShardableUuid) -> PathBuf {
        self.ledger_dir.join(RELEASES_DIR_NAME).join(id.to_string())
    }

    /// Creates `marker` holding `contents`. `Ok(false)` means another writer got there first.
    fn create_marker(marker: &Path, contents: &str) -> HieResult<bool> {
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(marker)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(HieError::RecordWrite(e)),
        };

        if let Err(e) = file.write_all(contents.as_bytes()) {
            let _ = fs::remove_file(marker);
            return Err(HieError::RecordWrite(e));
        }
        Ok(true)
    }

    fn reserve_control_id(&self, record: &MessageRecord) -> HieResult<PathBuf> {
        let marker = self.marker_path(record);
        if !Self::create_marker(&marker, &record.id.to_string())? {
            return Err(HieError::ControlIdTaken(record.control_id.to_string()));
        }
        Ok(marker)
    }

    fn write_record(&self, record: &MessageRecord) -> HieResult<()> {
        let text = yaml::render(record)?;
        yaml::write_atomic(&self.record_path(&record.id), &text).map_err(HieError::RecordWrite)
    }

    fn read_record(path: &Path) -> HieResult<MessageRecord> {
        let text = fs::read_to_string(path).map_err(HieError::RecordRead)?;
        yaml::parse(&text, "message record")
    }

    fn update(
        &self,
        id: &ShardableUuid,
        apply: impl FnOnce(&mut MessageRecord) -> HieResult<()>,
    ) -> HieResult<MessageRecord> {
        let _guard = self.update_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut record = self.get(id)?;
        apply(&mut record)?;
        self.write_record(&record)?;
        Ok(record)
    }
}

impl MessageStore for FileLedger {
    fn insert(&self, record: &MessageRecord) -> HieResult<()> {
        let marker = self.reserve_control_id(record)?;

        let record_dir = record.id.sharded_dir(&self.records_dir());
        let result = match fs::create_dir_all(&record_dir) {
            Ok(()) if record_dir.join(RECORD_FILENAME).exists() => {
                Err(HieError::RecordWrite(std::io::Error::new(
                    ErrorKind::AlreadyExists,
                    format!("record {} already exists", record.id),
                )))
            }
            Ok(()) => self.write_record(record),
            Err(e) => Err(HieError::LedgerDirCreation(e)),
        };

        if let Err(e) = result {
            let _ = fs::remove_file(&marker);
            return Err(e);
        }

        tracing::debug!(
            record_id = %record.id,
            control_id = %record.control_id,
            status = %record.status,
            "ledger record inserted"
        );
        Ok(())
    }

    fn get(&self, id: &ShardableUuid) -> HieResult<MessageRecord> {
        let path = self.record_path(id);
        if !path.is_file() {
            return Err(HieError::RecordNotFound(*id));
        }
        Self::read_record(&path)
    }

    fn mark_sent(&self, id: &ShardableUuid, sent_at: DateTime<Utc>) -> HieResult<MessageRecord> {
        self.update(id, |record| record.mark_sent(sent_at))
    }

    fn mark_failed(
        &self,
        id: &ShardableUuid,
        error: &str,
        attempts: u32,
    ) -> HieResult<MessageRecord> {
        self.update(id, |record| record.mark_failed(error, attempts))
    }

    fn mark_held(&self, id: &ShardableUuid, reason: HoldReason) -> HieResult<MessageRecord> {
        self.update(id, |record| record.hold(reason))
    }

    fn claim_release(&self, id: &ShardableUuid, at: DateTime<Utc>) -> HieResult<MessageRecord> {
        let _guard = self.update_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut record = self.get(id)?;
        record.release(at)?;

        let marker = self.release_marker_path(id);
        if !Self::create_marker(&marker, &at.to_rfc3339())? {
            return Err(HieError::ReleaseClaimed(*id));
        }
        if let Err(e) = self.write_record(&record) {
            let _ = fs::remove_file(&marker);
            return Err(e);
        }

        tracing::debug!(record_id = %id, "held record released");
        Ok(record)
    }

    fn abandon_release(&self, id: &ShardableUuid) -> HieResult<()> {
        self.update(id, |record| {
            record.released_at = None;
            Ok(())
        })?;
        match fs::remove_file(self.release_marker_path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(HieError::RecordWrite(e)),
        }
    }

    fn query(&self, query: &LedgerQuery) -> HieResult<Vec<MessageRecord>> {
        let mut records = Vec::new();

        let s1_iter = match fs::read_dir(self.records_dir()) {
            Ok(it) => it,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(HieError::RecordRead(e)),
        };
        for s1 in s1_iter.flatten() {
            let s2_iter = match fs::read_dir(s1.path()) {
                Ok(it) => it,
                Err(_) => continue,
            };
            for s2 in s2_iter.flatten() {
                let id_iter = match fs::read_dir(s2.path()) {
                    Ok(it) => it,
                    Err(_) => continue,
                };
                for id_ent in id_iter.flatten() {
                    let path = id_ent.path().join(RECORD_FILENAME);
                    if !path.is_file() {
                        continue;
                    }
                    match Self::read_record(&path) {
                        Ok(record) if query.matches(&record) => records.push(record),
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(path = %path.display(), error = %e, "skipping unreadable ledger record");
                        }
                    }
                }
            }
        }

        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.control_id.to_string().cmp(&b.control_id.to_string()))
        });
        Ok(records)
    }
}
