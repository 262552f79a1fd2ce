//! The checkpoint ledger shared by all workers of a run.
//!
//! `checkpoint.json` maps each document identifier to the outcome of its
//! latest processing attempt. Workers in different processes update it
//! concurrently: every update takes an exclusive lock on the `.lock` sidecar,
//! re-reads the file, sets one entry and rewrites the whole file through a
//! temporary file and a rename. There is no in-memory copy shared between
//! writers; the lock is the only coordination.

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Format of the `timestamp` field, in local time.
pub const TIMESTAMP_FORMAT: &str = "%d-%m-%YT%H:%M:%S";

#[derive(Debug, Error)]
pub enum CheckpointError {
    /// The ledger exists but is not valid JSON. Never recovered automatically.
    #[error("Corrupted checkpoint file detected: {}. Please resolve the issue.", path.display())]
    Corrupted {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("checkpoint io on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize checkpoint: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Outcome of one processing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointStatus {
    Done,
    Error,
}

/// One document's row in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub status: CheckpointStatus,
    #[serde(rename = "word count", default)]
    pub word_count: Option<usize>,
    #[serde(rename = "num pages", default)]
    pub num_pages: Option<usize>,
    #[serde(rename = "document-level confidence", default)]
    pub document_confidence: Option<f32>,
    #[serde(rename = "time taken (s)", default)]
    pub time_taken: f64,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub error: Option<String>,
}

impl CheckpointEntry {
    /// Entry for a successfully processed document, stamped now.
    pub fn done(word_count: usize, num_pages: usize, confidence: f32, time_taken: f64) -> Self {
        Self {
            status: CheckpointStatus::Done,
            word_count: Some(word_count),
            num_pages: Some(num_pages),
            document_confidence: Some(confidence),
            time_taken,
            timestamp: now_timestamp(),
            error: None,
        }
    }

    /// Entry for a failed attempt, stamped now.
    pub fn failed(error: impl Into<String>, time_taken: f64) -> Self {
        Self {
            status: CheckpointStatus::Error,
            word_count: None,
            num_pages: None,
            document_confidence: None,
            time_taken,
            timestamp: now_timestamp(),
            error: Some(error.into()),
        }
    }

    pub fn is_done(&self) -> bool {
        self.status == CheckpointStatus::Done
    }
}

fn now_timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Full ledger contents, ordered by document identifier.
pub type Checkpoint = BTreeMap<String, CheckpointEntry>;

/// Handle on a checkpoint file and its lock sidecar.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_name = path.file_name().unwrap_or_default().to_os_string();
        lock_name.push(".lock");
        let lock_path = path.with_file_name(lock_name);
        Self { path, lock_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Parses the ledger. A missing file is an empty ledger.
    ///
    /// # Errors
    ///
    /// [`CheckpointError::Corrupted`] if the file exists but does not parse.
    pub fn read(&self) -> Result<Checkpoint, CheckpointError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Checkpoint::new()),
            Err(source) => {
                return Err(CheckpointError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        serde_json::from_slice(&bytes).map_err(|source| CheckpointError::Corrupted {
            path: self.path.clone(),
            source,
        })
    }

    /// Identifiers whose latest attempt succeeded.
    pub fn completed_ids(&self) -> Result<HashSet<String>, CheckpointError> {
        Ok(self
            .read()?
            .into_iter()
            .filter(|(_, entry)| entry.is_done())
            .map(|(id, _)| id)
            .collect())
    }

    /// Sets the entry for `document_id`, merging with concurrent writers.
    pub fn update(&self, document_id: &str, entry: CheckpointEntry) -> Result<(), CheckpointError> {
        let lock = self.acquire_lock()?;

        let result = self.read().and_then(|mut checkpoint| {
            checkpoint.insert(document_id.to_string(), entry);
            self.write_atomic(&checkpoint)
        });

        let _ = FileExt::unlock(&lock);
        debug!("Checkpoint updated for {}", document_id);
        result
    }

    fn io_error(&self, path: &Path, source: io::Error) -> CheckpointError {
        CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn acquire_lock(&self) -> Result<File, CheckpointError> {
        if let Some(parent) = self.lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_error(parent, e))?;
        }
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(|e| self.io_error(&self.lock_path, e))?;
        FileExt::lock_exclusive(&lock).map_err(|e| self.io_error(&self.lock_path, e))?;
        Ok(lock)
    }

    fn write_atomic(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let mut tmp_name = self.path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = self.path.with_file_name(tmp_name);

        let file = File::create(&tmp_path).map_err(|e| self.io_error(&tmp_path, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, checkpoint).map_err(CheckpointError::Serialize)?;
        writer
            .flush()
            .and_then(|_| writer.get_ref().sync_all())
            .map_err(|e| self.io_error(&tmp_path, e))?;
        drop(writer);

        fs::rename(&tmp_path, &self.path).map_err(|e| self.io_error(&self.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_read_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoint.json"));
        assert!(store.read().unwrap().is_empty());
        assert_eq!(
            store.lock_path(),
            dir.path().join("checkpoint.json.lock").as_path()
        );
    }

    #[test]
    fn test_update_writes_original_key_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoint.json"));
        store
            .update("vol1↳book", CheckpointEntry::done(120, 3, 0.875, 4.5))
            .unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        let entry = &raw["vol1↳book"];
        assert_eq!(entry["status"], "done");
        assert_eq!(entry["word count"], 120);
        assert_eq!(entry["num pages"], 3);
        assert_eq!(entry["document-level confidence"], 0.875);
        assert_eq!(entry["time taken (s)"], 4.5);
        assert!(entry["error"].is_null());
        let timestamp = entry["timestamp"].as_str().unwrap();
        assert!(chrono::NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).is_ok());
    }

    #[test]
    fn test_update_replaces_previous_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoint.json"));
        store.update("a", CheckpointEntry::failed("boom", 0.1)).unwrap();
        store.update("b", CheckpointEntry::done(1, 1, 1.0, 0.2)).unwrap();
        assert!(store.completed_ids().unwrap().contains("b"));
        assert!(!store.completed_ids().unwrap().contains("a"));

        store.update("a", CheckpointEntry::done(5, 2, 0.5, 0.3)).unwrap();
        let checkpoint = store.read().unwrap();
        assert_eq!(checkpoint.len(), 2);
        assert!(checkpoint["a"].is_done());
        assert_eq!(checkpoint["a"].error, None);
    }

    #[test]
    fn test_corrupted_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        fs::write(&path, "{\"a\": {\"status\": \"do").unwrap();
        let store = CheckpointStore::new(&path);

        let err = store.read().unwrap_err();
        assert!(matches!(err, CheckpointError::Corrupted { .. }));
        assert!(err.to_string().starts_with("Corrupted checkpoint file detected"));

        // An update must not paper over the corruption.
        assert!(store.update("b", CheckpointEntry::done(1, 1, 1.0, 0.1)).is_err());
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "{\"a\": {\"status\": \"do"
        );
    }

    #[test]
    fn test_concurrent_writers_lose_no_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = Arc::new(dir.path().join("checkpoint.json"));
        let writers = 8;
        let per_writer = 10;

        let handles: Vec<_> = (0..writers)
            .map(|w| {
                let path = Arc::clone(&path);
                thread::spawn(move || {
                    // Separate store handles open separate lock descriptors,
                    // as separate worker processes would.
                    let store = CheckpointStore::new(path.as_path());
                    for d in 0..per_writer {
                        store
                            .update(&format!("w{w}-d{d}"), CheckpointEntry::done(d, 1, 1.0, 0.0))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let checkpoint = CheckpointStore::new(path.as_path()).read().unwrap();
        assert_eq!(checkpoint.len(), writers * per_writer);
        assert!(checkpoint.values().all(CheckpointEntry::is_done));
    }
}
