//! Persistence bridge between the conversation store and durable storage
//!
//! The whole `conversations` slice is written as one snapshot under a fixed
//! key. Flushing is explicit: the front-end calls [`PersistenceBridge::flush`]
//! after every handled event and the bridge writes only if the store's
//! revision moved since the last flush.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{StorageError, StorageResult};
use crate::state::Conversation;
use crate::store::ConversationStore;

pub const HISTORY_KEY: &str = "gemini-chat";
pub const SCHEMA_VERSION: u32 = 1;

/// Key-value storage for serialized snapshots
pub trait Storage: Send {
    fn get(&self, key: &str) -> StorageResult<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> StorageResult<()>;
    /// Move the value under `key` aside to `<key>.corrupt`, replacing any
    /// earlier one. A missing value is not an error.
    fn quarantine(&mut self, key: &str) -> StorageResult<()>;
}

pub const QUARANTINE_SUFFIX: &str = ".corrupt";

/// One `<key>.json` file per key under a directory
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `~/.local/share/gemini-chat` (or the platform equivalent)
    pub fn default_dir() -> StorageResult<PathBuf> {
        let data_dir = dirs::data_dir().ok_or_else(|| StorageError::InitializationError {
            message: "Could not determine data directory".to_string(),
        })?;
        Ok(data_dir.join("gemini-chat"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(path)?))
    }

    fn set(&mut self, key: &str, value: &str) -> StorageResult<()> {
        fs::create_dir_all(&self.dir)?;

        // Write to a temp file, then rename over the old snapshot
        let path = self.path_for(key);
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, value)?;
        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    fn quarantine(&mut self, key: &str) -> StorageResult<()> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(());
        }
        let mut aside = path.clone().into_os_string();
        aside.push(QUARANTINE_SUFFIX);
        fs::rename(&path, PathBuf::from(aside))?;
        Ok(())
    }
}

/// Process-local storage, for `--ephemeral` sessions and tests
#[derive(Default)]
pub struct MemoryStorage {
    entries: HashMap<String, String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> StorageResult<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn quarantine(&mut self, key: &str) -> StorageResult<()> {
        if let Some(value) = self.entries.remove(key) {
            self.entries.insert(format!("{}{}", key, QUARANTINE_SUFFIX), value);
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    #[serde(rename = "historyArr")]
    history: &'a [Conversation],
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Snapshot {
    Versioned {
        version: u32,
        #[serde(rename = "historyArr")]
        history: Vec<Conversation>,
    },
    Bare(Vec<Conversation>),
}

pub fn serialize_history(conversations: &[Conversation]) -> StorageResult<String> {
    let snapshot = SnapshotRef {
        version: SCHEMA_VERSION,
        history: conversations,
    };
    Ok(serde_json::to_string(&snapshot)?)
}

pub fn deserialize_history(raw: &str) -> StorageResult<Vec<Conversation>> {
    match serde_json::from_str::<Snapshot>(raw)? {
        Snapshot::Versioned { version, history } if version <= SCHEMA_VERSION => Ok(history),
        Snapshot::Versioned { version, .. } => Err(StorageError::InitializationError {
            message: format!("unsupported history schema version {}", version),
        }),
        Snapshot::Bare(history) => Ok(history),
    }
}

pub struct PersistenceBridge {
    storage: Box<dyn Storage>,
    key: String,
    flushed_revision: Option<u64>,
}

impl PersistenceBridge {
    pub fn new(storage: Box<dyn Storage>) -> Self {
        Self {
            storage,
            key: HISTORY_KEY.to_string(),
            flushed_revision: None,
        }
    }

    /// Read the snapshot into `store`. Missing or malformed data leaves the
    /// store untouched; a snapshot that exists but cannot be used is moved
    /// aside before the next flush could overwrite it. Returns the number of
    /// conversations loaded.
    pub fn load(&mut self, store: &mut ConversationStore) -> usize {
        let loaded = match self.storage.get(&self.key) {
            Ok(Some(raw)) => match deserialize_history(&raw) {
                Ok(history) => {
                    let count = history.len();
                    store.replace_all(history);
                    count
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring malformed conversation history");
                    self.quarantine();
                    0
                }
            },
            Ok(None) => {
                tracing::debug!(key = %self.key, "No stored conversation history");
                0
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read conversation history");
                self.quarantine();
                0
            }
        };

        self.flushed_revision = Some(store.revision());
        tracing::info!(count = loaded, "Loaded conversation history");
        loaded
    }

    fn quarantine(&mut self) {
        match self.storage.quarantine(&self.key) {
            Ok(()) => tracing::warn!(
                key = %self.key,
                suffix = QUARANTINE_SUFFIX,
                "Moved unusable conversation history aside"
            ),
            Err(e) => tracing::warn!(error = %e, "Failed to move unusable history aside"),
        }
    }

    /// Write the store's history if it changed since the last flush.
    ///
    /// Failures are logged and not retried; the in-memory state stays as is.
    /// Returns true if a snapshot was written.
    pub fn flush(&mut self, store: &ConversationStore) -> bool {
        let revision = store.revision();
        if self.flushed_revision == Some(revision) {
            return false;
        }
        self.flushed_revision = Some(revision);

        let result = serialize_history(store.conversations())
            .and_then(|json| self.storage.set(&self.key, &json));

        match result {
            Ok(()) => {
                tracing::debug!(
                    revision,
                    count = store.len(),
                    updated = ?store.last_updated(),
                    "Flushed conversation history"
                );
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to persist conversation history");
                false
            }
        }
    }
}
