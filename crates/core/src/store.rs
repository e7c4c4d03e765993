//! Persistent key/value storage
//!
//! The session keeps three values across restarts: the identity of the
//! active document and the scroll position within it. [`JsonFileStore`]
//! keeps them in a versioned JSON envelope that is rewritten atomically
//! (temp file, fsync, rename), so a crash mid-write leaves the previous
//! values intact. [`MemoryStore`] backs tests and ephemeral sessions.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const SESSION_SCHEMA_VERSION: u32 = 1;

/// Keys written by the session
pub mod keys {
    /// Identity of the active document
    pub const DOCUMENT_URI: &str = "roadbook.uri";
    /// Page index of the persisted scroll position
    pub const PAGE_INDEX: &str = "roadbook.page_index";
    /// Offset within that page
    pub const PAGE_OFFSET: &str = "roadbook.page_offset";
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("session file version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },
}

/// A single write in a batch applied with [`KeyValueStore::apply`]
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    SetInt(String, i64),
    SetString(String, String),
    Remove(String),
}

impl StoreOp {
    pub fn set_int(key: &str, value: i64) -> Self {
        StoreOp::SetInt(key.to_string(), value)
    }

    pub fn set_string(key: &str, value: impl Into<String>) -> Self {
        StoreOp::SetString(key.to_string(), value.into())
    }

    pub fn remove(key: &str) -> Self {
        StoreOp::Remove(key.to_string())
    }

    fn apply_to(&self, values: &mut BTreeMap<String, Value>) {
        match self {
            StoreOp::SetInt(key, value) => {
                values.insert(key.clone(), Value::from(*value));
            }
            StoreOp::SetString(key, value) => {
                values.insert(key.clone(), Value::from(value.as_str()));
            }
            StoreOp::Remove(key) => {
                values.remove(key);
            }
        }
    }
}

/// Persistent key/value storage consumed by the session
///
/// Reads never fail: a value of the wrong type reads as absent, which
/// callers can tell apart from a missing key with [`contains`](Self::contains).
/// Writes in one [`apply`](Self::apply) call land together or not at all.
pub trait KeyValueStore: Send + Sync {
    fn get_int(&self, key: &str) -> Option<i64>;

    fn get_string(&self, key: &str) -> Option<String>;

    fn contains(&self, key: &str) -> bool;

    /// Apply every operation atomically
    fn apply(&self, ops: &[StoreOp]) -> Result<(), StoreError>;

    fn set_int(&self, key: &str, value: i64) -> Result<(), StoreError> {
        self.apply(&[StoreOp::set_int(key, value)])
    }

    fn set_string(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.apply(&[StoreOp::set_string(key, value)])
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.apply(&[StoreOp::remove(key)])
    }
}

/// In-memory store; nothing survives the process
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a raw JSON value, bypassing the typed setters
    pub fn insert_raw(&self, key: &str, value: Value) {
        self.values.lock().insert(key.to_string(), value);
    }
}

impl KeyValueStore for MemoryStore {
    fn get_int(&self, key: &str) -> Option<i64> {
        self.values.lock().get(key).and_then(Value::as_i64)
    }

    fn get_string(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).and_then(Value::as_str).map(str::to_string)
    }

    fn contains(&self, key: &str) -> bool {
        self.values.lock().contains_key(key)
    }

    fn apply(&self, ops: &[StoreOp]) -> Result<(), StoreError> {
        let mut values = self.values.lock();
        for op in ops {
            op.apply_to(&mut values);
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionEnvelope {
    version: u32,
    values: BTreeMap<String, Value>,
}

/// Store backed by a JSON file
///
/// Values are cached in memory; the cache only changes after the file was
/// replaced successfully.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, Value>>,
}

impl JsonFileStore {
    /// Open the store at `path`, starting empty if it does not exist
    ///
    /// A file that is not valid JSON is logged and ignored; it gets
    /// replaced on the next write.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let values = match fs::read(&path) {
            Ok(bytes) => Self::decode(&path, &bytes)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };

        tracing::debug!(path = %path.display(), entries = values.len(), "opened session store");
        Ok(Self { path, values: Mutex::new(values) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn decode(path: &Path, bytes: &[u8]) -> Result<BTreeMap<String, Value>, StoreError> {
        match serde_json::from_slice::<SessionEnvelope>(bytes) {
            Ok(envelope) if envelope.version > SESSION_SCHEMA_VERSION => {
                Err(StoreError::UnsupportedVersion {
                    found: envelope.version,
                    supported: SESSION_SCHEMA_VERSION,
                })
            }
            Ok(envelope) => Ok(envelope.values),
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "ignoring unreadable session file");
                Ok(BTreeMap::new())
            }
        }
    }

    fn write(&self, values: &BTreeMap<String, Value>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let envelope = SessionEnvelope { version: SESSION_SCHEMA_VERSION, values: values.clone() };
        let bytes = serde_json::to_vec_pretty(&envelope)?;

        let temp_path = self.path.with_extension("json.tmp");
        let result = (|| {
            let mut file = File::create(&temp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            fs::rename(&temp_path, &self.path)
        })();

        if result.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        Ok(result?)
    }
}

impl KeyValueStore for JsonFileStore {
    fn get_int(&self, key: &str) -> Option<i64> {
        self.values.lock().get(key).and_then(Value::as_i64)
    }

    fn get_string(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).and_then(Value::as_str).map(str::to_string)
    }

    fn contains(&self, key: &str) -> bool {
        self.values.lock().contains_key(key)
    }

    fn apply(&self, ops: &[StoreOp]) -> Result<(), StoreError> {
        let mut values = self.values.lock();
        let mut next = values.clone();
        for op in ops {
            op.apply_to(&mut next);
        }

        self.write(&next)?;
        *values = next;
        Ok(())
    }
}
