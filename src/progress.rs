use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

/// Keys of the per-call progress document.
pub mod keys {
    pub const PHONE: &str = "phone";
    pub const NAME: &str = "name";
    pub const PICKUP: &str = "pickup";
    pub const PICKUP_LOCATION: &str = "pickupLocation";
    pub const DESTINATION: &str = "destination";
    pub const DESTINATION_LOCATION: &str = "destinationLocation";
}

pub type Record = Map<String, Value>;

/// A value staged into the progress document.
///
/// The producer decides whether it holds text or structure; the store never
/// re-guesses.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Structured(Value),
}

impl FieldValue {
    /// Interpret an untyped string the way the dialplan scripts do: JSON if
    /// it parses, text otherwise. Only for values arriving from outside the
    /// driver (e.g. `--save-json`).
    pub fn from_raw(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(v) => FieldValue::Structured(v),
            Err(_) => FieldValue::Text(raw.to_string()),
        }
    }

    fn into_json(self) -> Value {
        match self {
            FieldValue::Text(s) => Value::String(s),
            FieldValue::Structured(v) => v,
        }
    }
}

/// One JSON document per call, rewritten on every field update.
#[derive(Debug, Clone)]
pub struct ProgressStore {
    path: PathBuf,
}

impl ProgressStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the record. Missing or malformed documents load as empty.
    pub fn load(&self) -> Record {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(_) => return Record::new(),
        };

        match serde_json::from_str::<Value>(&contents) {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => {
                tracing::warn!(path = %self.path.display(), "Progress document malformed, starting empty");
                Record::new()
            }
        }
    }

    /// Read-modify-write a single key. The document is replaced atomically.
    pub fn set_field(&self, key: &str, value: FieldValue) -> Result<(), ProgressError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }

        let mut record = self.load();
        record.insert(key.to_string(), value.into_json());

        let body = serde_json::to_string_pretty(&Value::Object(record))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &self.path)?;

        tracing::debug!(key, path = %self.path.display(), "Progress field stored");
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProgressError {
    #[error("failed to write progress document: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode progress document: {0}")]
    Encode(#[from] serde_json::Error),
}
