//! Delay state persistence.
//!
//! One JSON object keyed by task name:
//!
//! ```json
//! {
//!   "OpsiExplore": {
//!     "original_next_run": "2024-01-02 08:00:00",
//!     "delayed_next_run": "2024-01-02 00:05:00",
//!     "delayed_at": "2024-01-01 23:55:00"
//!   }
//! }
//! ```
//!
//! Every mutation reads the whole document, applies the change and rewrites
//! it through a temp file plus rename. A document that cannot be read is
//! treated as empty; a malformed record only affects its own key.

use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::fs;
use tracing::{debug, error};

use crate::domain::errors::{Result, RotaError};
use crate::domain::time::{format_timestamp, parse_timestamp};

/// Persisted record of one delayed task. Timestamps are kept as written so a
/// bad value in one field does not hide the rest of the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRecord {
    pub original_next_run: String,
    pub delayed_next_run: String,
    pub delayed_at: String,
}

impl DelayRecord {
    pub fn new(original: NaiveDateTime, delayed: NaiveDateTime, now: NaiveDateTime) -> Self {
        Self {
            original_next_run: format_timestamp(original),
            delayed_next_run: format_timestamp(delayed),
            delayed_at: format_timestamp(now),
        }
    }

    pub fn original(&self) -> Result<NaiveDateTime> {
        parse_timestamp(&self.original_next_run)
    }

    pub fn delayed(&self) -> Result<NaiveDateTime> {
        parse_timestamp(&self.delayed_next_run)
    }
}

#[derive(Debug, Clone)]
pub struct DelayStateStore {
    path: PathBuf,
}

impl DelayStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Upsert the record for `task`, preserving every other record.
    pub async fn save(
        &self,
        task: &str,
        original: NaiveDateTime,
        delayed: NaiveDateTime,
        now: NaiveDateTime,
    ) -> Result<()> {
        let record = DelayRecord::new(original, delayed, now);
        let value = serde_json::to_value(&record)
            .map_err(|e| RotaError::StorageFormat(format!("serialize {task}: {e}")))?;

        let mut doc = self.read_document().await;
        doc.insert(task.to_string(), value);
        self.write_document(&doc).await?;

        debug!(task, delayed_next_run = %record.delayed_next_run, "delay record saved");
        Ok(())
    }

    /// `Ok(None)` when there is no record; `Err` when the record is malformed.
    pub async fn load(&self, task: &str) -> Result<Option<DelayRecord>> {
        let mut doc = self.read_document().await;
        match doc.remove(task) {
            Some(value) => decode(task, value).map(Some),
            None => Ok(None),
        }
    }

    /// Delete the record for `task`. Returns false if there was none.
    pub async fn clear(&self, task: &str) -> Result<bool> {
        let mut doc = self.read_document().await;
        if doc.remove(task).is_none() {
            return Ok(false);
        }
        self.write_document(&doc).await?;
        Ok(true)
    }

    /// Remove the whole document.
    pub async fn clear_all(&self) -> Result<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(source) => Err(self.io_error(source)),
        }
    }

    /// Every key with its individually decoded record.
    pub async fn entries(&self) -> Vec<(String, Result<DelayRecord>)> {
        self.read_document()
            .await
            .into_iter()
            .map(|(task, value)| {
                let record = decode(&task, value);
                (task, record)
            })
            .collect()
    }

    pub async fn is_empty(&self) -> bool {
        self.read_document().await.is_empty()
    }

    async fn read_document(&self) -> Map<String, Value> {
        match self.try_read_document().await {
            Ok(doc) => doc,
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "delay state unreadable, treating as empty");
                Map::new()
            }
        }
    }

    async fn try_read_document(&self) -> Result<Map<String, Value>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Map::new()),
            Err(source) => return Err(self.io_error(source)),
        };
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(RotaError::StorageFormat(
                "delay state root is not an object".to_string(),
            )),
            Err(e) => Err(RotaError::StorageFormat(format!("parse: {e}"))),
        }
    }

    async fn write_document(&self, doc: &Map<String, Value>) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .await
                .map_err(|source| self.io_error(source))?;
        }

        let content = serde_json::to_string_pretty(doc)
            .map_err(|e| RotaError::StorageFormat(format!("serialize: {e}")))?;

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, content)
            .await
            .map_err(|source| self.io_error(source))?;
        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|source| self.io_error(source))?;
        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> RotaError {
        RotaError::Storage {
            path: self.path.display().to_string(),
            source,
        }
    }
}

fn decode(task: &str, value: Value) -> Result<DelayRecord> {
    serde_json::from_value(value)
        .map_err(|e| RotaError::StorageFormat(format!("record {task}: {e}")))
}
