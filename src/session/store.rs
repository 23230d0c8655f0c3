//! Session store collaborator and its file-backed and in-memory backends.
//!
//! [`SessionStore::put`] follows a partial-update discipline: the store
//! merges the provided fields into whatever record it already holds.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use crate::session::record::{SessionRecord, SessionToken, SessionUpdate};

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("session record is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    /// The module id cannot be used as a storage key.
    #[error("invalid storage key: {0}")]
    InvalidKey(String),

    /// Backend-specific failure (remote stores).
    #[error("session store unavailable: {0}")]
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// SessionStore trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(
        &self,
        module_id: &str,
        token: &SessionToken,
    ) -> Result<Option<SessionRecord>, StoreError>;

    /// Merge `update` into the stored record, creating it if needed.
    async fn put(
        &self,
        module_id: &str,
        token: &SessionToken,
        update: &SessionUpdate,
    ) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// JsonSessionStore
// ---------------------------------------------------------------------------

/// One pretty-printed JSON file per session:
/// `<root>/<module_id>/<token>.json`.
pub struct JsonSessionStore {
    root: PathBuf,
}

impl JsonSessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn record_path(&self, module_id: &str, token: &SessionToken) -> Result<PathBuf, StoreError> {
        let valid = !module_id.is_empty()
            && module_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StoreError::InvalidKey(module_id.to_string()));
        }
        Ok(self
            .root
            .join(module_id)
            .join(format!("{}.json", token.as_str())))
    }
}

#[async_trait]
impl SessionStore for JsonSessionStore {
    async fn get(
        &self,
        module_id: &str,
        token: &SessionToken,
    ) -> Result<Option<SessionRecord>, StoreError> {
        let path = self.record_path(module_id, token)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(data) => Ok(Some(serde_json::from_str(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(
        &self,
        module_id: &str,
        token: &SessionToken,
        update: &SessionUpdate,
    ) -> Result<(), StoreError> {
        let path = self.record_path(module_id, token)?;
        let mut record = self.get(module_id, token).await?.unwrap_or_default();
        record.apply(update);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write-then-rename so a crash never leaves a half-written record.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_string_pretty(&record)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemorySessionStore
// ---------------------------------------------------------------------------

/// Process-local store, used when no durable backend is configured.
#[derive(Default)]
pub struct MemorySessionStore {
    records: Mutex<HashMap<(String, SessionToken), SessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record (for resuming sessions in tests and demos).
    pub fn insert(&self, module_id: &str, token: &SessionToken, record: SessionRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.insert((module_id.to_string(), token.clone()), record);
        }
    }

    /// Snapshot of the stored record.
    pub fn snapshot(&self, module_id: &str, token: &SessionToken) -> Option<SessionRecord> {
        self.records
            .lock()
            .ok()?
            .get(&(module_id.to_string(), token.clone()))
            .cloned()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(
        &self,
        module_id: &str,
        token: &SessionToken,
    ) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.snapshot(module_id, token))
    }

    async fn put(
        &self,
        module_id: &str,
        token: &SessionToken,
        update: &SessionUpdate,
    ) -> Result<(), StoreError> {
        let mut records = self
            .records
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        records
            .entry((module_id.to_string(), token.clone()))
            .or_default()
            .apply(update);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
