//! Key-value persistence for the local store.
//!
//! Implementations of [`KeyValueStore`]:
//! - `InMemoryKv` - For testing
//! - `FileKv` (in memo-sync-cli) - One file per key on tokio::fs
//!
//! Writes are explicit: callers decide when to [`StorePersister::flush`],
//! or call [`StorePersister::flush_if_due`] from an editor loop to get
//! debounced saves.

use crate::ledger::DeletionLedger;
use crate::normalize::{normalize_batch, normalize_deletions};
use crate::note::{Note, NEW_NOTE_TITLE};
use crate::store::LocalStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use thiserror::Error;

/// Current store key.
pub const STORE_KEY: &str = "memo:notes:v3";
/// Previous store layout: `{version: 2, notes}` plus a separate active-id key.
pub const STORE_KEY_V2: &str = "memo:notes:v2";
pub const CURRENT_KEY_V2: &str = "memo:current:v2";
/// Single-text value from before multi-note support.
pub const LEGACY_TEXT_KEY: &str = "memo:text:v1";

pub const STORE_SCHEMA_VERSION: u32 = 3;
pub const MIGRATED_NOTE_TITLE: &str = "Migrated Memo";
/// Default quiet period before a debounced flush.
pub const DEFAULT_PERSIST_DEBOUNCE: Duration = Duration::from_millis(800);

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PersistError>;

/// String key-value storage (localStorage-shaped).
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removing a missing key is not an error
    async fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory key-value store for testing
#[derive(Default)]
pub struct InMemoryKv {
    entries: RwLock<HashMap<String, String>>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a key (test setup helper)
    pub fn with_entry(self, key: &str, value: &str) -> Self {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
        self
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StoredStore<'a> {
    version: u32,
    notes: &'a [Note],
    deleted_memos: &'a DeletionLedger,
    active_id: Option<&'a str>,
}

/// Serialize a store in the persisted layout.
pub fn encode_store(store: &LocalStore) -> Result<String> {
    let stored = StoredStore {
        version: STORE_SCHEMA_VERSION,
        notes: store.notes(),
        deleted_memos: store.deleted_memos(),
        active_id: store.active_id(),
    };
    Ok(serde_json::to_string(&stored)?)
}

/// Parse a persisted store. Every note goes through the normalizer.
///
/// Returns None if `raw` is not JSON or lacks a `notes` array.
pub fn decode_store(raw: &str, now: DateTime<Utc>) -> Option<LocalStore> {
    let parsed: Value = serde_json::from_str(raw).ok()?;
    let notes = parsed.get("notes")?.as_array()?;
    let deletions = parsed
        .get("deletedMemos")
        .and_then(Value::as_array)
        .map(|raws| normalize_deletions(raws, now))
        .unwrap_or_default();
    let active_id = parsed
        .get("activeId")
        .and_then(Value::as_str)
        .map(str::to_string);
    Some(LocalStore::from_parts(
        normalize_batch(notes, now),
        DeletionLedger::from(deletions),
        active_id,
    ))
}

/// Loads and saves a [`LocalStore`] through a [`KeyValueStore`].
pub struct StorePersister<K: KeyValueStore> {
    kv: K,
    debounce: Duration,
    flushed_revision: u64,
}

impl<K: KeyValueStore> StorePersister<K> {
    pub fn new(kv: K) -> Self {
        Self {
            kv,
            debounce: DEFAULT_PERSIST_DEBOUNCE,
            flushed_revision: 0,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn kv(&self) -> &K {
        &self.kv
    }

    /// Load the store, migrating older layouts and bootstrapping an empty one.
    ///
    /// Unparseable stored data is logged and treated as empty. The returned
    /// store always holds at least one note.
    pub async fn load(&mut self, now: DateTime<Utc>) -> Result<LocalStore> {
        let mut store = match self.kv.get(STORE_KEY).await? {
            Some(raw) => decode_store(&raw, now).unwrap_or_else(|| {
                tracing::warn!("Stored notes under {} are unreadable, starting empty", STORE_KEY);
                LocalStore::new()
            }),
            None => self.load_v2(now).await?,
        };
        self.flushed_revision = store.revision();

        if store.is_empty() {
            match self.kv.get(LEGACY_TEXT_KEY).await? {
                Some(text) => {
                    tracing::info!("Migrating legacy {} into a note", LEGACY_TEXT_KEY);
                    store.bootstrap(MIGRATED_NOTE_TITLE, &text, now);
                }
                None => {
                    store.bootstrap(NEW_NOTE_TITLE, "", now);
                }
            }
        }
        tracing::info!("Loaded {} notes", store.len());
        Ok(store)
    }

    async fn load_v2(&self, now: DateTime<Utc>) -> Result<LocalStore> {
        let Some(raw) = self.kv.get(STORE_KEY_V2).await? else {
            return Ok(LocalStore::new());
        };
        let Some(store) = decode_store(&raw, now) else {
            tracing::warn!("Stored notes under {} are unreadable, starting empty", STORE_KEY_V2);
            return Ok(LocalStore::new());
        };
        let active = self.kv.get(CURRENT_KEY_V2).await?;
        let notes = store.notes().to_vec();
        tracing::info!("Upgrading {} notes from {}", notes.len(), STORE_KEY_V2);
        Ok(LocalStore::from_parts(notes, DeletionLedger::new(), active))
    }

    /// True if `store` changed since the last load or flush.
    pub fn is_dirty(&self, store: &LocalStore) -> bool {
        store.revision() != self.flushed_revision
    }

    /// Write the store if it changed. Returns true if written.
    pub async fn flush(&mut self, store: &LocalStore) -> Result<bool> {
        if !self.is_dirty(store) {
            return Ok(false);
        }
        let encoded = encode_store(store)?;
        self.kv.set(STORE_KEY, &encoded).await?;
        self.flushed_revision = store.revision();
        tracing::debug!("Flushed store revision {} ({} bytes)", store.revision(), encoded.len());
        Ok(true)
    }

    /// Flush only once the store has been quiet for the debounce period.
    pub async fn flush_if_due(&mut self, store: &LocalStore, now: DateTime<Utc>) -> Result<bool> {
        if !self.is_dirty(store) {
            return Ok(false);
        }
        let quiet = store
            .last_change_at()
            .and_then(|at| now.signed_duration_since(at).to_std().ok())
            .is_none_or(|elapsed| elapsed >= self.debounce);
        if !quiet {
            return Ok(false);
        }
        self.flush(store).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn t(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + millis).unwrap()
    }

    #[tokio::test]
    async fn test_empty_storage_bootstraps_one_note() {
        let mut persister = StorePersister::new(InMemoryKv::new());
        let store = persister.load(t(0)).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.notes()[0].title, NEW_NOTE_TITLE);
        assert_eq!(store.active_id(), Some(store.notes()[0].id.as_str()));
        assert!(persister.is_dirty(&store));
    }

    #[tokio::test]
    async fn test_legacy_text_is_migrated() {
        let kv = InMemoryKv::new().with_entry(LEGACY_TEXT_KEY, "old memo");
        let mut persister = StorePersister::new(kv);
        let store = persister.load(t(0)).await.unwrap();

        let note = &store.notes()[0];
        assert_eq!(note.title, MIGRATED_NOTE_TITLE);
        assert_eq!(note.text, "old memo");
    }

    #[tokio::test]
    async fn test_unreadable_store_is_treated_as_empty() {
        let kv = InMemoryKv::new().with_entry(STORE_KEY, "{not json");
        let mut persister = StorePersister::new(kv);
        let store = persister.load(t(0)).await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.notes()[0].title, NEW_NOTE_TITLE);
    }

    #[tokio::test]
    async fn test_flush_and_reload() {
        let mut persister = StorePersister::new(InMemoryKv::new());
        let mut store = persister.load(t(0)).await.unwrap();
        let id = store.active_id().unwrap().to_string();
        store.set_text(&id, "saved text", t(10)).unwrap();
        let other = store.create_note(t(20)).id.clone();
        store.delete_note(&other, t(30)).unwrap();

        assert!(persister.flush(&store).await.unwrap());
        assert!(!persister.flush(&store).await.unwrap());

        let raw = persister.kv().get(STORE_KEY).await.unwrap().unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["version"], 3);
        assert_eq!(value["activeId"], json!(id));
        assert_eq!(value["deletedMemos"][0]["id"], json!(other));

        let mut reloaded = StorePersister::new(InMemoryKv::new().with_entry(STORE_KEY, &raw));
        let loaded = reloaded.load(t(40)).await.unwrap();
        assert_eq!(loaded.notes(), store.notes());
        assert!(loaded.deleted_memos().is_deleted(&other));
        assert_eq!(loaded.active_id(), Some(id.as_str()));
        assert!(!reloaded.is_dirty(&loaded));
    }

    #[tokio::test]
    async fn test_v2_layout_is_upgraded() {
        let v2 = json!({
            "version": 2,
            "notes": [
                {"id": "a", "title": "A", "text": "one"},
                {"id": "b", "title": "B", "text": "two"}
            ]
        });
        let kv = InMemoryKv::new()
            .with_entry(STORE_KEY_V2, &v2.to_string())
            .with_entry(CURRENT_KEY_V2, "b");
        let mut persister = StorePersister::new(kv);
        let store = persister.load(t(0)).await.unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.active_id(), Some("b"));
        assert_eq!(store.get("a").unwrap().version_ids(), vec!["a-v0"]);
    }

    #[tokio::test]
    async fn test_flush_if_due_waits_for_quiet_period() {
        let mut persister = StorePersister::new(InMemoryKv::new());
        let mut store = persister.load(t(0)).await.unwrap();
        persister.flush(&store).await.unwrap();

        let id = store.active_id().unwrap().to_string();
        store.set_text(&id, "typing", t(1_000)).unwrap();

        assert!(!persister.flush_if_due(&store, t(1_500)).await.unwrap());
        assert!(persister.flush_if_due(&store, t(1_800)).await.unwrap());
        assert!(!persister.flush_if_due(&store, t(5_000)).await.unwrap());
    }
}
