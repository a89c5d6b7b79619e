//! SyncTransport trait for talking to the remote note server.
//!
//! Implementations:
//! - HTTP: `memo-sync-http::HttpTransport` against the `/notes` endpoints
//! - In-memory: [`InMemoryRemote`] for tests and offline demos
//!
//! Endpoint and credentials are bound when the transport is constructed.
//! Payloads coming back are untrusted JSON and go through
//! [`crate::normalize`] before use.

use crate::ledger::DeletionRecord;
use crate::note::Note;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Sync endpoint is not set")]
    EndpointNotSet,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server responded {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Raw server state as returned by a fetch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSnapshot {
    #[serde(default)]
    pub notes: Vec<Value>,
    /// Deletions the server wants propagated, `{id, deletedAt}` entries
    #[serde(default)]
    pub server_deleted: Vec<Value>,
}

/// Server acknowledgement of a write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// Number of items the server accepted, when it says
    #[serde(default)]
    pub received: Option<usize>,
}

impl Ack {
    pub fn received(count: usize) -> Self {
        Self {
            received: Some(count),
        }
    }
}

/// Transport layer for note sync
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Fetch every note the server holds
    async fn fetch_remote_notes(&self) -> Result<RemoteSnapshot>;

    /// Upsert notes by id (additive)
    async fn push_notes(&self, notes: &[Note]) -> Result<Ack>;

    /// Replace the server's whole note set (destructive)
    async fn replace_remote_notes(&self, notes: &[Note]) -> Result<Ack>;

    /// Tell the server which notes were deleted locally.
    ///
    /// Servers without deletion support may ignore this.
    async fn report_deletions(&self, _deletions: &[DeletionRecord]) -> Result<Ack> {
        Ok(Ack::default())
    }
}

#[async_trait]
impl<T: SyncTransport + ?Sized> SyncTransport for Arc<T> {
    async fn fetch_remote_notes(&self) -> Result<RemoteSnapshot> {
        (**self).fetch_remote_notes().await
    }

    async fn push_notes(&self, notes: &[Note]) -> Result<Ack> {
        (**self).push_notes(notes).await
    }

    async fn replace_remote_notes(&self, notes: &[Note]) -> Result<Ack> {
        (**self).replace_remote_notes(notes).await
    }

    async fn report_deletions(&self, deletions: &[DeletionRecord]) -> Result<Ack> {
        (**self).report_deletions(deletions).await
    }
}

#[derive(Default)]
struct RemoteState {
    notes: Vec<Value>,
    deleted: Vec<DeletionRecord>,
    push_count: usize,
}

/// In-process stand-in for a sync server.
///
/// Stores notes as JSON the way a real server would, so whatever is put in
/// (including malformed payloads) comes back out verbatim.
#[derive(Default)]
pub struct InMemoryRemote {
    state: RwLock<RemoteState>,
    offline: AtomicBool,
    propagate_deletions: AtomicBool,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the server with raw note payloads.
    pub fn with_raw_notes(notes: Vec<Value>) -> Self {
        let remote = Self::new();
        remote.write().notes = notes;
        remote
    }

    /// Simulate losing connectivity: every call fails with a network error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Echo reported deletions back as `serverDeleted` on fetch.
    pub fn set_propagate_deletions(&self, propagate: bool) {
        self.propagate_deletions.store(propagate, Ordering::SeqCst);
    }

    /// Record a deletion made by another client.
    pub fn delete_remote(&self, record: DeletionRecord) {
        let mut state = self.write();
        state
            .notes
            .retain(|n| n.get("id").and_then(Value::as_str) != Some(record.id.as_str()));
        if !state.deleted.iter().any(|d| d.id == record.id) {
            state.deleted.push(record);
        }
        self.propagate_deletions.store(true, Ordering::SeqCst);
    }

    pub fn raw_notes(&self) -> Vec<Value> {
        self.read().notes.clone()
    }

    /// Stored notes parsed back into typed notes (test convenience).
    pub fn notes(&self) -> Vec<Note> {
        self.read()
            .notes
            .iter()
            .filter_map(|n| serde_json::from_value(n.clone()).ok())
            .collect()
    }

    pub fn deletions(&self) -> Vec<DeletionRecord> {
        self.read().deleted.clone()
    }

    /// Number of push/replace calls that reached the server.
    pub fn push_count(&self) -> usize {
        self.read().push_count
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(TransportError::Network("remote unreachable".to_string()));
        }
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RemoteState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, RemoteState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn encode<T: Serialize>(items: &[T]) -> Result<Vec<Value>> {
    items
        .iter()
        .map(serde_json::to_value)
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| TransportError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl SyncTransport for InMemoryRemote {
    async fn fetch_remote_notes(&self) -> Result<RemoteSnapshot> {
        self.check_online()?;
        let state = self.read();
        let server_deleted = if self.propagate_deletions.load(Ordering::SeqCst) {
            encode(&state.deleted)?
        } else {
            Vec::new()
        };
        Ok(RemoteSnapshot {
            notes: state.notes.clone(),
            server_deleted,
        })
    }

    async fn push_notes(&self, notes: &[Note]) -> Result<Ack> {
        self.check_online()?;
        let encoded = encode(notes)?;
        let mut state = self.write();
        for (note, value) in notes.iter().zip(encoded) {
            let existing = state
                .notes
                .iter()
                .position(|n| n.get("id").and_then(Value::as_str) == Some(note.id.as_str()));
            match existing {
                Some(i) => state.notes[i] = value,
                None => state.notes.push(value),
            }
        }
        state.push_count += 1;
        Ok(Ack::received(notes.len()))
    }

    async fn replace_remote_notes(&self, notes: &[Note]) -> Result<Ack> {
        self.check_online()?;
        let encoded = encode(notes)?;
        let mut state = self.write();
        state.notes = encoded;
        state.push_count += 1;
        Ok(Ack::received(notes.len()))
    }

    async fn report_deletions(&self, deletions: &[DeletionRecord]) -> Result<Ack> {
        self.check_online()?;
        let mut state = self.write();
        for record in deletions {
            state
                .notes
                .retain(|n| n.get("id").and_then(Value::as_str) != Some(record.id.as_str()));
            if !state.deleted.iter().any(|d| d.id == record.id) {
                state.deleted.push(record.clone());
            }
        }
        Ok(Ack::received(deletions.len()))
    }
}
