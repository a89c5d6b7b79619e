//! Event infrastructure for memo-sync-core.
//!
//! Provides `SyncEvent` for progress/status reporting and `EventBus` for
//! subscriptions. The bus is `Send + Sync`; wrap it in `Arc` to subscribe.

use crate::merge::Outcome;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Saved-state indicator shown to the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Saved,
    Failed,
}

/// Which engine operation an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncOperation {
    Sync,
    ReplaceLocal,
    ReplaceRemote,
}

/// Events emitted during sync operations.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    /// An operation began.
    SyncStarted {
        operation: SyncOperation,
        timestamp: DateTime<Utc>,
    },
    /// One note was classified by the merge.
    NoteMerged {
        #[serde(rename = "noteId")]
        note_id: String,
        outcome: Outcome,
    },
    /// An operation finished and its result was applied.
    SyncCompleted {
        operation: SyncOperation,
        /// Notes changed or added locally.
        #[serde(rename = "localUpdates")]
        local_updates: usize,
        /// Notes sent to the server.
        #[serde(rename = "serverUpdates")]
        server_updates: usize,
        conflicts: usize,
        timestamp: DateTime<Utc>,
    },
    /// An operation aborted; local notes were left unchanged.
    SyncFailed {
        operation: SyncOperation,
        error: String,
        timestamp: DateTime<Utc>,
    },
    StatusChanged { status: SyncStatus },
    /// The note list or active note changed and views should re-render.
    ViewRefreshRequested {
        #[serde(rename = "activeId")]
        active_id: Option<String>,
    },
}

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Follows the disposer pattern: hold this value to keep receiving events,
/// drop it (or let it go out of scope) to unsubscribe.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

type Callback = Arc<dyn Fn(SyncEvent) + Send + Sync>;

/// Event bus for publishing sync events to subscribers.
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Callback)>>,
    next_id: AtomicUsize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(SyncEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // try_write: Drop may run during unwinding while emit holds the read lock
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: SyncEvent) {
        // Snapshot so a callback may subscribe without deadlocking
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event.clone());
        }
    }
}
