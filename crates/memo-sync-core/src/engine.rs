//! SyncEngine: reconciles a [`LocalStore`] with a remote server.
//!
//! A sync runs as follows:
//!
//! 1. Record pending edits as versions (the active note is forced)
//! 2. Report the deletion ledger to the server, if any
//! 3. Fetch and normalize the server's notes and deletions
//! 4. Plan the merge (see [`crate::merge`])
//! 5. Push the upload batch, if any
//! 6. Only now commit the plan to the store
//!
//! A transport failure at any step aborts with the store's note set as it
//! was after step 1. The store is borrowed mutably for the whole
//! operation, so two syncs against one store cannot overlap.

use crate::clock::{Clock, SystemClock};
use crate::events::{EventBus, SyncEvent, SyncOperation, SyncStatus};
use crate::merge::{plan_merge, MergeContext, MergeOptions, MergeReport};
use crate::normalize::{normalize_batch, normalize_deletions};
use crate::store::LocalStore;
use crate::transport::{Ack, SyncTransport, TransportError};

use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

/// Default minimum spacing between automatically recorded versions.
pub const DEFAULT_MIN_VERSION_INTERVAL: Duration = Duration::from_millis(5000);

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

pub type Result<T> = std::result::Result<T, SyncError>;

pub struct SyncEngine<T: SyncTransport> {
    transport: T,
    clock: Arc<dyn Clock>,
    options: MergeOptions,
    min_version_interval: Duration,
    events: Arc<EventBus>,
    status: Mutex<SyncStatus>,
}

impl<T: SyncTransport> SyncEngine<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            clock: Arc::new(SystemClock),
            options: MergeOptions::default(),
            min_version_interval: DEFAULT_MIN_VERSION_INTERVAL,
            events: Arc::new(EventBus::new()),
            status: Mutex::new(SyncStatus::Idle),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_options(mut self, options: MergeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_min_version_interval(mut self, interval: Duration) -> Self {
        self.min_version_interval = interval;
        self
    }

    /// Share an existing bus (e.g. one the UI already subscribed to).
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn status(&self) -> SyncStatus {
        *self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_status(&self, status: SyncStatus) {
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = status;
        self.events.emit(SyncEvent::StatusChanged { status });
    }

    fn begin(&self, operation: SyncOperation) {
        self.set_status(SyncStatus::Syncing);
        self.events.emit(SyncEvent::SyncStarted {
            operation,
            timestamp: self.clock.now(),
        });
    }

    fn finish(&self, operation: SyncOperation, report: &MergeReport, active_id: Option<&str>) {
        self.events.emit(SyncEvent::ViewRefreshRequested {
            active_id: active_id.map(str::to_string),
        });
        self.events.emit(SyncEvent::SyncCompleted {
            operation,
            local_updates: report.local_updates,
            server_updates: report.server_updates,
            conflicts: report.conflicts,
            timestamp: self.clock.now(),
        });
        self.set_status(SyncStatus::Saved);
    }

    fn fail(&self, operation: SyncOperation, error: &SyncError) {
        tracing::warn!("{:?} failed: {}", operation, error);
        self.events.emit(SyncEvent::SyncFailed {
            operation,
            error: error.to_string(),
            timestamp: self.clock.now(),
        });
        self.set_status(SyncStatus::Failed);
    }

    /// Two-way sync: merge the server's notes into `store` and upload what
    /// the server is missing.
    pub async fn sync_now(&self, store: &mut LocalStore) -> Result<MergeReport> {
        let operation = SyncOperation::Sync;
        self.begin(operation);
        tracing::info!(
            "Sync started: {} local notes, active {:?}",
            store.len(),
            store.active_id()
        );
        store.record_versions(self.clock.now(), self.min_version_interval);

        match self.run_sync(store).await {
            Ok(report) => {
                tracing::info!(
                    "Sync completed: {} local updates, {} server updates, {} conflicts, {} dropped",
                    report.local_updates,
                    report.server_updates,
                    report.conflicts,
                    report.dropped
                );
                self.finish(operation, &report, store.active_id());
                Ok(report)
            }
            Err(e) => {
                self.fail(operation, &e);
                Err(e)
            }
        }
    }

    async fn run_sync(&self, store: &mut LocalStore) -> Result<MergeReport> {
        if !store.deleted_memos().is_empty() {
            let deletions = store.deleted_memos().records();
            tracing::debug!("Reporting {} deletions", deletions.len());
            self.transport.report_deletions(deletions).await?;
        }

        let snapshot = self.transport.fetch_remote_notes().await?;
        let now = self.clock.now();
        let remote = normalize_batch(&snapshot.notes, now);
        let server_deleted = normalize_deletions(&snapshot.server_deleted, now);
        tracing::debug!(
            "Fetched {} remote notes, {} server deletions",
            remote.len(),
            server_deleted.len()
        );

        let ctx = MergeContext::new(now).with_options(self.options);
        let plan = plan_merge(store, remote, &server_deleted, &ctx);

        if !plan.uploads.is_empty() {
            tracing::debug!("Pushing {} notes", plan.uploads.len());
            self.transport.push_notes(&plan.uploads).await?;
        }

        let report = plan.report.clone();
        for outcome in &report.outcomes {
            self.events.emit(SyncEvent::NoteMerged {
                note_id: outcome.id.clone(),
                outcome: outcome.outcome.clone(),
            });
        }
        store.apply_merge(plan, self.clock.now());
        Ok(report)
    }

    /// Discard local notes and take the server's set wholesale.
    ///
    /// The deletion ledger is not consulted. Returns the number of notes received.
    pub async fn replace_local_with_remote(&self, store: &mut LocalStore) -> Result<usize> {
        let operation = SyncOperation::ReplaceLocal;
        self.begin(operation);
        tracing::info!("Replace local with remote started");

        let snapshot = match self.transport.fetch_remote_notes().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                let e = SyncError::from(e);
                self.fail(operation, &e);
                return Err(e);
            }
        };
        let now = self.clock.now();
        let notes = normalize_batch(&snapshot.notes, now);
        let count = notes.len();
        store.replace_notes(notes, now);

        tracing::info!("Replace local with remote completed: {} notes", count);
        let report = MergeReport {
            local_updates: count,
            ..MergeReport::default()
        };
        self.finish(operation, &report, store.active_id());
        Ok(count)
    }

    /// Overwrite the server's note set with the local one.
    pub async fn replace_remote_with_local(&self, store: &mut LocalStore) -> Result<Ack> {
        let operation = SyncOperation::ReplaceRemote;
        self.begin(operation);
        tracing::info!("Replace remote with local started: {} notes", store.len());
        store.record_all_versions(self.clock.now());

        match self.transport.replace_remote_notes(store.notes()).await {
            Ok(ack) => {
                tracing::info!("Replace remote with local completed: {:?} received", ack.received);
                let report = MergeReport {
                    server_updates: store.len(),
                    ..MergeReport::default()
                };
                self.finish(operation, &report, store.active_id());
                Ok(ack)
            }
            Err(e) => {
                let e = SyncError::from(e);
                self.fail(operation, &e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ledger::{DeletionLedger, DeletionRecord};
    use crate::merge::Outcome;
    use crate::note::Note;
    use crate::transport::InMemoryRemote;
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn engine(remote: InMemoryRemote) -> (SyncEngine<InMemoryRemote>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start()));
        let engine = SyncEngine::new(remote).with_clock(clock.clone());
        (engine, clock)
    }

    fn store(notes: Vec<Note>) -> LocalStore {
        LocalStore::from_parts(notes, DeletionLedger::new(), None)
    }

    fn collect_events(engine: &SyncEngine<InMemoryRemote>) -> (Arc<Mutex<Vec<SyncEvent>>>, crate::events::Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let sub = engine.events().subscribe(move |event| {
            seen_clone.lock().unwrap().push(event);
        });
        (seen, sub)
    }

    #[tokio::test]
    async fn test_first_sync_uploads_everything() {
        let (engine, _) = engine(InMemoryRemote::new());
        let mut local = store(vec![Note::with_id("a", "A", "hello", start())]);

        let report = engine.sync_now(&mut local).await.unwrap();

        assert_eq!(report.server_updates, 1);
        assert_eq!(engine.transport().notes().len(), 1);
        assert_eq!(engine.status(), SyncStatus::Saved);
    }

    #[tokio::test]
    async fn test_second_sync_is_noop() {
        let (engine, _) = engine(InMemoryRemote::new());
        let mut local = store(vec![Note::with_id("a", "A", "hello", start())]);
        engine.sync_now(&mut local).await.unwrap();
        let before = local.notes().to_vec();

        let report = engine.sync_now(&mut local).await.unwrap();

        assert!(report.is_noop());
        assert_eq!(local.notes(), before.as_slice());
        assert_eq!(engine.transport().push_count(), 1);
    }

    #[tokio::test]
    async fn test_sync_records_active_edits_before_comparing() {
        let (engine, clock) = engine(InMemoryRemote::new());
        let mut local = store(vec![Note::with_id("a", "A", "v0", start())]);
        engine.sync_now(&mut local).await.unwrap();

        clock.advance(Duration::from_secs(1));
        local.set_text("a", "v1", clock.now()).unwrap();
        let report = engine.sync_now(&mut local).await.unwrap();

        assert_eq!(report.outcome_of("a"), Some(&Outcome::FastForwardLocal));
        let remote = engine.transport().notes();
        assert_eq!(remote[0].text, "v1");
        assert_eq!(remote[0].versions.len(), 2);
    }

    #[tokio::test]
    async fn test_offline_sync_leaves_notes_unchanged() {
        let remote = InMemoryRemote::new();
        remote.set_offline(true);
        let (engine, _) = engine(remote);
        let (events, _sub) = collect_events(&engine);
        let mut local = store(vec![Note::with_id("a", "A", "hello", start())]);
        let before = local.notes().to_vec();

        let result = engine.sync_now(&mut local).await;

        assert!(matches!(result, Err(SyncError::Transport(TransportError::Network(_)))));
        assert_eq!(local.notes(), before.as_slice());
        assert_eq!(engine.status(), SyncStatus::Failed);
        let events = events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(e, SyncEvent::SyncFailed { .. })));
        assert!(!events.iter().any(|e| matches!(e, SyncEvent::SyncCompleted { .. })));
    }

    #[tokio::test]
    async fn test_conflict_round_trip() {
        let base = Note::with_id("a", "Plan", "base", start());
        let remote = InMemoryRemote::new();
        let mut theirs = base.clone();
        theirs.set_text("theirs", start());
        theirs.record_version(start(), Duration::ZERO, true);
        remote.push_notes(&[theirs.clone()]).await.unwrap();

        let (engine, clock) = engine(remote);
        let mut local = store(vec![base]);
        clock.advance(Duration::from_secs(10));
        local.set_text("a", "mine", clock.now()).unwrap();

        let report = engine.sync_now(&mut local).await.unwrap();
        assert_eq!(report.conflicts, 1);

        let Some(Outcome::Conflict { copy_id }) = report.outcome_of("a") else {
            panic!("expected conflict");
        };
        assert_eq!(local.get("a").unwrap().text, "theirs");
        assert_eq!(local.get(copy_id).unwrap().text, "mine");
        assert_eq!(local.active_id(), Some(copy_id.as_str()));

        let server_ids: Vec<String> = engine.transport().notes().into_iter().map(|n| n.id).collect();
        assert!(server_ids.contains(copy_id));
        assert_eq!(server_ids.len(), 2);
    }

    #[tokio::test]
    async fn test_deletion_is_reported_and_sticky() {
        let (engine, _) = engine(InMemoryRemote::new());
        let mut local = store(vec![
            Note::with_id("a", "A", "keep", start()),
            Note::with_id("b", "B", "drop", start()),
        ]);
        engine.sync_now(&mut local).await.unwrap();

        local.delete_note("b", start()).unwrap();
        engine.sync_now(&mut local).await.unwrap();

        assert!(local.get("b").is_none());
        assert!(engine.transport().notes().iter().all(|n| n.id != "b"));
        assert_eq!(engine.transport().deletions().len(), 1);
    }

    #[tokio::test]
    async fn test_server_deletions_propagate() {
        let (engine, _) = engine(InMemoryRemote::new());
        let mut local = store(vec![
            Note::with_id("a", "A", "keep", start()),
            Note::with_id("b", "B", "gone", start()),
        ]);
        engine.sync_now(&mut local).await.unwrap();

        engine.transport().delete_remote(DeletionRecord {
            id: "b".into(),
            deleted_at: start(),
        });
        engine.sync_now(&mut local).await.unwrap();

        assert!(local.get("b").is_none());
        assert!(local.deleted_memos().is_deleted("b"));
        assert!(engine.transport().notes().iter().all(|n| n.id != "b"));
    }

    #[tokio::test]
    async fn test_malformed_remote_notes_are_normalized() {
        let remote = InMemoryRemote::with_raw_notes(vec![json!({"id": "x", "text": "raw"}), json!(17)]);
        let (engine, _) = engine(remote);
        let mut local = LocalStore::new();

        let report = engine.sync_now(&mut local).await.unwrap();

        assert_eq!(report.local_updates, 2);
        let x = local.get("x").unwrap();
        assert_eq!(x.title, "Untitled");
        assert_eq!(x.version_ids(), vec!["x-v0"]);
        assert_eq!(local.active_id(), Some("x"));
    }

    #[tokio::test]
    async fn test_replace_local_with_remote() {
        let remote = InMemoryRemote::new();
        remote
            .push_notes(&[Note::with_id("r", "R", "remote", start())])
            .await
            .unwrap();
        let (engine, _) = engine(remote);
        let mut local = store(vec![Note::with_id("a", "A", "local", start())]);
        local.delete_note("a", start()).unwrap();

        let count = engine.replace_local_with_remote(&mut local).await.unwrap();

        assert_eq!(count, 1);
        assert_eq!(local.len(), 1);
        assert_eq!(local.active_id(), Some("r"));
        assert_eq!(local.deleted_memos().len(), 1);
    }

    #[tokio::test]
    async fn test_replace_local_resets_active_to_first_remote_note() {
        let remote = InMemoryRemote::new();
        remote
            .push_notes(&[
                Note::with_id("r1", "R1", "remote", start()),
                Note::with_id("b", "B", "remote b", start()),
            ])
            .await
            .unwrap();
        let (engine, _) = engine(remote);
        let mut local = store(vec![
            Note::with_id("a", "A", "local", start()),
            Note::with_id("b", "B", "local b", start()),
        ]);
        local.switch_note("b", start()).unwrap();

        engine.replace_local_with_remote(&mut local).await.unwrap();

        assert_eq!(local.active_id(), Some("r1"));
        assert_eq!(local.get("b").unwrap().text, "remote b");
    }

    #[tokio::test]
    async fn test_replace_remote_versions_every_note() {
        let (engine, _) = engine(InMemoryRemote::new());
        let mut local = store(vec![
            Note::with_id("a", "A", "a0", start()),
            Note::with_id("b", "B", "b0", start()),
        ]);
        assert_eq!(local.active_id(), Some("a"));
        local.set_text("b", "b-edited", start()).unwrap();

        engine.replace_remote_with_local(&mut local).await.unwrap();

        let server = engine.transport().notes();
        let b = server.iter().find(|n| n.id == "b").unwrap();
        assert_eq!(b.text, "b-edited");
        assert_eq!(b.versions.len(), 2);
        assert_eq!(b.last_version().unwrap().text, "b-edited");
    }

    #[tokio::test]
    async fn test_replace_remote_with_local() {
        let remote = InMemoryRemote::new();
        remote
            .push_notes(&[Note::with_id("r", "R", "remote", start())])
            .await
            .unwrap();
        let (engine, _) = engine(remote);
        let (events, _sub) = collect_events(&engine);
        let mut local = store(vec![Note::with_id("a", "A", "local", start())]);
        local.set_text("a", "edited", start()).unwrap();

        let ack = engine.replace_remote_with_local(&mut local).await.unwrap();

        assert_eq!(ack.received, Some(1));
        let server = engine.transport().notes();
        assert_eq!(server.len(), 1);
        assert_eq!(server[0].text, "edited");
        assert_eq!(server[0].versions.len(), 2);

        let events = events.lock().unwrap();
        assert!(matches!(
            events.first(),
            Some(SyncEvent::StatusChanged {
                status: SyncStatus::Syncing
            })
        ));
        assert!(matches!(
            events.last(),
            Some(SyncEvent::StatusChanged {
                status: SyncStatus::Saved
            })
        ));
    }
}
