//! Merge planning: reconcile the local note set with a remote snapshot.
//!
//! [`plan_merge`] is pure. It reads the store and returns a [`MergePlan`]
//! describing the resulting note set and the batch to upload; nothing
//! changes until [`LocalStore::apply_merge`] commits it. The sync engine
//! only commits after the upload succeeded.
//!
//! Histories are compared by version-id prefix:
//!
//! | local vs remote chain | result |
//! |---|---|
//! | identical | unchanged |
//! | local is a prefix | remote overwrites local |
//! | remote is a prefix | local is uploaded |
//! | neither | conflict copy of local, remote takes the original id |

use crate::ledger::DeletionRecord;
use crate::note::Note;
use crate::store::LocalStore;
use crate::version::ChainRelation;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Tunables for the merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeOptions {
    /// On identical histories, let the side with the newer `updatedAt` win
    /// (carries metadata-only edits such as renames).
    pub prefer_newer_on_identical_history: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct MergeContext {
    pub now: DateTime<Utc>,
    pub options: MergeOptions,
}

impl MergeContext {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            options: MergeOptions::default(),
        }
    }

    pub fn with_options(mut self, options: MergeOptions) -> Self {
        self.options = options;
        self
    }
}

/// What happened to one note during a merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Outcome {
    /// Remote-only note copied into the local set
    Inserted,
    /// Remote note ignored because it was deleted locally
    Dropped,
    Unchanged,
    /// Remote history extends local; remote content taken
    FastForwardRemote,
    /// Local history extends remote; local queued for upload
    FastForwardLocal,
    /// Histories diverged; local edits preserved under `copy_id`
    #[serde(rename_all = "camelCase")]
    Conflict { copy_id: String },
    /// Local note the remote has never seen
    LocalOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteOutcome {
    pub id: String,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    pub outcomes: Vec<NoteOutcome>,
    /// Notes changed or added locally
    pub local_updates: usize,
    /// Notes queued for upload
    pub server_updates: usize,
    pub conflicts: usize,
    pub dropped: usize,
}

impl MergeReport {
    pub fn outcome_of(&self, id: &str) -> Option<&Outcome> {
        self.outcomes.iter().find(|o| o.id == id).map(|o| &o.outcome)
    }

    /// True when neither side needs to change.
    pub fn is_noop(&self) -> bool {
        self.local_updates == 0 && self.server_updates == 0 && self.conflicts == 0
    }

    fn push(&mut self, id: &str, outcome: Outcome) {
        tracing::debug!("Merge outcome for {}: {:?}", id, outcome);
        self.outcomes.push(NoteOutcome {
            id: id.to_string(),
            outcome,
        });
    }
}

/// The result of [`plan_merge`], ready to be committed.
#[derive(Debug, Clone, PartialEq)]
pub struct MergePlan {
    /// Complete local note set after the merge
    pub notes: Vec<Note>,
    pub active_id: Option<String>,
    /// Server deletions not yet in the local ledger
    pub new_deletions: Vec<DeletionRecord>,
    /// Notes to push, unique by id
    pub uploads: Vec<Note>,
    pub report: MergeReport,
}

struct UploadBatch {
    notes: Vec<Note>,
    ids: HashSet<String>,
}

impl UploadBatch {
    fn new() -> Self {
        Self {
            notes: Vec::new(),
            ids: HashSet::new(),
        }
    }

    fn queue(&mut self, note: &Note) -> bool {
        if !self.ids.insert(note.id.clone()) {
            return false;
        }
        self.notes.push(note.clone());
        true
    }
}

/// Plan how `remote` merges into `store`.
///
/// `remote` must already be normalized and `store` versioned (every note
/// has a chain and the active note's pending edits are recorded).
pub fn plan_merge(
    store: &LocalStore,
    remote: Vec<Note>,
    server_deleted: &[DeletionRecord],
    ctx: &MergeContext,
) -> MergePlan {
    let ledger = store.deleted_memos();
    let mut report = MergeReport::default();

    // Server-side deletions remove the local note and join the ledger
    let mut new_deletions: Vec<DeletionRecord> = Vec::new();
    let mut deleted: HashSet<String> = ledger.iter().map(|r| r.id.clone()).collect();
    for record in server_deleted {
        if deleted.insert(record.id.clone()) {
            new_deletions.push(record.clone());
        }
    }

    let mut notes: Vec<Note> = store
        .notes()
        .iter()
        .filter(|n| !deleted.contains(&n.id))
        .cloned()
        .collect();
    let removed = store.len() - notes.len();
    if removed > 0 {
        tracing::info!("Removing {} notes deleted on the server", removed);
    }

    let mut active_id = store.active_id().map(str::to_string);
    let mut index: HashMap<String, usize> = notes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.clone(), i))
        .collect();
    let pre_existing: Vec<String> = notes.iter().map(|n| n.id.clone()).collect();
    let mut matched: HashSet<String> = HashSet::new();
    let mut uploads = UploadBatch::new();

    for remote_note in remote {
        if deleted.contains(&remote_note.id) {
            report.dropped += 1;
            report.push(&remote_note.id, Outcome::Dropped);
            continue;
        }

        let Some(&i) = index.get(&remote_note.id) else {
            report.local_updates += 1;
            report.push(&remote_note.id, Outcome::Inserted);
            index.insert(remote_note.id.clone(), notes.len());
            notes.push(remote_note);
            continue;
        };
        matched.insert(remote_note.id.clone());

        let local = &notes[i];
        let relation = ChainRelation::between(&local.version_ids(), &remote_note.version_ids());
        match relation {
            ChainRelation::Identical => {
                let prefer_newer = ctx.options.prefer_newer_on_identical_history;
                if prefer_newer && remote_note.updated_at > local.updated_at {
                    notes[i].overwrite_with(&remote_note);
                    report.local_updates += 1;
                    report.push(&remote_note.id, Outcome::FastForwardRemote);
                } else if prefer_newer && local.updated_at > remote_note.updated_at {
                    if uploads.queue(local) {
                        report.server_updates += 1;
                    }
                    report.push(&remote_note.id, Outcome::FastForwardLocal);
                } else {
                    report.push(&remote_note.id, Outcome::Unchanged);
                }
            }
            ChainRelation::RemoteAhead => {
                notes[i].overwrite_with(&remote_note);
                report.local_updates += 1;
                report.push(&remote_note.id, Outcome::FastForwardRemote);
            }
            ChainRelation::LocalAhead => {
                if uploads.queue(local) {
                    report.server_updates += 1;
                }
                report.push(&remote_note.id, Outcome::FastForwardLocal);
            }
            ChainRelation::Diverged => {
                let mut copy = local.conflict_copy(ctx.now);
                while index.contains_key(&copy.id) || deleted.contains(&copy.id) {
                    copy.id = crate::clock::new_id();
                }
                tracing::warn!(
                    "Conflict on note {}: local edits kept as {} ({})",
                    remote_note.id,
                    copy.id,
                    copy.title
                );

                if uploads.queue(&copy) {
                    report.server_updates += 1;
                }
                if active_id.as_deref() == Some(remote_note.id.as_str()) {
                    active_id = Some(copy.id.clone());
                }
                report.conflicts += 1;
                report.push(
                    &remote_note.id,
                    Outcome::Conflict {
                        copy_id: copy.id.clone(),
                    },
                );

                notes[i].overwrite_with(&remote_note);
                index.insert(copy.id.clone(), notes.len());
                notes.push(copy);
            }
        }
    }

    for id in pre_existing.iter().filter(|id| !matched.contains(*id)) {
        if let Some(&i) = index.get(id) {
            if uploads.queue(&notes[i]) {
                report.server_updates += 1;
            }
            report.push(id, Outcome::LocalOnly);
        }
    }

    let active_valid = active_id.as_deref().is_some_and(|id| index.contains_key(id));
    if !active_valid {
        active_id = notes.first().map(|n| n.id.clone());
    }

    MergePlan {
        notes,
        active_id,
        new_deletions,
        uploads: uploads.notes,
        report,
    }
}
