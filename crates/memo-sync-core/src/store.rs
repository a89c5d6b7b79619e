//! LocalStore: the client's notes, deletion ledger and active-note pointer.
//!
//! One store per client instance, passed explicitly to every operation.
//! Every mutation bumps a revision counter so persistence can tell when a
//! flush is needed.

use crate::ledger::DeletionLedger;
use crate::merge::MergePlan;
use crate::note::{Note, NoteError, NEW_NOTE_TITLE};

use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Note not found: {0}")]
    NoteNotFound(String),

    #[error(transparent)]
    Note(#[from] NoteError),
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalStore {
    notes: Vec<Note>,
    deleted_memos: DeletionLedger,
    active_id: Option<String>,
    /// Bumped on every mutation; never persisted
    revision: u64,
    last_change_at: Option<DateTime<Utc>>,
}

impl LocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemble a store from loaded parts.
    ///
    /// Notes are assumed unique by id (the persister normalizes them first).
    /// An active id that matches no note falls back to the first note.
    pub fn from_parts(notes: Vec<Note>, deleted_memos: DeletionLedger, active_id: Option<String>) -> Self {
        let mut store = Self {
            notes,
            deleted_memos,
            active_id,
            revision: 0,
            last_change_at: None,
        };
        store.repair_active();
        store
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Note> {
        self.notes.iter().find(|n| n.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut Note> {
        self.notes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| StoreError::NoteNotFound(id.to_string()))
    }

    /// Notes ordered most recently updated first, the order a note picker shows.
    pub fn sorted_by_recency(&self) -> Vec<&Note> {
        let mut sorted: Vec<&Note> = self.notes.iter().collect();
        sorted.sort_by_key(|n| Reverse(n.updated_at));
        sorted
    }

    pub fn deleted_memos(&self) -> &DeletionLedger {
        &self.deleted_memos
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active_id.as_deref()
    }

    pub fn active(&self) -> Option<&Note> {
        self.active_id.as_deref().and_then(|id| self.get(id))
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn last_change_at(&self) -> Option<DateTime<Utc>> {
        self.last_change_at
    }

    /// Ids currently unavailable for new notes (live or deleted).
    pub fn taken_ids(&self) -> HashSet<String> {
        self.notes
            .iter()
            .map(|n| n.id.clone())
            .chain(self.deleted_memos.iter().map(|r| r.id.clone()))
            .collect()
    }

    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.revision += 1;
        self.last_change_at = Some(now);
    }

    fn repair_active(&mut self) {
        let valid = self
            .active_id
            .as_deref()
            .is_some_and(|id| self.notes.iter().any(|n| n.id == id));
        if !valid {
            self.active_id = self.notes.first().map(|n| n.id.clone());
        }
    }

    /// Ensure the store holds at least one note. Returns true if one was created.
    pub fn bootstrap(&mut self, title: &str, text: &str, now: DateTime<Utc>) -> bool {
        if !self.notes.is_empty() {
            return false;
        }
        let note = Note::new(title, text, now);
        self.active_id = Some(note.id.clone());
        self.notes.push(note);
        self.touch(now);
        tracing::info!("Bootstrapped store with note: {}", title);
        true
    }

    /// Create an empty "New Memo" at the top of the list and make it active.
    pub fn create_note(&mut self, now: DateTime<Utc>) -> &Note {
        let mut note = Note::new(NEW_NOTE_TITLE, "", now);
        while self.deleted_memos.is_deleted(&note.id) || self.contains(&note.id) {
            note.id = crate::clock::new_id();
        }
        tracing::debug!("Created note: {}", note.id);
        self.active_id = Some(note.id.clone());
        self.notes.insert(0, note);
        self.touch(now);
        &self.notes[0]
    }

    /// Add a note, regenerating its id if it collides with a live or deleted one.
    ///
    /// Returns the id the note was stored under.
    pub fn insert(&mut self, mut note: Note, now: DateTime<Utc>) -> String {
        while self.deleted_memos.is_deleted(&note.id) || self.contains(&note.id) {
            note.id = crate::clock::new_id();
        }
        note.ensure_versioning();
        let id = note.id.clone();
        self.notes.push(note);
        self.repair_active();
        self.touch(now);
        id
    }

    /// Remove a note and remember the deletion.
    ///
    /// The active pointer moves to the previous note in the list, else the
    /// first remaining note, else none.
    pub fn delete_note(&mut self, id: &str, now: DateTime<Utc>) -> Result<Note> {
        let index = self
            .notes
            .iter()
            .position(|n| n.id == id)
            .ok_or_else(|| StoreError::NoteNotFound(id.to_string()))?;
        let removed = self.notes.remove(index);
        self.deleted_memos.record(&removed.id, now);

        if self.active_id.as_deref() == Some(id) {
            self.active_id = self
                .notes
                .get(index.saturating_sub(1))
                .or_else(|| self.notes.first())
                .map(|n| n.id.clone());
        }
        self.touch(now);
        tracing::info!("Deleted note: {} ({} remaining)", id, self.notes.len());
        Ok(removed)
    }

    /// Make another note active, force-recording the outgoing note's content first.
    pub fn switch_note(&mut self, id: &str, now: DateTime<Utc>) -> Result<()> {
        if !self.contains(id) {
            return Err(StoreError::NoteNotFound(id.to_string()));
        }
        if self.active_id.as_deref() == Some(id) {
            return Ok(());
        }
        if let Some(current) = self.active_id.clone() {
            if let Ok(note) = self.get_mut(&current) {
                note.record_version(now, Duration::ZERO, true);
            }
        }
        self.active_id = Some(id.to_string());
        self.touch(now);
        Ok(())
    }

    /// Editor write into a note. Returns true if the text changed.
    pub fn set_text(&mut self, id: &str, text: impl Into<String>, now: DateTime<Utc>) -> Result<bool> {
        let changed = self.get_mut(id)?.set_text(text, now);
        if changed {
            self.touch(now);
        }
        Ok(changed)
    }

    pub fn rename(&mut self, id: &str, title: &str, now: DateTime<Utc>) -> Result<()> {
        self.get_mut(id)?.rename(title, now);
        self.touch(now);
        Ok(())
    }

    pub fn restore_version(&mut self, id: &str, version_id: &str, now: DateTime<Utc>) -> Result<()> {
        self.get_mut(id)?.restore_version(version_id, now)?;
        self.touch(now);
        Ok(())
    }

    /// Record a version of one note (see [`Note::record_version`]).
    pub fn record_version(
        &mut self,
        id: &str,
        now: DateTime<Utc>,
        min_interval: Duration,
        force: bool,
    ) -> Result<bool> {
        let note = self.get_mut(id)?;
        let backfilled = note.ensure_versioning();
        let appended = note.record_version(now, min_interval, force);
        if backfilled || appended {
            self.touch(now);
        }
        Ok(appended)
    }

    /// Version every note; the active note is force-recorded.
    ///
    /// Returns the number of versions appended.
    pub fn record_versions(&mut self, now: DateTime<Utc>, min_interval: Duration) -> usize {
        let active = self.active_id.clone();
        let mut changed = false;
        let mut appended = 0;
        for note in &mut self.notes {
            changed |= note.ensure_versioning();
            let force = active.as_deref() == Some(note.id.as_str());
            if note.record_version(now, min_interval, force) {
                appended += 1;
            }
        }
        if changed || appended > 0 {
            self.touch(now);
        }
        appended
    }

    /// Force a version for every note whose text moved past its last version.
    ///
    /// Returns the number of versions appended.
    pub fn record_all_versions(&mut self, now: DateTime<Utc>) -> usize {
        let mut changed = false;
        let mut appended = 0;
        for note in &mut self.notes {
            changed |= note.ensure_versioning();
            if note.record_version(now, Duration::ZERO, true) {
                appended += 1;
            }
        }
        if changed || appended > 0 {
            self.touch(now);
        }
        appended
    }

    /// Commit a merge plan computed by [`crate::merge::plan_merge`].
    pub fn apply_merge(&mut self, plan: MergePlan, now: DateTime<Utc>) {
        for record in &plan.new_deletions {
            self.deleted_memos.record(&record.id, record.deleted_at);
        }
        self.notes = plan.notes;
        self.active_id = plan.active_id;
        self.repair_active();
        self.touch(now);
    }

    /// Replace the whole note set. The ledger is left untouched.
    ///
    /// The active pointer resets to the first note, or none when empty.
    pub fn replace_notes(&mut self, notes: Vec<Note>, now: DateTime<Utc>) {
        self.active_id = notes.first().map(|n| n.id.clone());
        self.notes = notes;
        self.touch(now);
    }

    /// Point the active pointer at an existing note.
    pub(crate) fn set_active(&mut self, id: &str) {
        if self.contains(id) {
            self.active_id = Some(id.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn store_with(ids: &[&str]) -> LocalStore {
        let notes = ids.iter().map(|id| Note::with_id(*id, *id, "", t(0))).collect();
        LocalStore::from_parts(notes, DeletionLedger::new(), None)
    }

    #[test]
    fn test_from_parts_repairs_active_pointer() {
        let notes = vec![Note::with_id("a", "A", "", t(0))];
        let store = LocalStore::from_parts(notes, DeletionLedger::new(), Some("gone".into()));
        assert_eq!(store.active_id(), Some("a"));

        let empty = LocalStore::from_parts(vec![], DeletionLedger::new(), Some("gone".into()));
        assert_eq!(empty.active_id(), None);
    }

    #[test]
    fn test_bootstrap_only_when_empty() {
        let mut store = LocalStore::new();
        assert!(store.bootstrap(NEW_NOTE_TITLE, "", t(0)));
        assert!(!store.bootstrap(NEW_NOTE_TITLE, "", t(1)));
        assert_eq!(store.len(), 1);
        assert_eq!(store.active().unwrap().title, NEW_NOTE_TITLE);
        assert_eq!(store.revision(), 1);
    }

    #[test]
    fn test_create_note_goes_first_and_becomes_active() {
        let mut store = store_with(&["a"]);
        let id = store.create_note(t(1)).id.clone();
        assert_eq!(store.notes()[0].id, id);
        assert_eq!(store.active_id(), Some(id.as_str()));
        assert_eq!(store.notes()[0].versions.len(), 1);
    }

    #[test]
    fn test_delete_moves_pointer_to_previous() {
        let mut store = store_with(&["a", "b", "c"]);
        store.switch_note("c", t(1)).unwrap();

        store.delete_note("c", t(2)).unwrap();
        assert_eq!(store.active_id(), Some("b"));
        assert!(store.deleted_memos().is_deleted("c"));

        store.switch_note("a", t(3)).unwrap();
        store.delete_note("a", t(4)).unwrap();
        assert_eq!(store.active_id(), Some("b"));

        store.delete_note("b", t(5)).unwrap();
        assert_eq!(store.active_id(), None);
        assert_eq!(store.deleted_memos().len(), 3);
    }

    #[test]
    fn test_delete_unknown_note_fails() {
        let mut store = store_with(&["a"]);
        assert!(matches!(
            store.delete_note("zzz", t(1)),
            Err(StoreError::NoteNotFound(_))
        ));
        assert!(store.deleted_memos().is_empty());
    }

    #[test]
    fn test_switch_force_records_outgoing_note() {
        let mut store = store_with(&["a", "b"]);
        store.set_text("a", "edited", t(1)).unwrap();
        store.switch_note("b", t(2)).unwrap();

        let a = store.get("a").unwrap();
        assert_eq!(a.versions.len(), 2);
        assert_eq!(a.last_version().unwrap().text, "edited");
        assert_eq!(store.active_id(), Some("b"));
    }

    #[test]
    fn test_record_versions_forces_only_active() {
        let mut store = store_with(&["a", "b"]);
        store.set_text("a", "active edit", t(1)).unwrap();
        store.set_text("b", "idle edit", t(1)).unwrap();

        let appended = store.record_versions(t(2), Duration::from_secs(5));
        assert_eq!(appended, 1);
        assert_eq!(store.get("a").unwrap().versions.len(), 2);
        assert_eq!(store.get("b").unwrap().versions.len(), 1);
    }

    #[test]
    fn test_record_all_versions_forces_every_note() {
        let mut store = store_with(&["a", "b", "c"]);
        store.set_text("a", "active edit", t(1)).unwrap();
        store.set_text("b", "idle edit", t(1)).unwrap();

        let appended = store.record_all_versions(t(2));
        assert_eq!(appended, 2);
        assert_eq!(store.get("b").unwrap().last_version().unwrap().text, "idle edit");
        assert_eq!(store.get("c").unwrap().versions.len(), 1);
        assert_eq!(store.record_all_versions(t(3)), 0);
    }

    #[test]
    fn test_insert_avoids_live_and_deleted_ids() {
        let mut store = store_with(&["a", "b"]);
        store.delete_note("b", t(1)).unwrap();

        let first = store.insert(Note::with_id("a", "dup", "", t(2)), t(2));
        let second = store.insert(Note::with_id("b", "resurrect", "", t(2)), t(2));

        assert_ne!(first, "a");
        assert_ne!(second, "b");
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_revision_tracks_mutations() {
        let mut store = store_with(&["a"]);
        assert_eq!(store.revision(), 0);
        assert!(!store.set_text("a", "", t(1)).unwrap());
        assert_eq!(store.revision(), 0);

        store.set_text("a", "x", t(2)).unwrap();
        store.rename("a", "Title", t(3)).unwrap();
        assert_eq!(store.revision(), 2);
        assert_eq!(store.last_change_at(), Some(t(3)));
    }

    #[test]
    fn test_replace_notes_resets_active_to_first() {
        let mut store = store_with(&["a", "b"]);
        store.switch_note("b", t(1)).unwrap();

        store.replace_notes(vec![Note::with_id("c", "C", "", t(2)), Note::with_id("b", "B", "", t(2))], t(2));
        assert_eq!(store.active_id(), Some("c"));

        store.replace_notes(vec![Note::with_id("d", "D", "", t(3))], t(3));
        assert_eq!(store.active_id(), Some("d"));

        store.replace_notes(vec![], t(4));
        assert_eq!(store.active_id(), None);
    }

    #[test]
    fn test_sorted_by_recency() {
        let mut store = store_with(&["a", "b"]);
        store.set_text("a", "newer", t(10)).unwrap();
        let order: Vec<&str> = store.sorted_by_recency().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(order, vec!["a", "b"]);

        store.set_text("b", "newest", t(20)).unwrap();
        let order: Vec<&str> = store.sorted_by_recency().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(order, vec!["b", "a"]);
    }
}
