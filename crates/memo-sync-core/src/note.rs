//! Note: metadata plus version chain, the unit of storage and transfer.

use crate::clock::new_id;
use crate::version::{self, Version};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Title given to notes created by the user or by bootstrap.
pub const NEW_NOTE_TITLE: &str = "New Memo";
/// Title used whenever a note has none.
pub const UNTITLED: &str = "Untitled";

#[derive(Debug, Error)]
pub enum NoteError {
    #[error("Version not found: {0}")]
    VersionNotFound(String),
}

/// A titled, versioned text document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub title: String,
    /// Latest content; mirrors the last version's text once versioned
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub versions: Vec<Version>,
}

/// Synthesized id for the version at `index` of note `note_id`.
///
/// Deterministic so that backfilling the same note twice (here or on another
/// device) yields the same chain.
pub(crate) fn synthetic_version_id(note_id: &str, index: usize) -> String {
    format!("{}-v{}", note_id, index)
}

impl Note {
    /// Create a note with a single version holding `text`.
    pub fn new(title: impl Into<String>, text: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::with_id(new_id(), title, text, now)
    }

    pub fn with_id(
        id: impl Into<String>,
        title: impl Into<String>,
        text: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let id = id.into();
        let text = text.into();
        let versions = vec![Version::new(synthetic_version_id(&id, 0), text.clone(), now)];
        Self {
            id,
            title: title.into(),
            text,
            created_at: now,
            updated_at: now,
            versions,
        }
    }

    /// Id sequence of this note's chain.
    pub fn version_ids(&self) -> Vec<&str> {
        version::identifiers(&self.versions)
    }

    pub fn last_version(&self) -> Option<&Version> {
        self.versions.last()
    }

    /// Backfill an empty chain with one version derived from the current text.
    ///
    /// Returns true if a version was synthesized.
    pub fn ensure_versioning(&mut self) -> bool {
        if !self.versions.is_empty() {
            return false;
        }
        self.versions.push(Version::new(
            synthetic_version_id(&self.id, 0),
            self.text.clone(),
            self.updated_at,
        ));
        true
    }

    /// Append a version if the text changed since the last recorded one.
    ///
    /// Unless `force` is set, nothing is appended until `min_interval` has
    /// elapsed since the last recorded version. Returns true if appended.
    pub fn record_version(&mut self, now: DateTime<Utc>, min_interval: Duration, force: bool) -> bool {
        if self.ensure_versioning() {
            return false;
        }
        let Some(last) = self.versions.last() else {
            return false;
        };
        if last.text == self.text {
            return false;
        }
        if !force {
            // Clock skew (last version in the future) counts as no time elapsed
            let elapsed = now
                .signed_duration_since(last.created_at)
                .to_std()
                .unwrap_or(Duration::ZERO);
            if elapsed < min_interval {
                return false;
            }
        }
        // Appended ids must be globally unique: two devices extending the same
        // chain must never mint the same id for different content.
        self.versions.push(Version::new(new_id(), self.text.clone(), now));
        true
    }

    /// Replace the working text (editor write). Returns true if it changed.
    pub fn set_text(&mut self, text: impl Into<String>, now: DateTime<Utc>) -> bool {
        let text = text.into();
        if text == self.text {
            return false;
        }
        self.text = text;
        self.updated_at = now;
        true
    }

    /// Rename; a blank title becomes "Untitled".
    pub fn rename(&mut self, title: &str, now: DateTime<Utc>) {
        let trimmed = title.trim();
        self.title = if trimmed.is_empty() {
            UNTITLED.to_string()
        } else {
            trimmed.to_string()
        };
        self.updated_at = now;
    }

    /// Bring back the text of an earlier version.
    ///
    /// The current content is force-recorded first so nothing is lost.
    pub fn restore_version(&mut self, version_id: &str, now: DateTime<Utc>) -> Result<(), NoteError> {
        let restored = self
            .versions
            .iter()
            .find(|v| v.id == version_id)
            .map(|v| v.text.clone())
            .ok_or_else(|| NoteError::VersionNotFound(version_id.to_string()))?;
        self.record_version(now, Duration::ZERO, true);
        self.set_text(restored, now);
        Ok(())
    }

    /// Duplicate this note under a fresh id to preserve local edits that lost a conflict.
    pub fn conflict_copy(&self, now: DateTime<Utc>) -> Note {
        let mut copy = self.clone();
        copy.id = new_id();
        let base = if self.title.is_empty() { UNTITLED } else { &self.title };
        copy.title = format!("{} (Local copy {})", base, now.format("%Y-%m-%d %H:%M:%S"));
        copy.created_at = now;
        copy.updated_at = now;
        if copy.versions.is_empty() {
            copy.versions.push(Version::new(new_id(), copy.text.clone(), now));
        }
        copy
    }

    /// Overwrite every field with `other`'s (remote content becomes canonical).
    pub fn overwrite_with(&mut self, other: &Note) {
        self.clone_from(other);
    }
}
