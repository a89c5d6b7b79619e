//! JSON import and export of notes.
//!
//! Export layout: `{app: "memo-pwa", schema: 2, exportedAt, notes}`.
//! Imports accept any document with a `notes` array; each entry is
//! normalized and gets a fresh id if its own is already taken.

use crate::normalize::normalize_note_unique;
use crate::note::Note;
use crate::store::LocalStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const EXPORT_APP: &str = "memo-pwa";
pub const EXPORT_SCHEMA: u32 = 2;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Invalid import format (missing notes array)")]
    MissingNotes,
}

pub type Result<T> = std::result::Result<T, ImportError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportScope {
    All,
    /// Only the active note
    Active,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportPayload {
    pub app: String,
    pub schema: u32,
    pub exported_at: DateTime<Utc>,
    pub notes: Vec<Note>,
}

/// Build the export document for `scope`.
pub fn export_payload(store: &LocalStore, scope: ExportScope, now: DateTime<Utc>) -> ExportPayload {
    let notes = match scope {
        ExportScope::All => store.notes().to_vec(),
        ExportScope::Active => store.active().cloned().into_iter().collect(),
    };
    ExportPayload {
        app: EXPORT_APP.to_string(),
        schema: EXPORT_SCHEMA,
        exported_at: now,
        notes,
    }
}

/// Suggested file name for an export.
pub fn export_file_name(store: &LocalStore, scope: ExportScope, now: DateTime<Utc>) -> String {
    match scope {
        ExportScope::All => format!("memo_all_{}.json", now.format("%Y-%m-%d")),
        ExportScope::Active => {
            let title = store.active().map(|n| n.title.as_str()).unwrap_or("memo");
            let safe: String = title
                .chars()
                .map(|c| if "\\/:*?\"<>|".contains(c) { '_' } else { c })
                .take(40)
                .collect();
            format!("memo_selected_{}.json", safe)
        }
    }
}

/// Parse an import document and return its raw note entries.
///
/// Nothing is mutated here; pass the result to [`LocalStore::import_notes`].
pub fn parse_import(text: &str) -> Result<Vec<Value>> {
    let parsed: Value = serde_json::from_str(text)?;
    match parsed.get("notes") {
        Some(Value::Array(notes)) => Ok(notes.clone()),
        _ => Err(ImportError::MissingNotes),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: usize,
    /// `(original id, stored id)` for entries whose id was already taken
    pub renamed_ids: Vec<(String, String)>,
}

impl LocalStore {
    /// Add imported notes. Ids already used by a live or deleted note are
    /// regenerated. The last imported note becomes active.
    pub fn import_notes(&mut self, raw_notes: &[Value], now: DateTime<Utc>) -> ImportReport {
        let mut taken = self.taken_ids();
        let mut report = ImportReport::default();
        let mut last_id = None;

        for raw in raw_notes {
            let original = raw.get("id").and_then(Value::as_str).map(str::to_string);
            let note = normalize_note_unique(raw, &mut taken, now);
            if let Some(original) = original.filter(|o| !o.is_empty() && *o != note.id) {
                tracing::debug!("Imported note {} renamed to {}", original, note.id);
                report.renamed_ids.push((original, note.id.clone()));
            }
            last_id = Some(note.id.clone());
            self.insert(note, now);
            report.imported += 1;
        }

        if let Some(id) = last_id {
            self.set_active(&id);
        }
        tracing::info!(
            "Imported {} notes ({} renamed)",
            report.imported,
            report.renamed_ids.len()
        );
        report
    }
}
