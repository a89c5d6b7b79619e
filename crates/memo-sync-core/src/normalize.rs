//! Repair untrusted note payloads into well-formed [`Note`]s.
//!
//! Import files, server responses and legacy storage all pass through here
//! before touching the typed model. Every function is total: malformed
//! fields are replaced with defaults, never rejected.

use crate::clock::{new_id, parse_timestamp};
use crate::ledger::DeletionRecord;
use crate::note::{synthetic_version_id, Note, UNTITLED};
use crate::version::Version;

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashSet;

fn str_field<'a>(raw: &'a Value, key: &str) -> Option<&'a str> {
    raw.get(key).and_then(Value::as_str)
}

fn time_field(raw: &Value, key: &str) -> Option<DateTime<Utc>> {
    str_field(raw, key).and_then(parse_timestamp)
}

/// Normalize a single note payload.
pub fn normalize_note(raw: &Value, now: DateTime<Utc>) -> Note {
    let id = str_field(raw, "id")
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(new_id);
    let title = str_field(raw, "title").unwrap_or(UNTITLED).to_string();
    let text = str_field(raw, "text").unwrap_or_default().to_string();

    let created = time_field(raw, "createdAt");
    let updated = time_field(raw, "updatedAt");
    let fallback = updated.or(created).unwrap_or(now);

    let versions = match raw.get("versions").and_then(Value::as_array) {
        Some(entries) if !entries.is_empty() => normalize_versions(&id, entries, &text, fallback),
        _ => vec![Version::new(synthetic_version_id(&id, 0), text.clone(), fallback)],
    };

    Note {
        id,
        title,
        text,
        created_at: created.unwrap_or(now),
        updated_at: updated.unwrap_or(now),
        versions,
    }
}

fn normalize_versions(
    note_id: &str,
    entries: &[Value],
    note_text: &str,
    fallback: DateTime<Utc>,
) -> Vec<Version> {
    let mut seen = HashSet::with_capacity(entries.len());
    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let mut id = str_field(entry, "id")
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| synthetic_version_id(note_id, index));
            // Ids must stay unique within the chain for prefix comparison to hold
            while !seen.insert(id.clone()) {
                id = new_id();
            }
            let text = str_field(entry, "text").unwrap_or(note_text);
            let created_at = time_field(entry, "createdAt").unwrap_or(fallback);
            Version::new(id, text, created_at)
        })
        .collect()
}

/// Normalize a note whose id must not collide with `taken`.
///
/// The final id is added to `taken`.
pub fn normalize_note_unique(raw: &Value, taken: &mut HashSet<String>, now: DateTime<Utc>) -> Note {
    let mut note = normalize_note(raw, now);
    while taken.contains(&note.id) {
        note.id = new_id();
    }
    taken.insert(note.id.clone());
    note
}

/// Normalize a batch; later duplicates of an id within the batch get fresh ids.
pub fn normalize_batch(raws: &[Value], now: DateTime<Utc>) -> Vec<Note> {
    let mut taken = HashSet::with_capacity(raws.len());
    raws.iter()
        .map(|raw| normalize_note_unique(raw, &mut taken, now))
        .collect()
}

/// Read a server deletion list, skipping entries without an id.
pub fn normalize_deletions(raws: &[Value], now: DateTime<Utc>) -> Vec<DeletionRecord> {
    raws.iter()
        .filter_map(|raw| DeletionRecord::from_raw(raw, now))
        .collect()
}
