//! Deletion ledger: ids of notes removed locally (or by server propagation).
//!
//! Entries are never erased, so a later sync cannot resurrect a note the
//! user deleted.

use crate::clock::parse_timestamp;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// One deleted note id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionRecord {
    pub id: String,
    pub deleted_at: DateTime<Utc>,
}

impl DeletionRecord {
    /// Read a record from an untrusted `{id, deletedAt}` object.
    ///
    /// Returns None when the id is missing; a missing or bad timestamp becomes `now`.
    pub fn from_raw(raw: &Value, now: DateTime<Utc>) -> Option<Self> {
        let id = raw.get("id")?.as_str().filter(|id| !id.is_empty())?;
        let deleted_at = raw
            .get("deletedAt")
            .or_else(|| raw.get("deleted_at"))
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
            .unwrap_or(now);
        Some(Self {
            id: id.to_string(),
            deleted_at,
        })
    }
}

/// Append-only set of deletion records keyed by note id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<DeletionRecord>", into = "Vec<DeletionRecord>")]
pub struct DeletionLedger {
    records: Vec<DeletionRecord>,
    index: HashSet<String>,
}

impl DeletionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember that `id` was deleted. No-op (returns false) if already present.
    pub fn record(&mut self, id: &str, deleted_at: DateTime<Utc>) -> bool {
        if !self.index.insert(id.to_string()) {
            return false;
        }
        self.records.push(DeletionRecord {
            id: id.to_string(),
            deleted_at,
        });
        true
    }

    pub fn is_deleted(&self, id: &str) -> bool {
        self.index.contains(id)
    }

    pub fn get(&self, id: &str) -> Option<&DeletionRecord> {
        if !self.is_deleted(id) {
            return None;
        }
        self.records.iter().find(|r| r.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeletionRecord> {
        self.records.iter()
    }

    pub fn records(&self) -> &[DeletionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl From<Vec<DeletionRecord>> for DeletionLedger {
    fn from(records: Vec<DeletionRecord>) -> Self {
        let mut ledger = Self::new();
        for record in records {
            ledger.record(&record.id, record.deleted_at);
        }
        ledger
    }
}

impl From<DeletionLedger> for Vec<DeletionRecord> {
    fn from(ledger: DeletionLedger) -> Self {
        ledger.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_record_is_idempotent() {
        let mut ledger = DeletionLedger::new();
        assert!(ledger.record("x", t(0)));
        assert!(!ledger.record("x", t(10)));

        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.get("x").unwrap().deleted_at, t(0));
    }

    #[test]
    fn test_membership() {
        let mut ledger = DeletionLedger::new();
        ledger.record("x", t(0));
        assert!(ledger.is_deleted("x"));
        assert!(!ledger.is_deleted("y"));
    }

    #[test]
    fn test_serde_round_trip_dedupes() {
        let raw = json!([
            {"id": "x", "deletedAt": "2024-01-01T00:00:00Z"},
            {"id": "x", "deletedAt": "2024-02-01T00:00:00Z"},
            {"id": "y", "deletedAt": "2024-03-01T00:00:00Z"}
        ]);
        let ledger: DeletionLedger = serde_json::from_value(raw).unwrap();
        assert_eq!(ledger.len(), 2);
        assert!(ledger.is_deleted("y"));

        let back = serde_json::to_value(&ledger).unwrap();
        assert_eq!(back.as_array().unwrap().len(), 2);
        assert_eq!(back[0]["id"], "x");
    }

    #[test]
    fn test_from_raw_is_lenient() {
        let record = DeletionRecord::from_raw(&json!({"id": "x"}), t(5)).unwrap();
        assert_eq!(record.deleted_at, t(5));

        let record =
            DeletionRecord::from_raw(&json!({"id": "x", "deleted_at": "2024-01-01T00:00:00Z"}), t(5))
                .unwrap();
        assert_eq!(record.deleted_at, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());

        assert!(DeletionRecord::from_raw(&json!({"deletedAt": "2024-01-01"}), t(5)).is_none());
        assert!(DeletionRecord::from_raw(&json!({"id": 7}), t(5)).is_none());
        assert!(DeletionRecord::from_raw(&json!(null), t(5)).is_none());
    }
}
