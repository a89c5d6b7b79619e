//! Version chains: the append-only history of a note.
//!
//! Two chains are compared by their id sequences only. Because versions are
//! append-only and ids are unique within a note, "one chain is a literal
//! prefix of the other" means nothing diverged since the shared history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One immutable snapshot of a note's text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    /// Unique within the owning note
    pub id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Version {
    pub fn new(id: impl Into<String>, text: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            created_at,
        }
    }
}

/// Project a chain to its id sequence.
pub fn identifiers(versions: &[Version]) -> Vec<&str> {
    versions.iter().map(|v| v.id.as_str()).collect()
}

/// True iff `prefix` is an element-wise prefix of `full`.
///
/// The empty sequence is a prefix of every sequence.
pub fn is_prefix<T: PartialEq>(prefix: &[T], full: &[T]) -> bool {
    prefix.len() <= full.len() && prefix.iter().zip(full).all(|(a, b)| a == b)
}

/// How a local chain relates to a remote chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ChainRelation {
    /// Same ids in the same order
    Identical,
    /// Local is a strict prefix of remote
    RemoteAhead,
    /// Remote is a strict prefix of local
    LocalAhead,
    /// Neither is a prefix of the other
    Diverged,
}

impl ChainRelation {
    pub fn between<T: PartialEq>(local: &[T], remote: &[T]) -> Self {
        match (is_prefix(local, remote), is_prefix(remote, local)) {
            (true, true) => Self::Identical,
            (true, false) => Self::RemoteAhead,
            (false, true) => Self::LocalAhead,
            (false, false) => Self::Diverged,
        }
    }
}
