//! memo-sync-core: offline-first note store with version-chain sync.
//!
//! This crate provides the core functionality for:
//! - Notes with append-only version chains
//! - Normalizing untrusted note payloads
//! - Merging a local store with a remote snapshot by version-id prefix
//! - Running syncs against a `SyncTransport`
//! - Persisting the store through a `KeyValueStore`
//! - JSON import/export and client configuration

pub mod clock;
pub mod config;
pub mod engine;
pub mod events;
pub mod import_export;
pub mod ledger;
pub mod merge;
pub mod normalize;
pub mod note;
pub mod persistence;
pub mod store;
pub mod transport;
pub mod version;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, MemoConfig};
pub use engine::{SyncEngine, SyncError};
pub use events::{EventBus, Subscription, SyncEvent, SyncOperation, SyncStatus};
pub use import_export::{ExportPayload, ExportScope, ImportError, ImportReport};
pub use ledger::{DeletionLedger, DeletionRecord};
pub use merge::{plan_merge, MergeContext, MergeOptions, MergePlan, MergeReport, Outcome};
pub use note::{Note, NoteError};
pub use persistence::{InMemoryKv, KeyValueStore, PersistError, StorePersister};
pub use store::{LocalStore, StoreError};
pub use transport::{Ack, InMemoryRemote, RemoteSnapshot, SyncTransport, TransportError};
pub use version::{ChainRelation, Version};
