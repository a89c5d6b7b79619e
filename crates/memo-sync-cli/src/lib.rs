//! memo-sync-cli library: the headless client behind the `memo-sync` binary.
//!
//! Exposed as a library so integration tests can drive `App` directly.

pub mod app;
pub mod file_kv;

pub use app::{engine_with, http_engine, save_token, App, NoteSummary, StatusReport};
pub use file_kv::FileKv;
