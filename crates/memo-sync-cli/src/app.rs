//! Headless client: a persisted store plus the operations the CLI exposes.

use anyhow::{Context, Result};
use chrono::Utc;
use memo_sync_core::import_export::{export_file_name, export_payload, parse_import};
use memo_sync_core::{
    ExportScope, ImportReport, KeyValueStore, LocalStore, MemoConfig, MergeReport, StorePersister,
    SyncEngine, SyncTransport,
};
use memo_sync_http::HttpTransport;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Per-request timeout for the HTTP transport.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Build an HTTP sync engine from the configured endpoint and token.
pub fn http_engine(config: &MemoConfig) -> Result<SyncEngine<HttpTransport>> {
    let endpoint = config
        .sync
        .endpoint
        .as_deref()
        .context("Sync endpoint is not set (use --endpoint or MEMO_SYNC_ENDPOINT)")?;
    let transport = HttpTransport::new(endpoint, config.sync.token.clone())?.with_timeout(REQUEST_TIMEOUT)?;
    Ok(engine_with(transport, config))
}

/// Wrap any transport in an engine tuned by `config`.
pub fn engine_with<T: SyncTransport>(transport: T, config: &MemoConfig) -> SyncEngine<T> {
    SyncEngine::new(transport)
        .with_options(config.merge)
        .with_min_version_interval(config.min_version_interval())
}

/// Store `token` in the config file at `path`.
///
/// The file is re-read so environment and command-line overrides are not
/// written back.
pub fn save_token(path: &Path, token: &str) -> Result<MemoConfig> {
    let mut config = MemoConfig::from_file(path)?;
    config.sync.token = Some(token.to_string());
    config.save(path)?;
    Ok(config)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteSummary {
    pub id: String,
    pub title: String,
    pub versions: usize,
    pub updated_at: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub notes: Vec<NoteSummary>,
    pub deleted: usize,
    pub endpoint: Option<String>,
}

pub struct App<K: KeyValueStore> {
    persister: StorePersister<K>,
    store: LocalStore,
    config: MemoConfig,
}

impl<K: KeyValueStore> App<K> {
    /// Load (or bootstrap) the store and write it back if loading changed it.
    pub async fn open(kv: K, config: MemoConfig) -> Result<Self> {
        let mut persister = StorePersister::new(kv).with_debounce(config.persist_debounce());
        let store = persister.load(Utc::now()).await.context("Failed to load notes")?;
        let mut app = Self {
            persister,
            store,
            config,
        };
        app.flush().await?;
        Ok(app)
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn config(&self) -> &MemoConfig {
        &self.config
    }

    pub async fn flush(&mut self) -> Result<bool> {
        self.persister
            .flush(&self.store)
            .await
            .context("Failed to save notes")
    }

    /// Two-way sync, then save. The store is saved even when the sync fails.
    pub async fn sync<T: SyncTransport>(&mut self, engine: &SyncEngine<T>) -> Result<MergeReport> {
        let result = engine.sync_now(&mut self.store).await;
        self.flush().await?;
        Ok(result?)
    }

    /// Replace local notes with the server's.
    pub async fn pull<T: SyncTransport>(&mut self, engine: &SyncEngine<T>) -> Result<usize> {
        let result = engine.replace_local_with_remote(&mut self.store).await;
        self.flush().await?;
        Ok(result?)
    }

    /// Replace the server's notes with the local ones.
    pub async fn push<T: SyncTransport>(&mut self, engine: &SyncEngine<T>) -> Result<Option<usize>> {
        let result = engine.replace_remote_with_local(&mut self.store).await;
        self.flush().await?;
        Ok(result?.received)
    }

    pub async fn import_file(&mut self, path: &Path) -> Result<ImportReport> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let raw = parse_import(&text).with_context(|| format!("Cannot import {}", path.display()))?;
        let report = self.store.import_notes(&raw, Utc::now());
        self.flush().await?;
        Ok(report)
    }

    /// Write an export file into `target` (a directory, or a file path ending in `.json`).
    pub async fn export_file(&self, scope: ExportScope, target: &Path) -> Result<PathBuf> {
        let now = Utc::now();
        let path = if target.extension().is_some_and(|ext| ext == "json") {
            target.to_path_buf()
        } else {
            target.join(export_file_name(&self.store, scope, now))
        };
        let payload = export_payload(&self.store, scope, now);
        let json = serde_json::to_string_pretty(&payload)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!("Exported {} notes to {}", payload.notes.len(), path.display());
        Ok(path)
    }

    pub fn status(&self) -> StatusReport {
        let active = self.store.active_id();
        let notes = self
            .store
            .sorted_by_recency()
            .into_iter()
            .map(|n| NoteSummary {
                id: n.id.clone(),
                title: n.title.clone(),
                versions: n.versions.len(),
                updated_at: n.updated_at.to_rfc3339(),
                active: active == Some(n.id.as_str()),
            })
            .collect();
        StatusReport {
            notes,
            deleted: self.store.deleted_memos().len(),
            endpoint: self.config.sync.endpoint.clone(),
        }
    }
}
