//! File-backed key-value store using tokio::fs.
//!
//! Each key is one file under the data directory. Keys such as
//! `memo:notes:v3` become `memo_notes_v3.json`.

use async_trait::async_trait;
use memo_sync_core::persistence::{KeyValueStore, PersistError, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Key-value store rooted at a data directory
pub struct FileKv {
    base_path: PathBuf,
}

impl FileKv {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// File backing `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
            .collect();
        self.base_path.join(format!("{}.json", name))
    }
}

fn io_err(e: std::io::Error) -> PersistError {
    PersistError::Io(e.to_string())
}

#[async_trait]
impl KeyValueStore for FileKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(e)),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        fs::create_dir_all(&self.base_path).await.map_err(io_err)?;

        // Atomic replace: sibling temp file, then rename
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value).await.map_err(io_err)?;
        fs::rename(&tmp, &path).await.map_err(io_err)
    }

    async fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(e)),
        }
    }
}
