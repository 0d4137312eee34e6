//! Local filesystem storage implementation.
//!
//! Persists the whole rule table as one pretty-printed JSON document:
//!
//! ```text
//! {
//!   "version": "1",
//!   "rules": [ { "id": "...", "name": "...", "interval": 60, ... } ]
//! }
//! ```
//!
//! Writes go to a sibling temp file which is then renamed over the target,
//! so a crash mid-write leaves the previous file intact.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::MonitorRule;
use crate::storage::{RuleRepository, RulesFile};

/// JSON file rule repository.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl LocalStorage {
    /// Create a LocalStorage backed by the given rules file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.ensure_dir().await?;

        let tmp = self.path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Read bytes, returning None if the file doesn't exist.
    async fn read_bytes(&self) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Read the rules document, if present.
    pub async fn read_file(&self) -> Result<Option<RulesFile>> {
        let Some(bytes) = self.read_bytes().await? else {
            return Ok(None);
        };
        let file: RulesFile = serde_json::from_slice(&bytes)?;
        if file.version != RulesFile::VERSION {
            return Err(AppError::validation(format!(
                "unsupported rules file version '{}' in {}",
                file.version,
                self.path.display()
            )));
        }
        Ok(Some(file))
    }

    pub async fn write_file(&self, file: &RulesFile) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(file)?;
        self.write_bytes(&bytes).await
    }
}

#[async_trait]
impl RuleRepository for LocalStorage {
    async fn load_rules(&self) -> Result<Vec<MonitorRule>> {
        let rules = self
            .read_file()
            .await?
            .map(|file| file.rules)
            .unwrap_or_default();
        log::debug!(
            "Loaded {} rules from {}",
            rules.len(),
            self.path.display()
        );
        Ok(rules)
    }

    async fn save_rules(&self, rules: &[MonitorRule]) -> Result<()> {
        self.write_file(&RulesFile::new(rules.to_vec())).await?;
        log::debug!("Saved {} rules to {}", rules.len(), self.path.display());
        Ok(())
    }
}
