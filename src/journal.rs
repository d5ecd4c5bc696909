//! Pipeline event journal
//!
//! Appends JSON lines to `<cache>/journal.log`, one per dependency build,
//! project build and check completion. Cache hits are not journaled.

use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Journal file name inside the cache directory
pub const JOURNAL_FILE: &str = "journal.log";

/// Append-only JSON-lines event log
#[derive(Debug, Clone)]
pub struct Journal {
    enabled: bool,
    path: PathBuf,
}

impl Journal {
    /// Journal stored in `cache_dir`
    pub fn new(cache_dir: &Path, enabled: bool) -> Self {
        Self {
            enabled,
            path: cache_dir.join(JOURNAL_FILE),
        }
    }

    /// A journal that records nothing
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            path: PathBuf::new(),
        }
    }

    /// Journal file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record an event.
    ///
    /// IO failures are logged and dropped; the journal never fails a build.
    pub async fn record(&self, event: &str, data: serde_json::Value) {
        if !self.enabled {
            return;
        }

        let entry = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "event": event,
            "data": data,
        });

        let mut line = match serde_json::to_string(&entry) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to serialize journal event: {}", e);
                return;
            }
        };
        line.push('\n');

        if let Err(e) = self.append(&line).await {
            warn!("Failed to write journal {}: {}", self.path.display(), e);
        }
    }

    async fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
