use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::error::PersistenceError;

/// One line of `code-agent-runs.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLogEntry {
    /// RFC 3339 timestamp of the run's end.
    pub date: String,
    pub category: String,
    pub mr_url: Option<String>,
    pub cost_usd: f64,
    pub duration_seconds: u64,
    pub summary: String,
}

/// Append `entry` as a single JSON line, creating the file if needed.
pub async fn append_run_log(path: &Path, entry: &RunLogEntry) -> Result<(), PersistenceError> {
    let write_err = |source| PersistenceError::Write {
        path: path.display().to_string(),
        source,
    };
    let mut line = serde_json::to_string(entry).map_err(|source| PersistenceError::Encode {
        path: path.display().to_string(),
        source,
    })?;
    line.push('\n');

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(write_err)?;
    file.write_all(line.as_bytes()).await.map_err(write_err)?;
    file.flush().await.map_err(write_err)
}
