use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::PersistenceError;
use crate::util::fs::{read_json, write_json};

/// Last fire time per recurring task name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerState {
    #[serde(default)]
    pub last_runs: BTreeMap<String, DateTime<Utc>>,
}

impl SchedulerState {
    /// Missing or unreadable state starts empty.
    pub async fn load(path: &Path) -> Self {
        read_json(path).await.unwrap_or_default()
    }

    pub async fn save(&self, path: &Path) -> Result<(), PersistenceError> {
        write_json(path, self).await
    }

    pub fn last_run(&self, name: &str) -> Option<DateTime<Utc>> {
        self.last_runs.get(name).copied()
    }

    pub fn record(&mut self, name: &str, at: DateTime<Utc>) {
        self.last_runs.insert(name.to_string(), at);
    }
}
