use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::Path;

use crate::config::StatePaths;
use crate::error::PersistenceError;
use crate::process::pid_alive;
use crate::util::fs::{atomic_write, read_json, write_json};

/// A heartbeat older than this marks the daemon as not running.
pub const STALE_AFTER: TimeDelta = TimeDelta::seconds(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DaemonStatus {
    Running,
    Stopping,
    Stopped,
}

/// Liveness snapshot in `.nightshift/daemon.json`, written only by the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonState {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub active_tasks: usize,
    pub total_executed: u64,
    pub total_cost_usd: f64,
    pub status: DaemonStatus,
}

impl DaemonState {
    pub fn new(pid: u32, now: DateTime<Utc>) -> Self {
        Self {
            pid,
            started_at: now,
            last_heartbeat: now,
            active_tasks: 0,
            total_executed: 0,
            total_cost_usd: 0.0,
            status: DaemonStatus::Running,
        }
    }

    pub fn heartbeat_age(&self, now: DateTime<Utc>) -> TimeDelta {
        now - self.last_heartbeat
    }
}

/// Alive iff not stopped, the pid exists and the heartbeat is fresh.
pub fn is_daemon_running(state: &DaemonState, now: DateTime<Utc>) -> bool {
    state.status != DaemonStatus::Stopped
        && pid_alive(state.pid)
        && state.heartbeat_age(now) <= STALE_AFTER
}

pub async fn read_daemon_state(paths: &StatePaths) -> Option<DaemonState> {
    read_json(&paths.daemon_state_file()).await
}

pub async fn write_daemon_state(
    paths: &StatePaths,
    state: &DaemonState,
) -> Result<(), PersistenceError> {
    write_json(&paths.daemon_state_file(), state).await
}

pub async fn write_pid_file(paths: &StatePaths, pid: u32) -> Result<(), PersistenceError> {
    atomic_write(&paths.pid_file(), pid.to_string().as_bytes()).await
}

pub async fn read_pid_file(paths: &StatePaths) -> Option<u32> {
    let raw = tokio::fs::read_to_string(paths.pid_file()).await.ok()?;
    raw.trim().parse().ok()
}

pub async fn remove_pid_file(paths: &StatePaths) {
    remove_quietly(&paths.pid_file()).await;
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != ErrorKind::NotFound
    {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove file");
    }
}

/// Rewrite a dead daemon's state as stopped and drop its pid file.
/// Returns whether anything was cleaned up.
pub async fn cleanup_stale_state(paths: &StatePaths, now: DateTime<Utc>) -> bool {
    let Some(mut state) = read_daemon_state(paths).await else {
        return false;
    };
    if state.status == DaemonStatus::Stopped || is_daemon_running(&state, now) {
        return false;
    }
    tracing::info!(pid = state.pid, "cleaning up stale daemon state");
    remove_pid_file(paths).await;
    state.status = DaemonStatus::Stopped;
    if let Err(e) = write_daemon_state(paths, &state).await {
        tracing::warn!(error = %e, "failed to rewrite stale daemon state");
    }
    true
}
