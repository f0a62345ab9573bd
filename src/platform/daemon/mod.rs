use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDate, TimeDelta, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

mod orchestrator;
mod state;

pub use orchestrator::Orchestrator;
pub use state::{
    DaemonState, DaemonStatus, STALE_AFTER, cleanup_stale_state, is_daemon_running,
    read_daemon_state, read_pid_file, remove_pid_file, write_daemon_state, write_pid_file,
};

use crate::agent::AgentTaskExecutor;
use crate::config::{Config, ConfigHandle, StatePaths};
use crate::queue::create_queue;

const DAEMON_LOG_PREFIX: &str = "daemon-";
const DAEMON_LOG_SUFFIX: &str = ".log";

/// Run the daemon in the foreground until SIGINT or SIGTERM.
pub async fn run(config_path: &Path) -> Result<()> {
    let config = Config::load(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let paths = StatePaths::new(&config.base_dir());

    cleanup_stale_state(&paths, Utc::now()).await;
    if let Some(existing) = read_daemon_state(&paths).await
        && is_daemon_running(&existing, Utc::now())
    {
        bail!("daemon already running (pid {})", existing.pid);
    }

    let removed = prune_daemon_logs(
        &paths.logs_dir(),
        config.daemon.log_retention_days,
        Local::now().date_naive(),
    );
    if removed > 0 {
        tracing::info!(removed, "pruned old daemon logs");
    }

    let queue = create_queue(&config, &paths);
    let handle = ConfigHandle::new(config);
    let executor = Arc::new(AgentTaskExecutor::new(handle.clone(), paths.clone()));
    let mut orchestrator = Orchestrator::new(handle, queue, executor);
    orchestrator.start().await?;

    let shutdown = CancellationToken::new();
    let force = CancellationToken::new();
    spawn_signal_watcher(shutdown.clone(), force.clone())?;
    orchestrator.run(shutdown, force).await;
    Ok(())
}

/// The first SIGINT or SIGTERM requests a graceful stop; a second one
/// cancels whatever is still running.
fn spawn_signal_watcher(shutdown: CancellationToken, force: CancellationToken) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    let mut terminate = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    tokio::spawn(async move {
        for (token, action) in [(shutdown, "shutting down"), (force, "forcing stop")] {
            let name = tokio::select! {
                _ = interrupt.recv() => "SIGINT",
                _ = terminate.recv() => "SIGTERM",
            };
            tracing::info!(signal = name, "{action}");
            token.cancel();
        }
    });
    Ok(())
}

/// Log file the daemon writes on `date`.
pub fn daemon_log_path(paths: &StatePaths, date: NaiveDate) -> PathBuf {
    paths.logs_dir().join(format!(
        "{DAEMON_LOG_PREFIX}{}{DAEMON_LOG_SUFFIX}",
        date.format("%Y-%m-%d")
    ))
}

/// Delete `daemon-YYYY-MM-DD.log` files dated more than `retention_days`
/// before `today`. Other files are left alone. Returns how many were removed.
pub fn prune_daemon_logs(logs_dir: &Path, retention_days: u32, today: NaiveDate) -> usize {
    let Ok(entries) = std::fs::read_dir(logs_dir) else {
        return 0;
    };
    let cutoff = today - TimeDelta::days(i64::from(retention_days));
    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(date) = name.to_str().and_then(log_file_date) else {
            continue;
        };
        if date >= cutoff {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!(path = %entry.path().display(), error = %e, "failed to prune log"),
        }
    }
    removed
}

fn log_file_date(name: &str) -> Option<NaiveDate> {
    let stamp = name
        .strip_prefix(DAEMON_LOG_PREFIX)?
        .strip_suffix(DAEMON_LOG_SUFFIX)?;
    NaiveDate::parse_from_str(stamp, "%Y-%m-%d").ok()
}
