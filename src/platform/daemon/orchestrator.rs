use anyhow::Context;
use chrono::{Local, Utc};
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::state::{DaemonState, DaemonStatus, remove_pid_file, write_daemon_state, write_pid_file};
use crate::config::{ConfigHandle, StatePaths};
use crate::inbox::write_report;
use crate::notify::{NtfyClient, task_finished, task_started};
use crate::platform::cron::Scheduler;
use crate::platform::pool::{AgentPool, TaskExecutor};
use crate::queue::TaskQueue;
use crate::task::TaskResult;

/// Ties scheduler, queue and pool together behind a periodic tick.
pub struct Orchestrator {
    config: ConfigHandle,
    paths: StatePaths,
    queue: Arc<dyn TaskQueue>,
    scheduler: Scheduler,
    pool: AgentPool,
    state: DaemonState,
    ntfy: Option<NtfyClient>,
}

impl Orchestrator {
    pub fn new(
        config: ConfigHandle,
        queue: Arc<dyn TaskQueue>,
        executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        let snapshot = config.load_full();
        let paths = StatePaths::new(&snapshot.base_dir());
        let scheduler = Scheduler::new(
            Arc::clone(&queue),
            paths.scheduler_state_file(),
            snapshot.recurring.clone(),
            snapshot.default_timeout.clone(),
        );
        Self {
            pool: AgentPool::new(snapshot.max_concurrent, executor),
            config,
            paths,
            queue,
            scheduler,
            state: DaemonState::new(std::process::id(), Utc::now()),
            ntfy: snapshot.ntfy.as_ref().map(NtfyClient::new),
        }
    }

    pub fn state(&self) -> &DaemonState {
        &self.state
    }

    pub fn pool(&self) -> &AgentPool {
        &self.pool
    }

    pub fn paths(&self) -> &StatePaths {
        &self.paths
    }

    /// Prepare state directories, restore scheduler state and publish the
    /// first heartbeat.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        self.paths
            .ensure_dirs()
            .with_context(|| format!("creating {}", self.paths.root().display()))?;
        self.scheduler.load_state().await;
        write_pid_file(&self.paths, self.state.pid).await?;
        self.state.status = DaemonStatus::Running;
        self.heartbeat().await;

        let config = self.config.load();
        tracing::info!(
            pid = self.state.pid,
            max_concurrent = config.max_concurrent,
            poll_interval_ms = config.daemon.poll_interval_ms,
            queue = self.queue.name(),
            recurring = config.recurring.len(),
            "daemon started"
        );
        Ok(())
    }

    /// Tick on the poll interval and heartbeat on its own interval until
    /// `shutdown` fires, then stop. Firing `force` while draining cancels the
    /// tasks still running.
    pub async fn run(&mut self, shutdown: CancellationToken, force: CancellationToken) {
        let (poll_every, heartbeat_every) = {
            let config = self.config.load();
            (
                Duration::from_millis(config.daemon.poll_interval_ms),
                Duration::from_millis(config.daemon.heartbeat_interval_ms),
            )
        };
        let mut heartbeat = tokio::time::interval_at(Instant::now() + heartbeat_every, heartbeat_every);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut next_poll = Instant::now();

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = heartbeat.tick() => self.heartbeat().await,
                () = tokio::time::sleep_until(next_poll) => {
                    if AssertUnwindSafe(self.tick()).catch_unwind().await.is_err() {
                        tracing::error!("daemon tick panicked, continuing");
                    }
                    next_poll = Instant::now() + poll_every;
                }
            }
        }
        self.stop_with(&force).await;
    }

    /// One poll cycle. Every failure is logged and absorbed.
    pub async fn tick(&mut self) {
        match self.config.reload() {
            Ok(fresh) => self
                .scheduler
                .update_config(fresh.recurring.clone(), fresh.default_timeout.clone()),
            Err(e) => tracing::warn!(error = %e, "config reload failed, keeping previous"),
        }

        self.scheduler.evaluate_schedules(Local::now()).await;

        for completed in self.pool.collect_completed() {
            self.handle_completed(completed).await;
        }

        if self.pool.can_accept() {
            self.dispatch_ready().await;
        }

        self.heartbeat().await;
    }

    async fn dispatch_ready(&mut self) {
        let ready = match self.queue.list_ready().await {
            Ok(ready) => ready,
            Err(e) => {
                tracing::error!(queue = self.queue.name(), error = %e, "failed to list ready tasks");
                return;
            }
        };
        for task in ready {
            if !self.pool.can_accept() {
                break;
            }
            match self.queue.claim(&task).await {
                Ok(true) => {
                    tracing::info!(task_id = %task.id, name = %task.name, "task claimed");
                    if let Some(ntfy) = self.ntfy.as_ref().filter(|_| task.notify) {
                        ntfy.spawn_send(task_started(&task));
                    }
                    self.pool.dispatch(task);
                }
                Ok(false) => tracing::debug!(task_id = %task.id, "task claimed elsewhere"),
                Err(e) => tracing::warn!(task_id = %task.id, error = %e, "failed to claim task"),
            }
        }
    }

    async fn handle_completed(&mut self, mut completed: TaskResult) {
        let status = completed.final_status();
        completed.task.transition(status);
        completed.task.completed_at = Some(completed.completed_at);
        let task = &completed.task;
        let result = &completed.result;
        tracing::info!(
            task_id = %task.id,
            name = %task.name,
            %status,
            cost_usd = result.total_cost_usd,
            duration_ms = result.duration_ms,
            "task finished"
        );

        let base_dir = self.config.load().base_dir();
        match write_report(&completed, &self.paths.inbox_dir(), &base_dir).await {
            Ok(path) => tracing::info!(task_id = %task.id, path = %path.display(), "report written"),
            Err(e) => tracing::error!(task_id = %task.id, error = %e, "failed to write report"),
        }

        if let Err(e) = self.queue.complete(task, result.is_error).await {
            tracing::error!(task_id = %task.id, error = %e, "failed to complete queued task");
        }

        self.state.total_executed += 1;
        self.state.total_cost_usd += result.total_cost_usd;

        if let Some(ntfy) = self.ntfy.as_ref().filter(|_| task.notify) {
            ntfy.send(&task_finished(task, result)).await;
        }
    }

    pub async fn heartbeat(&mut self) {
        self.state.last_heartbeat = Utc::now();
        self.state.active_tasks = self.pool.active_count();
        if let Err(e) = write_daemon_state(&self.paths, &self.state).await {
            tracing::error!(error = %e, "failed to write heartbeat");
        }
    }

    /// Drain running tasks, record their results and mark the daemon stopped.
    pub async fn stop(&mut self) {
        self.stop_with(&CancellationToken::new()).await;
    }

    /// Like [`Orchestrator::stop`], but cancels running tasks once `force` fires.
    pub async fn stop_with(&mut self, force: &CancellationToken) {
        self.state.status = DaemonStatus::Stopping;
        self.heartbeat().await;
        tracing::info!(active = self.pool.active_count(), "daemon stopping, draining tasks");

        let drained = {
            let drain = self.pool.drain();
            tokio::pin!(drain);
            tokio::select! {
                results = &mut drain => results,
                () = force.cancelled() => {
                    tracing::warn!(active = self.pool.active_count(), "forced stop, cancelling running tasks");
                    self.pool.kill_all();
                    drain.await
                }
            }
        };
        for completed in drained {
            self.handle_completed(completed).await;
        }

        self.state.status = DaemonStatus::Stopped;
        self.heartbeat().await;
        remove_pid_file(&self.paths).await;
        tracing::info!(
            total_executed = self.state.total_executed,
            total_cost_usd = self.state.total_cost_usd,
            "daemon stopped"
        );
    }
}
