//! Bounded pool of concurrently running tasks.
//!
//! Every dispatched task runs as its own tokio task. Its outcome, success
//! or failure, lands in a completion buffer that [`AgentPool::collect_completed`]
//! drains exactly once.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::Utc;
use futures_util::FutureExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::task::{AgentExecutionResult, Task, TaskResult, TaskStatus};

pub type ExecFuture<'a> = Pin<Box<dyn Future<Output = Result<AgentExecutionResult>> + Send + 'a>>;

/// Runs one claimed task to completion.
///
/// `cancel` fires when the pool is force-stopped; implementations should
/// terminate their subprocesses when it does.
pub trait TaskExecutor: Send + Sync {
    fn execute<'a>(&'a self, task: &'a Task, cancel: CancellationToken) -> ExecFuture<'a>;
}

struct InFlight {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

pub struct AgentPool {
    max_concurrent: usize,
    executor: Arc<dyn TaskExecutor>,
    /// Entries stay here until their task has finished and buffered its result.
    in_flight: Arc<Mutex<HashMap<String, InFlight>>>,
    completed: Arc<Mutex<Vec<TaskResult>>>,
    finished: Arc<Notify>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "task panicked".into())
}

impl AgentPool {
    pub fn new(max_concurrent: usize, executor: Arc<dyn TaskExecutor>) -> Self {
        Self {
            max_concurrent,
            executor,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            completed: Arc::new(Mutex::new(Vec::new())),
            finished: Arc::new(Notify::new()),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn active_count(&self) -> usize {
        lock(&self.in_flight).len()
    }

    pub fn can_accept(&self) -> bool {
        self.active_count() < self.max_concurrent
    }

    /// Start `task` unless the pool is full. Returns whether it was started.
    pub fn dispatch(&self, mut task: Task) -> bool {
        // Held across the spawn so the completion path cannot remove the
        // entry before it exists.
        let mut in_flight = lock(&self.in_flight);
        if in_flight.len() >= self.max_concurrent {
            tracing::warn!(
                task_id = %task.id,
                active = in_flight.len(),
                max = self.max_concurrent,
                "pool is full, dispatch ignored"
            );
            return false;
        }
        if in_flight.contains_key(&task.id) {
            tracing::warn!(task_id = %task.id, "task already running, dispatch ignored");
            return false;
        }

        if task.status == TaskStatus::Pending {
            task.transition(TaskStatus::Running);
        }
        let started_at = task.started_at.unwrap_or_else(Utc::now);
        task.started_at = Some(started_at);

        let id = task.id.clone();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let executor = Arc::clone(&self.executor);
        let completed = Arc::clone(&self.completed);
        let registry = Arc::clone(&self.in_flight);
        let finished = Arc::clone(&self.finished);

        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let outcome = AssertUnwindSafe(executor.execute(&task, token))
                .catch_unwind()
                .await;
            let result = match outcome {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => {
                    tracing::error!(task_id = %task.id, error = %e, "task failed");
                    AgentExecutionResult::failure(e.to_string(), elapsed_ms(started))
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    tracing::error!(task_id = %task.id, %message, "task panicked");
                    AgentExecutionResult::failure(message, elapsed_ms(started))
                }
            };
            let id = task.id.clone();
            lock(&completed).push(TaskResult {
                task,
                result,
                started_at,
                completed_at: Utc::now(),
            });
            lock(&registry).remove(&id);
            finished.notify_waiters();
        });

        in_flight.insert(id.clone(), InFlight { handle, cancel });
        tracing::info!(task_id = %id, active = in_flight.len(), "task dispatched");
        true
    }

    /// Take every buffered completion. Each result is returned once.
    pub fn collect_completed(&self) -> Vec<TaskResult> {
        std::mem::take(&mut *lock(&self.completed))
    }

    /// Ask every running task to terminate without waiting for it.
    pub fn kill_all(&self) {
        let in_flight = lock(&self.in_flight);
        for (id, entry) in in_flight.iter() {
            tracing::warn!(task_id = %id, "cancelling task");
            entry.cancel.cancel();
        }
    }

    /// Wait for every running task, then return all buffered completions.
    ///
    /// Running tasks stay visible to [`AgentPool::active_count`] and
    /// [`AgentPool::kill_all`] until they finish.
    pub async fn drain(&self) -> Vec<TaskResult> {
        loop {
            let notified = self.finished.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let active = {
                let mut in_flight = lock(&self.in_flight);
                in_flight.retain(|id, entry| {
                    if entry.handle.is_finished() {
                        tracing::error!(task_id = %id, "task ended without reporting a result");
                        return false;
                    }
                    true
                });
                in_flight.len()
            };
            if active == 0 {
                break;
            }
            tracing::info!(count = active, "waiting for running tasks");
            notified.await;
        }
        self.collect_completed()
    }
}
