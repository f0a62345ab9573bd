use chrono::{DateTime, Local, TimeDelta, TimeZone, Utc};
use cron::Schedule;
use std::path::PathBuf;
use std::sync::Arc;

use super::expression::parse_schedule;
use super::state::SchedulerState;
use crate::config::RecurringTaskConfig;
use crate::queue::TaskQueue;
use crate::task::Task;

/// How far back a never-fired job looks for a missed trigger after startup.
pub const NEVER_FIRED_LOOKBACK: TimeDelta = TimeDelta::minutes(5);

/// Whether a job with `schedule` and optional `last_fire` is due at `now`.
///
/// Triggers are computed in `now`'s time zone. A job that never fired only
/// catches triggers from the last [`NEVER_FIRED_LOOKBACK`].
pub fn is_due<Tz: TimeZone>(
    schedule: &Schedule,
    last_fire: Option<DateTime<Utc>>,
    now: &DateTime<Tz>,
) -> bool {
    let from = match last_fire {
        Some(last) => last.with_timezone(&now.timezone()),
        None => now.clone() - NEVER_FIRED_LOOKBACK,
    };
    schedule
        .after(&from)
        .next()
        .is_some_and(|next| next <= *now)
}

/// First trigger strictly after `now`, in `now`'s time zone.
pub fn next_fire<Tz: TimeZone>(schedule: &Schedule, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    schedule.after(now).next()
}

/// Materializes due recurring tasks into the queue.
///
/// Owns the persisted [`SchedulerState`]; nothing else writes it.
pub struct Scheduler {
    queue: Arc<dyn TaskQueue>,
    state_path: PathBuf,
    state: SchedulerState,
    recurring: Vec<RecurringTaskConfig>,
    default_timeout: String,
}

impl Scheduler {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        state_path: impl Into<PathBuf>,
        recurring: Vec<RecurringTaskConfig>,
        default_timeout: impl Into<String>,
    ) -> Self {
        Self {
            queue,
            state_path: state_path.into(),
            state: SchedulerState::default(),
            recurring,
            default_timeout: default_timeout.into(),
        }
    }

    pub async fn load_state(&mut self) {
        self.state = SchedulerState::load(&self.state_path).await;
        tracing::debug!(
            jobs = self.state.last_runs.len(),
            path = %self.state_path.display(),
            "scheduler state loaded"
        );
    }

    pub async fn save_state(&self) {
        if let Err(e) = self.state.save(&self.state_path).await {
            tracing::error!(error = %e, "failed to persist scheduler state");
        }
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    pub fn recurring(&self) -> &[RecurringTaskConfig] {
        &self.recurring
    }

    /// Swap the job list used by later evaluations. Recorded fire times
    /// are kept.
    pub fn update_config(
        &mut self,
        recurring: Vec<RecurringTaskConfig>,
        default_timeout: impl Into<String>,
    ) {
        self.recurring = recurring;
        self.default_timeout = default_timeout.into();
    }

    /// Enqueue every job due at `now` and return the queued tasks.
    ///
    /// A job whose enqueue fails is not recorded as fired and is retried on
    /// the next evaluation.
    pub async fn evaluate_schedules(&mut self, now: DateTime<Local>) -> Vec<Task> {
        let now_utc = now.with_timezone(&Utc);
        let mut queued = Vec::new();

        for recurring in &self.recurring {
            let schedule = match parse_schedule(&recurring.schedule) {
                Ok(schedule) => schedule,
                Err(e) => {
                    tracing::warn!(job = %recurring.name, error = %e, "skipping recurring task");
                    continue;
                }
            };
            if !is_due(&schedule, self.state.last_run(&recurring.name), &now) {
                continue;
            }

            let mut task = Task::from_recurring(recurring, &self.default_timeout, now_utc);
            match self.queue.enqueue(&task).await {
                Ok(id) => {
                    task.id = id;
                    self.state.record(&recurring.name, now_utc);
                    tracing::info!(job = %recurring.name, task_id = %task.id, "recurring task queued");
                    queued.push(task);
                }
                Err(e) => {
                    tracing::error!(job = %recurring.name, error = %e, "failed to queue recurring task");
                }
            }
        }

        if !queued.is_empty() {
            self.save_state().await;
        }
        queued
    }
}
