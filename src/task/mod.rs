//! Task model shared by the scheduler, queue backends, dispatcher and reporter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{Config, RecurringTaskConfig};

pub const TASK_ID_PREFIX: &str = "ns-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum TaskOrigin {
    OneOff,
    Recurring,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }

    /// Status only ever moves forward: pending, then running, then terminal.
    pub fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Pending => next != Self::Pending,
            Self::Running => next.is_terminal(),
            Self::Completed | Self::Failed | Self::TimedOut => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub name: String,
    pub origin: TaskOrigin,
    pub prompt: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    pub timeout: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_budget_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp_config: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurring_name: Option<String>,
    /// Set on code-agent jobs; names the primary improvement category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Publish start and end notifications when ntfy is configured.
    #[serde(default)]
    pub notify: bool,
}

impl Task {
    /// Build a one-off task from a submitted prompt using `[one_off_defaults]`.
    pub fn one_off(prompt: impl Into<String>, config: &Config, now: DateTime<Utc>) -> Self {
        let prompt = prompt.into();
        let defaults = &config.one_off_defaults;
        Self {
            id: new_task_id(),
            name: one_off_name(&prompt),
            origin: TaskOrigin::OneOff,
            prompt,
            status: TaskStatus::Pending,
            allowed_tools: None,
            timeout: defaults.timeout.clone(),
            max_budget_usd: defaults.max_budget_usd,
            model: defaults.model.clone(),
            mcp_config: None,
            output: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            recurring_name: None,
            category: None,
            notify: false,
        }
    }

    /// Materialize a recurring definition, inheriting daemon-wide defaults for unset fields.
    pub fn from_recurring(
        recurring: &RecurringTaskConfig,
        default_timeout: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: new_task_id(),
            name: recurring.name.clone(),
            origin: TaskOrigin::Recurring,
            prompt: recurring.prompt.clone(),
            status: TaskStatus::Pending,
            allowed_tools: recurring.allowed_tools.clone(),
            timeout: recurring
                .timeout
                .clone()
                .unwrap_or_else(|| default_timeout.to_string()),
            max_budget_usd: recurring.max_budget_usd,
            model: recurring.model.clone(),
            mcp_config: recurring.mcp_config.clone(),
            output: recurring.output.clone(),
            created_at: now,
            started_at: None,
            completed_at: None,
            recurring_name: Some(recurring.name.clone()),
            category: recurring.category.clone(),
            notify: recurring.notify,
        }
    }

    /// Apply a status change, refusing regressions.
    pub fn transition(&mut self, next: TaskStatus) -> bool {
        if !self.status.can_transition_to(next) {
            tracing::warn!(task_id = %self.id, from = %self.status, to = %next, "ignoring status regression");
            return false;
        }
        self.status = next;
        true
    }
}

fn one_off_name(prompt: &str) -> String {
    let first_line = prompt.lines().next().unwrap_or_default().trim();
    let name = crate::util::text::truncate_chars(first_line, 40);
    if name.is_empty() {
        "one-off".into()
    } else {
        name.to_string()
    }
}

/// `ns-` followed by eight lowercase hex characters.
pub fn new_task_id() -> String {
    let bytes: [u8; 4] = rand::random();
    format!("{TASK_ID_PREFIX}{}", hex::encode(bytes))
}

/// Normalized outcome of one agent execution, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentExecutionResult {
    pub session_id: String,
    pub duration_ms: u64,
    pub total_cost_usd: f64,
    pub result: String,
    pub is_error: bool,
    pub num_turns: u32,
}

impl AgentExecutionResult {
    /// Failed result carrying `message`, zero cost and the elapsed wall time.
    pub fn failure(message: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            session_id: String::new(),
            duration_ms,
            total_cost_usd: 0.0,
            result: message.into(),
            is_error: true,
            num_turns: 0,
        }
    }
}

/// JSON document the agent executable prints on stdout.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentJsonOutput {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub total_cost_usd: f64,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub num_turns: u32,
}

impl From<AgentJsonOutput> for AgentExecutionResult {
    fn from(output: AgentJsonOutput) -> Self {
        Self {
            session_id: output.session_id,
            duration_ms: output.duration_ms,
            total_cost_usd: output.total_cost_usd,
            result: output.result,
            is_error: output.is_error,
            num_turns: output.num_turns,
        }
    }
}

/// Completion record handed from the dispatcher to the daemon loop.
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub task: Task,
    pub result: AgentExecutionResult,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl TaskResult {
    /// Terminal status implied by the execution result.
    pub fn final_status(&self) -> TaskStatus {
        if !self.result.is_error {
            TaskStatus::Completed
        } else if self.result.result.starts_with("Task timed out") {
            TaskStatus::TimedOut
        } else {
            TaskStatus::Failed
        }
    }
}
