use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{QueueFuture, TaskQueue};
use crate::error::QueueError;
use crate::process::{SpawnOptions, SpawnOutput, spawn_with_timeout};
use crate::task::{Task, TaskOrigin, TaskStatus};

const TRACKER_TIMEOUT: Duration = Duration::from_secs(30);
const META_START: &str = "---nightshift-meta---";
const META_END: &str = "---end-meta---";

pub const LABEL: &str = "nightshift";
pub const LABEL_ONE_OFF: &str = "nightshift:one-off";
pub const LABEL_RECURRING_PREFIX: &str = "nightshift:recurring:";
pub const LABEL_FAILED: &str = "nightshift:failed";

/// Entry as printed by `bd ready --json` / `bd list --json`.
#[derive(Debug, Clone, Deserialize)]
pub struct BeadEntry {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// `bd ready` omits labels.
    #[serde(default)]
    pub labels: Vec<String>,
}

/// Queue backed by the external `bd` issue tracker.
pub struct BeadsQueue {
    bin: String,
}

impl BeadsQueue {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    async fn run(&self, args: Vec<String>) -> Result<SpawnOutput, QueueError> {
        let command = format!("{} {}", self.bin, args.join(" "));
        let out = spawn_with_timeout(&self.bin, &args, &SpawnOptions::new(TRACKER_TIMEOUT))
            .await
            .map_err(|e| QueueError::Tracker {
                command: command.clone(),
                stderr: e.to_string(),
            })?;
        if !out.success() {
            let stderr = if out.timed_out {
                "timed out".to_string()
            } else {
                out.stderr.trim().to_string()
            };
            return Err(QueueError::Tracker { command, stderr });
        }
        Ok(out)
    }

    async fn create(&self, task: &Task) -> Result<String, QueueError> {
        let mut args = vec![
            "create".to_string(),
            task.name.clone(),
            "--description".to_string(),
            to_description(task),
        ];
        for label in labels_for(task) {
            args.push("--label".to_string());
            args.push(label);
        }
        let out = self.run(args).await?;
        let id = out.stdout.trim().to_string();
        if id.is_empty() {
            return Err(QueueError::Malformed("bd create returned an empty id".into()));
        }
        Ok(id)
    }

    async fn ready(&self) -> Result<Vec<Task>, QueueError> {
        let args = ["ready", "--label", LABEL, "--json"].map(String::from).to_vec();
        let out = self.run(args).await?;
        let entries: Vec<BeadEntry> = serde_json::from_str(&out.stdout)
            .map_err(|e| QueueError::Malformed(format!("bd ready: {e}")))?;
        Ok(entries.into_iter().map(from_bead).collect())
    }

    async fn claim_bead(&self, task: &Task) -> Result<bool, QueueError> {
        match self
            .run(vec!["update".into(), task.id.clone(), "--claim".into()])
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!(task_id = %task.id, error = %e, "failed to claim bead");
                Ok(false)
            }
        }
    }

    async fn close(&self, task: &Task, failed: bool) -> Result<(), QueueError> {
        if failed {
            self.run(vec![
                "update".into(),
                task.id.clone(),
                "--label".into(),
                LABEL_FAILED.into(),
            ])
            .await?;
        }
        self.run(vec!["close".into(), task.id.clone()]).await?;
        Ok(())
    }
}

impl TaskQueue for BeadsQueue {
    fn name(&self) -> &str {
        "beads"
    }

    fn enqueue<'a>(&'a self, task: &'a Task) -> QueueFuture<'a, String> {
        Box::pin(self.create(task))
    }

    fn list_ready(&self) -> QueueFuture<'_, Vec<Task>> {
        Box::pin(self.ready())
    }

    fn claim<'a>(&'a self, task: &'a Task) -> QueueFuture<'a, bool> {
        Box::pin(self.claim_bead(task))
    }

    fn complete<'a>(&'a self, task: &'a Task, failed: bool) -> QueueFuture<'a, ()> {
        Box::pin(self.close(task, failed))
    }
}

pub fn labels_for(task: &Task) -> Vec<String> {
    let mut labels = vec![LABEL.to_string()];
    match (task.origin, &task.recurring_name) {
        (TaskOrigin::OneOff, _) => labels.push(LABEL_ONE_OFF.to_string()),
        (TaskOrigin::Recurring, Some(name)) => {
            labels.push(format!("{LABEL_RECURRING_PREFIX}{name}"));
        }
        (TaskOrigin::Recurring, None) => {}
    }
    labels
}

/// Prompt prefixed with a `key: value` metadata block.
pub fn to_description(task: &Task) -> String {
    let mut meta = vec![
        format!("origin: {}", task.origin),
        format!("timeout: {}", task.timeout),
    ];
    if let Some(budget) = task.max_budget_usd {
        meta.push(format!("max_budget_usd: {budget}"));
    }
    if let Some(model) = &task.model {
        meta.push(format!("model: {model}"));
    }
    if let Some(tools) = task.allowed_tools.as_ref().filter(|t| !t.is_empty()) {
        meta.push(format!("allowed_tools: {}", tools.join(", ")));
    }
    if let Some(output) = &task.output {
        meta.push(format!("output: {output}"));
    }
    if let Some(mcp) = &task.mcp_config {
        meta.push(format!("mcp_config: {mcp}"));
    }
    if let Some(category) = &task.category {
        meta.push(format!("category: {category}"));
    }
    if task.notify {
        meta.push("notify: true".into());
    }
    format!("{META_START}\n{}\n{META_END}\n\n{}", meta.join("\n"), task.prompt)
}

pub fn from_bead(bead: BeadEntry) -> Task {
    let recurring_name = bead
        .labels
        .iter()
        .find_map(|l| l.strip_prefix(LABEL_RECURRING_PREFIX))
        .map(String::from);

    let mut task = Task {
        id: bead.id,
        name: bead.title,
        origin: TaskOrigin::OneOff,
        prompt: bead.description.clone(),
        status: if bead.status == "closed" {
            TaskStatus::Completed
        } else {
            TaskStatus::Pending
        },
        allowed_tools: None,
        timeout: "30m".into(),
        max_budget_usd: None,
        model: None,
        mcp_config: None,
        output: None,
        created_at: bead.created_at.unwrap_or_else(Utc::now),
        started_at: None,
        completed_at: None,
        recurring_name: None,
        category: None,
        notify: false,
    };

    let Some((meta, prompt)) = split_meta(&bead.description) else {
        return task;
    };
    task.prompt = prompt.to_string();
    for line in meta.lines() {
        let Some((key, value)) = line.split_once(": ") else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "origin" if value == "recurring" => task.origin = TaskOrigin::Recurring,
            "timeout" => task.timeout = value.to_string(),
            "max_budget_usd" => task.max_budget_usd = value.parse().ok(),
            "model" => task.model = Some(value.to_string()),
            "allowed_tools" => {
                task.allowed_tools = Some(value.split(", ").map(String::from).collect());
            }
            "output" => task.output = Some(value.to_string()),
            "mcp_config" => task.mcp_config = Some(value.to_string()),
            "category" => task.category = Some(value.to_string()),
            "notify" => task.notify = value == "true",
            _ => {}
        }
    }
    if recurring_name.is_some() {
        task.origin = TaskOrigin::Recurring;
        task.recurring_name = recurring_name;
    }
    task
}

fn split_meta(description: &str) -> Option<(&str, &str)> {
    let rest = description.strip_prefix(META_START)?.strip_prefix('\n')?;
    let end = rest.find(&format!("\n{META_END}\n\n"))?;
    let meta = &rest[..end];
    let prompt = &rest[end + META_END.len() + 3..];
    Some((meta, prompt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, RecurringTaskConfig};

    fn recurring_task() -> Task {
        let recurring = RecurringTaskConfig {
            name: "nightly-digest".into(),
            schedule: "0 3 * * *".into(),
            prompt: "Summarize the day.\n\nUse: bullet points".into(),
            allowed_tools: Some(vec!["Read".into(), "Write".into()]),
            output: Some("./reports/{{date}}.md".into()),
            timeout: Some("15m".into()),
            max_budget_usd: Some(2.5),
            model: Some("sonnet".into()),
            mcp_config: None,
            category: None,
            notify: true,
        };
        Task::from_recurring(&recurring, "30m", Utc::now())
    }

    #[test]
    fn labels_mark_origin() {
        let task = recurring_task();
        assert_eq!(
            labels_for(&task),
            vec!["nightshift", "nightshift:recurring:nightly-digest"]
        );
        let one_off = Task::one_off("x", &Config::default(), Utc::now());
        assert_eq!(labels_for(&one_off), vec!["nightshift", "nightshift:one-off"]);
    }

    #[test]
    fn description_round_trips_metadata() {
        let task = recurring_task();
        let bead = BeadEntry {
            id: "bd-42".into(),
            title: task.name.clone(),
            description: to_description(&task),
            status: "open".into(),
            created_at: None,
            labels: labels_for(&task),
        };
        let back = from_bead(bead);
        assert_eq!(back.id, "bd-42");
        assert_eq!(back.prompt, task.prompt);
        assert_eq!(back.timeout, "15m");
        assert_eq!(back.max_budget_usd, Some(2.5));
        assert_eq!(back.allowed_tools, task.allowed_tools);
        assert_eq!(back.origin, TaskOrigin::Recurring);
        assert_eq!(back.recurring_name.as_deref(), Some("nightly-digest"));
        assert_eq!(back.status, TaskStatus::Pending);
        assert!(back.notify);
    }

    #[test]
    fn plain_description_becomes_prompt() {
        let bead = BeadEntry {
            id: "bd-1".into(),
            title: "adhoc".into(),
            description: "just do it".into(),
            status: "open".into(),
            created_at: None,
            labels: Vec::new(),
        };
        let task = from_bead(bead);
        assert_eq!(task.prompt, "just do it");
        assert_eq!(task.timeout, "30m");
        assert_eq!(task.origin, TaskOrigin::OneOff);
    }

    #[test]
    fn bead_entry_parses_ready_output() {
        let raw = r#"[{"id":"bd-7","title":"t","description":"d","status":"open",
            "priority":2,"created_at":"2026-01-05T06:00:00Z"}]"#;
        let entries: Vec<BeadEntry> = serde_json::from_str(raw).unwrap();
        assert_eq!(entries[0].id, "bd-7");
        assert!(entries[0].labels.is_empty());
        assert!(entries[0].created_at.is_some());
    }

    #[tokio::test]
    async fn missing_tracker_binary_is_a_tracker_error() {
        let queue = BeadsQueue::new("definitely-not-bd");
        let err = queue.list_ready().await.unwrap_err();
        assert!(matches!(err, QueueError::Tracker { .. }));
    }
}
