use std::path::PathBuf;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::error::{ProcessError, Result};
use crate::process::{SpawnOptions, safe_env, spawn_with_timeout};
use crate::task::{AgentExecutionResult, AgentJsonOutput, Task};
use crate::util::duration::parse_timeout;
use crate::util::text::truncate_chars;

/// Runs one prompt task as a single agent invocation.
pub struct AgentRunner {
    agent_bin: String,
    workspace: PathBuf,
}

impl AgentRunner {
    pub fn new(agent_bin: impl Into<String>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            agent_bin: agent_bin.into(),
            workspace: workspace.into(),
        }
    }

    /// Timeouts and cancellation come back as failed results; unexpected
    /// exits and unparseable output are errors for the dispatcher to normalize.
    pub async fn run(&self, task: &Task, cancel: CancellationToken) -> Result<AgentExecutionResult> {
        let timeout = parse_timeout(&task.timeout)?;
        let args = self.build_args(task);
        tracing::info!(
            task_id = %task.id,
            name = %task.name,
            timeout = %task.timeout,
            model = task.model.as_deref().unwrap_or("default"),
            prompt_len = task.prompt.len(),
            "starting agent"
        );

        if let Err(e) = tokio::fs::create_dir_all(&self.workspace).await {
            tracing::warn!(path = %self.workspace.display(), error = %e, "failed to create workspace");
        }
        let options = SpawnOptions::new(timeout)
            .cwd(&self.workspace)
            .env(safe_env())
            .cancel(cancel);
        let started = Instant::now();
        let out = spawn_with_timeout(&self.agent_bin, &args, &options).await?;

        if out.timed_out {
            tracing::warn!(task_id = %task.id, timeout = %task.timeout, "task timed out");
            return Ok(AgentExecutionResult::failure(
                format!("Task timed out after {}", task.timeout),
                u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            ));
        }
        if out.cancelled {
            return Ok(AgentExecutionResult::failure(
                "Task cancelled during shutdown",
                u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            ));
        }
        if out.exit_code != Some(0) {
            let detail = [out.stderr.trim(), out.stdout.trim()]
                .into_iter()
                .find(|s| !s.is_empty())
                .unwrap_or("Unknown error");
            tracing::error!(task_id = %task.id, exit_code = ?out.exit_code, "agent exited unsuccessfully");
            return Err(ProcessError::Execution {
                task_id: task.id.clone(),
                message: format!(
                    "{} exited with code {}: {detail}",
                    self.agent_bin,
                    out.exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string())
                ),
            }
            .into());
        }

        let parsed: AgentJsonOutput =
            serde_json::from_str(&out.stdout).map_err(|_| ProcessError::Execution {
                task_id: task.id.clone(),
                message: format!(
                    "failed to parse agent output as JSON: {}",
                    truncate_chars(&out.stdout, 200)
                ),
            })?;
        let result = AgentExecutionResult::from(parsed);
        tracing::info!(
            task_id = %task.id,
            duration_ms = result.duration_ms,
            cost_usd = result.total_cost_usd,
            num_turns = result.num_turns,
            is_error = result.is_error,
            "task completed"
        );
        Ok(result)
    }

    pub fn build_args(&self, task: &Task) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-p".into(),
            task.prompt.clone(),
            "--output-format".into(),
            "json".into(),
            "--dangerously-skip-permissions".into(),
            "--no-session-persistence".into(),
        ];
        if let Some(tools) = task.allowed_tools.as_ref().filter(|t| !t.is_empty()) {
            args.push("--allowedTools".into());
            args.extend(tools.iter().cloned());
        }
        if let Some(budget) = task.max_budget_usd {
            args.push("--max-budget-usd".into());
            args.push(budget.to_string());
        }
        if let Some(model) = &task.model {
            args.push("--model".into());
            args.push(model.clone());
        }
        if let Some(mcp) = &task.mcp_config {
            args.push("--mcp-config".into());
            args.push(mcp.clone());
        }
        args.push("--append-system-prompt".into());
        args.push(format!(
            "You are executing a night-shift task autonomously. Task: {}. \
             Write output files to: {}. Provide a clear summary of what you did.",
            task.name,
            self.workspace.display()
        ));
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::NightshiftError;
    use chrono::Utc;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// Write an executable shell script standing in for the agent binary.
    fn fake_agent(dir: &TempDir, body: &str) -> String {
        let path = dir.path().join("fake-agent");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn task(timeout: &str) -> Task {
        let mut task = Task::one_off("say hi", &Config::default(), Utc::now());
        task.timeout = timeout.into();
        task
    }

    #[test]
    fn args_include_optional_flags_in_order() {
        let runner = AgentRunner::new("claude", "/ws");
        let mut t = task("1m");
        t.allowed_tools = Some(vec!["Read".into(), "Bash".into()]);
        t.max_budget_usd = Some(0.5);
        t.model = Some("opus".into());
        t.mcp_config = Some("mcp.json".into());

        let args = runner.build_args(&t);
        assert_eq!(&args[..2], ["-p", "say hi"]);
        let joined = args.join(" ");
        assert!(joined.contains("--allowedTools Read Bash --max-budget-usd 0.5 --model opus --mcp-config mcp.json"));
        assert_eq!(args[args.len() - 2], "--append-system-prompt");
        assert!(args.last().unwrap().contains("Write output files to: /ws"));
    }

    #[tokio::test]
    async fn parses_json_output() {
        let tmp = TempDir::new().unwrap();
        let bin = fake_agent(
            &tmp,
            r#"echo '{"session_id":"s","duration_ms":12,"total_cost_usd":0.25,"result":"done","is_error":false,"num_turns":3}'"#,
        );
        let runner = AgentRunner::new(bin, tmp.path().join("ws"));
        let result = runner.run(&task("10s"), CancellationToken::new()).await.unwrap();
        assert_eq!(result.result, "done");
        assert_eq!(result.num_turns, 3);
        assert!((result.total_cost_usd - 0.25).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn timeout_becomes_failed_result() {
        let tmp = TempDir::new().unwrap();
        let bin = fake_agent(&tmp, "sleep 5");
        let runner = AgentRunner::new(bin, tmp.path());
        let result = runner.run(&task("100ms"), CancellationToken::new()).await.unwrap();
        assert!(result.is_error);
        assert_eq!(result.result, "Task timed out after 100ms");
        assert_eq!(result.duration_ms, 100);
    }

    #[tokio::test]
    async fn non_zero_exit_is_an_execution_error() {
        let tmp = TempDir::new().unwrap();
        let bin = fake_agent(&tmp, "echo broken >&2; exit 2");
        let runner = AgentRunner::new(bin, tmp.path());
        let err = runner.run(&task("10s"), CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, NightshiftError::Process(ProcessError::Execution { .. })));
        assert!(err.to_string().contains("broken"));
    }

    #[tokio::test]
    async fn malformed_json_is_an_execution_error() {
        let tmp = TempDir::new().unwrap();
        let bin = fake_agent(&tmp, "echo not-json");
        let runner = AgentRunner::new(bin, tmp.path());
        let err = runner.run(&task("10s"), CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().contains("not-json"));
    }

    #[tokio::test]
    async fn invalid_timeout_is_a_config_error() {
        let runner = AgentRunner::new("claude", "/ws");
        let err = runner.run(&task("soon"), CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, NightshiftError::Config(_)));
    }
}
