//! One invocation of the agent executable inside the code-agent pipeline.
//!
//! Environment and arguments for every stage are built here, so this is
//! the single place that decides which stage may see the repository
//! credential: only [`Stage::Mr`].

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::process::{SpawnOptions, SpawnOutput, safe_env, spawn_with_timeout};
use crate::task::AgentJsonOutput;

/// Tools every pipeline stage except the log stage may use.
pub const STAGE_TOOLS: &[&str] = &["Bash", "Read", "Write"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Stage {
    Analyze,
    Implement,
    Verify,
    Mr,
    Log,
}

impl Stage {
    pub fn receives_credential(self) -> bool {
        self == Self::Mr
    }
}

/// Repository credential, read once per run from the configured variable.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub var: String,
    pub value: String,
}

impl Credential {
    pub fn from_env(var: &str) -> Option<Self> {
        std::env::var(var)
            .ok()
            .filter(|v| !v.is_empty())
            .map(|value| Self {
                var: var.to_string(),
                value,
            })
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("var", &self.var)
            .field("value", &"[redacted]")
            .finish()
    }
}

/// Allow-listed environment, plus the credential for the publish stage only.
pub fn build_stage_env(stage: Stage, credential: Option<&Credential>) -> HashMap<String, String> {
    let mut env = safe_env();
    if stage.receives_credential()
        && let Some(credential) = credential
    {
        env.insert(credential.var.clone(), credential.value.clone());
    }
    env
}

pub fn build_stage_args(
    prompt: &str,
    model: &str,
    tools: &[&str],
    max_budget_usd: Option<f64>,
    mcp_config: Option<&str>,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-p".into(),
        prompt.into(),
        "--output-format".into(),
        "json".into(),
        "--dangerously-skip-permissions".into(),
        "--no-session-persistence".into(),
        "--allowedTools".into(),
    ];
    args.extend(tools.iter().map(|t| (*t).to_string()));
    args.push("--model".into());
    args.push(model.into());
    if let Some(budget) = max_budget_usd {
        args.push("--max-budget-usd".into());
        args.push(budget.to_string());
    }
    if let Some(path) = mcp_config {
        args.push("--mcp-config".into());
        args.push(path.into());
    }
    args
}

/// Fully resolved stage call, ready to hand to a [`StageExecutor`].
#[derive(Debug, Clone)]
pub struct StageInvocation {
    pub stage: Stage,
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: PathBuf,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BeadResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub cost_usd: f64,
    pub timed_out: bool,
}

impl BeadResult {
    /// Cost and duration come from the agent's JSON only on a clean exit;
    /// a timed-out stage is charged its full timeout.
    pub fn from_spawn(out: SpawnOutput, timeout: Duration) -> Self {
        let mut duration_ms = if out.timed_out {
            u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
        } else {
            0
        };
        let mut cost_usd = 0.0;
        if out.exit_code == Some(0)
            && let Ok(parsed) = serde_json::from_str::<AgentJsonOutput>(&out.stdout)
        {
            cost_usd = parsed.total_cost_usd;
            duration_ms = parsed.duration_ms;
        }
        Self {
            exit_code: out.exit_code.unwrap_or(-1),
            stdout: out.stdout,
            stderr: out.stderr,
            duration_ms,
            cost_usd,
            timed_out: out.timed_out,
        }
    }

    /// The stage never ran (e.g. the executable is missing).
    pub fn not_started(message: impl Into<String>) -> Self {
        Self {
            exit_code: -1,
            stdout: String::new(),
            stderr: message.into(),
            duration_ms: 0,
            cost_usd: 0.0,
            timed_out: false,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

pub type StageFuture<'a> = Pin<Box<dyn Future<Output = BeadResult> + Send + 'a>>;

/// Runs stage invocations. Never fails: problems are folded into the result.
pub trait StageExecutor: Send + Sync {
    fn execute<'a>(&'a self, invocation: &'a StageInvocation) -> StageFuture<'a>;
}

/// Executes stages as real subprocesses.
pub struct CliStageExecutor {
    cancel: CancellationToken,
}

impl CliStageExecutor {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }
}

impl StageExecutor for CliStageExecutor {
    fn execute<'a>(&'a self, invocation: &'a StageInvocation) -> StageFuture<'a> {
        Box::pin(async move {
            let options = SpawnOptions::new(invocation.timeout)
                .cwd(&invocation.cwd)
                .env(invocation.env.clone())
                .cancel(self.cancel.clone());
            match spawn_with_timeout(&invocation.program, &invocation.args, &options).await {
                Ok(out) => {
                    let result = BeadResult::from_spawn(out, invocation.timeout);
                    tracing::debug!(
                        stage = %invocation.stage,
                        exit_code = result.exit_code,
                        timed_out = result.timed_out,
                        cost_usd = result.cost_usd,
                        "stage finished"
                    );
                    result
                }
                Err(e) => {
                    tracing::error!(stage = %invocation.stage, error = %e, "stage failed to start");
                    BeadResult::not_started(e.to_string())
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential() -> Credential {
        Credential {
            var: "GITLAB_TOKEN".into(),
            value: "glpat-secret".into(),
        }
    }

    #[test]
    fn only_publish_stage_gets_credential() {
        let cred = credential();
        for stage in [Stage::Analyze, Stage::Implement, Stage::Verify, Stage::Log] {
            let env = build_stage_env(stage, Some(&cred));
            assert!(!env.contains_key("GITLAB_TOKEN"), "{stage} leaked credential");
            assert!(!env.values().any(|v| v == "glpat-secret"));
        }
        let env = build_stage_env(Stage::Mr, Some(&cred));
        assert_eq!(env.get("GITLAB_TOKEN").map(String::as_str), Some("glpat-secret"));
    }

    #[test]
    fn missing_credential_still_builds_publish_env() {
        let env = build_stage_env(Stage::Mr, None);
        assert!(!env.contains_key("GITLAB_TOKEN"));
    }

    #[test]
    fn credential_debug_is_redacted() {
        let shown = format!("{:?}", credential());
        assert!(!shown.contains("glpat-secret"));
        assert!(shown.contains("GITLAB_TOKEN"));
    }

    #[test]
    fn stage_args_restrict_tools_and_set_model() {
        let args = build_stage_args("do it", "opus", STAGE_TOOLS, Some(3.0), None);
        assert_eq!(
            args,
            [
                "-p",
                "do it",
                "--output-format",
                "json",
                "--dangerously-skip-permissions",
                "--no-session-persistence",
                "--allowedTools",
                "Bash",
                "Read",
                "Write",
                "--model",
                "opus",
                "--max-budget-usd",
                "3",
            ]
        );
    }

    #[test]
    fn mcp_config_is_appended_when_given() {
        let args = build_stage_args("log", "sonnet", &["mcp__x"], None, Some("/etc/mcp.json"));
        assert_eq!(&args[args.len() - 2..], ["--mcp-config", "/etc/mcp.json"]);
    }

    #[test]
    fn json_output_supplies_cost_and_duration() {
        let out = SpawnOutput {
            stdout: r#"{"total_cost_usd":0.75,"duration_ms":4200,"result":"ok"}"#.into(),
            exit_code: Some(0),
            ..SpawnOutput::default()
        };
        let result = BeadResult::from_spawn(out, Duration::from_secs(60));
        assert_eq!(result.duration_ms, 4200);
        assert!((result.cost_usd - 0.75).abs() < f64::EPSILON);
        assert!(result.succeeded());
    }

    #[test]
    fn malformed_output_is_tolerated() {
        let out = SpawnOutput {
            stdout: "not json at all".into(),
            exit_code: Some(0),
            ..SpawnOutput::default()
        };
        let result = BeadResult::from_spawn(out, Duration::from_secs(60));
        assert_eq!(result.duration_ms, 0);
        assert_eq!(result.cost_usd, 0.0);
        assert_eq!(result.stdout, "not json at all");
    }

    #[test]
    fn timed_out_stage_is_charged_full_timeout() {
        let out = SpawnOutput {
            timed_out: true,
            ..SpawnOutput::default()
        };
        let result = BeadResult::from_spawn(out, Duration::from_secs(90));
        assert_eq!(result.duration_ms, 90_000);
        assert_eq!(result.exit_code, -1);
        assert!(!result.succeeded());
    }

    #[tokio::test]
    async fn cli_executor_folds_spawn_failure_into_result() {
        let executor = CliStageExecutor::new(CancellationToken::new());
        let invocation = StageInvocation {
            stage: Stage::Analyze,
            program: "definitely-not-an-agent".into(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: std::env::temp_dir(),
            timeout: Duration::from_secs(1),
        };
        let result = executor.execute(&invocation).await;
        assert_eq!(result.exit_code, -1);
        assert!(result.stderr.contains("definitely-not-an-agent"));
    }
}
