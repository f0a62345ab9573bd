use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::bead::CliStageExecutor;
use super::code_agent::{describe_run, run_code_agent};
use super::pipeline::{Outcome, PipelineResult};
use super::git::GitHarness;
use super::runner::AgentRunner;
use crate::config::{ConfigHandle, StatePaths};
use crate::error::Result;
use crate::platform::pool::{ExecFuture, TaskExecutor};
use crate::task::{AgentExecutionResult, Task};
use crate::util::duration::parse_timeout;

/// Routes a claimed task to the code-agent pipeline or a single agent run.
///
/// Reads the live config snapshot per task, so hot-reloaded settings apply
/// to the next task without restarting the daemon.
pub struct AgentTaskExecutor {
    config: ConfigHandle,
    paths: StatePaths,
}

impl AgentTaskExecutor {
    pub fn new(config: ConfigHandle, paths: StatePaths) -> Self {
        Self { config, paths }
    }

    async fn run_code_agent_task(
        &self,
        task: &Task,
        category: &str,
        cancel: CancellationToken,
    ) -> Result<AgentExecutionResult> {
        let config = self.config.load_full();
        let stage_timeout: Duration = parse_timeout(&task.timeout)?;
        let executor = CliStageExecutor::new(cancel);
        let harness = GitHarness::new(self.paths.checkouts_dir());

        let pipeline =
            run_code_agent(&config, Some(category), stage_timeout, &executor, &harness).await?;
        Ok(execution_result(&pipeline))
    }
}

impl TaskExecutor for AgentTaskExecutor {
    fn execute<'a>(&'a self, task: &'a Task, cancel: CancellationToken) -> ExecFuture<'a> {
        Box::pin(async move {
            match task.category.as_deref() {
                Some(category) => self.run_code_agent_task(task, category, cancel).await,
                None => {
                    let config = self.config.load_full();
                    AgentRunner::new(config.agent_bin.clone(), config.workspace_dir())
                        .run(task, cancel)
                        .await
                }
            }
        })
    }
}

/// A pipeline that exhausted its retries fails the task; finding nothing to
/// improve does not.
fn execution_result(pipeline: &PipelineResult) -> AgentExecutionResult {
    AgentExecutionResult {
        session_id: String::new(),
        duration_ms: pipeline.total_duration_ms,
        total_cost_usd: pipeline.total_cost_usd,
        result: describe_run(pipeline),
        is_error: pipeline.outcome == Outcome::Abandoned,
        num_turns: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline(outcome: Outcome) -> PipelineResult {
        PipelineResult {
            outcome,
            category_used: "tests".into(),
            total_cost_usd: 1.25,
            total_duration_ms: 90_000,
            ..PipelineResult::no_category_scheduled()
        }
    }

    #[test]
    fn abandoned_pipeline_is_a_failed_task() {
        let result = execution_result(&pipeline(Outcome::Abandoned));
        assert!(result.is_error);
        assert!(result.result.contains("ABANDONED"));
        assert!((result.total_cost_usd - 1.25).abs() < f64::EPSILON);
    }

    #[test]
    fn created_or_no_improvement_is_success() {
        assert!(!execution_result(&pipeline(Outcome::MrCreated)).is_error);
        assert!(!execution_result(&pipeline(Outcome::NoImprovement)).is_error);
    }
}
