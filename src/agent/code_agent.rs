//! One complete code-agent run: checkout, pipeline, run log, log stage.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use chrono::{Datelike, Local, Utc, Weekday};
use tracing::Instrument;

use super::bead::{
    Credential, Stage, StageExecutor, StageInvocation, build_stage_args, build_stage_env,
};
use super::git::RepoHarness;
use super::pipeline::category::{Category, resolve_category};
use super::pipeline::{Outcome, PipelineContext, PipelineResult, run_pipeline};
use super::prompt::load_stage_prompt;
use super::run_log::{RunLogEntry, append_run_log};
use crate::config::{CodeAgentConfig, Config, StatePaths};
use crate::error::{ConfigError, Result};
use crate::util::duration::format_duration_human;

/// Category value that defers to the weekday schedule.
pub const SCHEDULED_CATEGORY: &str = "scheduled";

pub const LOG_STAGE_TIMEOUT: Duration = Duration::from_secs(120);

pub const LOG_STAGE_TOOLS: &[&str] = &[
    "mcp__atlassian__getAccessibleAtlassianResources",
    "mcp__atlassian__getConfluencePage",
    "mcp__atlassian__updateConfluencePage",
];

/// An explicit category wins; `None` or `"scheduled"` reads today's entry.
pub fn resolve_primary(
    config: &CodeAgentConfig,
    requested: Option<&str>,
    weekday: Weekday,
) -> Option<Category> {
    match requested.map(str::trim) {
        Some(name) if !name.is_empty() && name != SCHEDULED_CATEGORY => Some(Category::from(name)),
        _ => resolve_category(&config.category_schedule, weekday),
    }
}

pub fn derive_summary(result: &PipelineResult) -> String {
    match result.outcome {
        Outcome::MrCreated => result.mr_url.clone().unwrap_or_else(|| "MR created".into()),
        Outcome::NoImprovement => result
            .reason
            .clone()
            .unwrap_or_else(|| "No improvement found".into()),
        Outcome::Abandoned => result
            .reason
            .clone()
            .unwrap_or_else(|| "Abandoned after retries".into()),
    }
}

/// Plain-text outcome block for reports and the terminal.
pub fn describe_run(result: &PipelineResult) -> String {
    let mut lines = vec![
        format!("Outcome:  {}", result.outcome),
        format!("Category: {}", result.category_used),
    ];
    if let Some(url) = &result.mr_url {
        lines.push(format!("MR URL:   {url}"));
    }
    lines.push(format!(
        "Duration: {}",
        format_duration_human(result.total_duration_ms.saturating_add(500) / 1000)
    ));
    lines.push(format!("Cost:     ${:.2}", result.total_cost_usd));
    lines.push(format!("Summary:  {}", derive_summary(result)));
    lines.join("\n")
}

impl RunLogEntry {
    pub fn from_result(result: &PipelineResult) -> Self {
        Self {
            date: Utc::now().to_rfc3339(),
            category: result.category_used.clone(),
            mr_url: result.mr_url.clone(),
            cost_usd: result.total_cost_usd,
            duration_seconds: result.total_duration_ms.saturating_add(500) / 1000,
            summary: derive_summary(result),
        }
    }
}

/// Run the code-agent pipeline once against the configured repository.
///
/// Only a missing `[code_agent]` section or a failed clone is an error;
/// everything after the checkout is folded into the returned result.
pub async fn run_code_agent(
    config: &Config,
    requested: Option<&str>,
    stage_timeout: Duration,
    executor: &dyn StageExecutor,
    harness: &dyn RepoHarness,
) -> Result<PipelineResult> {
    let agent = config
        .code_agent
        .as_ref()
        .ok_or_else(|| ConfigError::Validation("no [code_agent] section configured".into()))?;
    let run_id = hex::encode(rand::random::<[u8; 4]>());
    let span = tracing::info_span!("code_agent", %run_id);
    execute_run(config, agent, requested, stage_timeout, executor, harness)
        .instrument(span)
        .await
}

async fn execute_run(
    config: &Config,
    agent: &CodeAgentConfig,
    requested: Option<&str>,
    stage_timeout: Duration,
    executor: &dyn StageExecutor,
    harness: &dyn RepoHarness,
) -> Result<PipelineResult> {
    let paths = StatePaths::new(&config.base_dir());
    let Some(primary) = resolve_primary(agent, requested, Local::now().weekday()) else {
        tracing::info!("no category scheduled for today");
        let result = PipelineResult::no_category_scheduled();
        record_run(&paths, &RunLogEntry::from_result(&result)).await;
        return Ok(result);
    };

    let credential = Credential::from_env(&agent.credential_env);
    if credential.is_none() {
        tracing::warn!(var = %agent.credential_env, "credential not set, merge requests will likely fail");
    }
    let checkout = harness
        .checkout(&agent.repo_url, credential.as_ref())
        .await
        .context("cloning code-agent repository")?;

    let ctx = PipelineContext {
        config: agent.clone(),
        config_dir: config.base_dir(),
        repo_dir: checkout.repo_dir.clone(),
        handoff_dir: checkout.handoff_dir.clone(),
        agent_bin: config.agent_bin.clone(),
        credential,
        stage_timeout,
        span: tracing::Span::current(),
    };
    tracing::info!(%primary, repo_url = %agent.repo_url, "starting pipeline");
    let result = run_pipeline(&ctx, &primary, executor, harness).await;
    tracing::info!(
        outcome = %result.outcome,
        category = %result.category_used,
        cost_usd = result.total_cost_usd,
        duration_ms = result.total_duration_ms,
        "pipeline finished"
    );

    let entry = RunLogEntry::from_result(&result);
    record_run(&paths, &entry).await;
    match &agent.log_mcp_config {
        Some(mcp_config) => {
            let mcp_config = config.resolve_path(mcp_config);
            run_log_stage(&ctx, &entry, &mcp_config.to_string_lossy(), executor).await;
        }
        None => tracing::warn!("log_mcp_config not set, skipping Confluence update"),
    }

    drop(checkout);
    Ok(result)
}

async fn record_run(paths: &StatePaths, entry: &RunLogEntry) {
    if let Err(e) = append_run_log(&paths.run_log_file(), entry).await {
        tracing::error!(error = %e, "failed to write code-agent run log");
    }
}

/// Best-effort Confluence update. Never receives the credential.
async fn run_log_stage(
    ctx: &PipelineContext,
    entry: &RunLogEntry,
    mcp_config: &str,
    executor: &dyn StageExecutor,
) {
    let vars = HashMap::from([
        ("date".to_string(), entry.date.clone()),
        ("category".to_string(), entry.category.clone()),
        (
            "mr_url".to_string(),
            entry.mr_url.clone().unwrap_or_else(|| "null".into()),
        ),
        ("cost_usd".to_string(), format!("{:.4}", entry.cost_usd)),
        ("duration_seconds".to_string(), entry.duration_seconds.to_string()),
        ("summary".to_string(), entry.summary.clone()),
        (
            "confluence_page_id".to_string(),
            ctx.config.confluence_page_id.clone(),
        ),
    ]);
    let prompt = load_stage_prompt(Stage::Log, &ctx.config.prompts.log, &vars, &ctx.config_dir).await;
    let invocation = StageInvocation {
        stage: Stage::Log,
        program: ctx.agent_bin.clone(),
        args: build_stage_args(
            &prompt,
            &ctx.config.models.log,
            LOG_STAGE_TOOLS,
            None,
            Some(mcp_config),
        ),
        env: build_stage_env(Stage::Log, None),
        cwd: ctx.repo_dir.clone(),
        timeout: LOG_STAGE_TIMEOUT,
    };
    let result = executor.execute(&invocation).await;
    if result.succeeded() {
        tracing::info!("Confluence run log updated");
    } else {
        tracing::error!(
            exit_code = result.exit_code,
            timed_out = result.timed_out,
            "log stage failed, Confluence not updated"
        );
    }
}
