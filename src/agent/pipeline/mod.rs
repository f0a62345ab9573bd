//! Code-agent pipeline: analyze, implement, verify, publish.
//!
//! Categories are tried in [`category::visit_order`]. For each one the
//! analyze stage decides whether there is work; if so, implement and verify
//! run up to [`MAX_ATTEMPTS`] times with a repository reset before every
//! retry. The first verified change is published and ends the run.

pub mod category;
pub mod handoff;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use tracing::Instrument;

use super::bead::{
    BeadResult, Credential, STAGE_TOOLS, Stage, StageExecutor, StageInvocation, build_stage_args,
    build_stage_env,
};
use super::git::RepoHarness;
use super::prompt::load_stage_prompt;
use crate::config::CodeAgentConfig;
use crate::task::AgentJsonOutput;
use category::{Category, visit_order};
use handoff::{ANALYSIS_FILE, VERIFY_FILE};

/// Implement+verify attempts per category (one initial try and two retries).
pub const MAX_ATTEMPTS: usize = 3;

static MR_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://[^\s]+/merge_requests/\d+").expect("merge request pattern is valid")
});

/// Immutable inputs for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub config: CodeAgentConfig,
    /// Directory prompt template paths are relative to.
    pub config_dir: PathBuf,
    pub repo_dir: PathBuf,
    pub handoff_dir: PathBuf,
    pub agent_bin: String,
    pub credential: Option<Credential>,
    pub stage_timeout: Duration,
    pub span: tracing::Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    MrCreated,
    NoImprovement,
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResult {
    pub outcome: Outcome,
    pub mr_url: Option<String>,
    pub category_used: String,
    pub is_fallback: bool,
    pub reason: Option<String>,
    pub summary: Option<String>,
    pub total_cost_usd: f64,
    pub total_duration_ms: u64,
}

impl PipelineResult {
    pub fn no_category_scheduled() -> Self {
        Self {
            outcome: Outcome::NoImprovement,
            mr_url: None,
            category_used: "none".into(),
            is_fallback: false,
            reason: Some("No category scheduled for today".into()),
            summary: None,
            total_cost_usd: 0.0,
            total_duration_ms: 0,
        }
    }
}

/// Why a category did not produce a merge request.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CategoryFailure {
    NoImprovement(String),
    RetriesExhausted,
}

impl CategoryFailure {
    fn describe(&self) -> &str {
        match self {
            Self::NoImprovement(reason) => reason,
            Self::RetriesExhausted => "verify failed after retries",
        }
    }
}

#[derive(Default)]
struct Totals {
    cost_usd: f64,
    duration_ms: u64,
}

impl Totals {
    fn add(&mut self, result: &BeadResult) {
        self.cost_usd += result.cost_usd;
        self.duration_ms = self.duration_ms.saturating_add(result.duration_ms);
    }
}

/// Run the pipeline starting from `primary`. Never fails: every stage
/// problem becomes part of the returned result.
pub async fn run_pipeline(
    ctx: &PipelineContext,
    primary: &Category,
    executor: &dyn StageExecutor,
    harness: &dyn RepoHarness,
) -> PipelineResult {
    let runner = Runner {
        ctx,
        executor,
        harness,
    };
    runner.run(primary).instrument(ctx.span.clone()).await
}

struct Runner<'a> {
    ctx: &'a PipelineContext,
    executor: &'a dyn StageExecutor,
    harness: &'a dyn RepoHarness,
}

impl Runner<'_> {
    async fn run(&self, primary: &Category) -> PipelineResult {
        let order = visit_order(primary);
        let mut totals = Totals::default();
        let mut failures: Vec<(Category, CategoryFailure)> = Vec::new();

        for (index, category) in order.iter().enumerate() {
            let is_fallback = index > 0;
            tracing::info!(%category, is_fallback, position = index + 1, total = order.len(), "analyzing");

            let analysis = self.analyze(category, &mut totals).await;
            if !analysis.found_improvement() {
                let reason = analysis
                    .reason
                    .clone()
                    .unwrap_or_else(|| "no improvement found".into());
                tracing::info!(%category, %reason, "no improvement, trying next category");
                failures.push((category.clone(), CategoryFailure::NoImprovement(reason)));
                continue;
            }
            tracing::info!(
                %category,
                selected = analysis.selected.as_ref().map(|c| c.description.as_str()).unwrap_or(""),
                "improvement found"
            );

            if !self.implement_until_verified(category, &mut totals).await {
                self.reset(category).await;
                tracing::warn!(%category, "verify failed after all retries, trying next category");
                failures.push((category.clone(), CategoryFailure::RetriesExhausted));
                continue;
            }

            let category_used = if is_fallback {
                format!("{category} (fallback from {primary})")
            } else {
                category.to_string()
            };
            let short_description = analysis.short_description(category.as_str());
            let mr_url = self
                .publish(category, &category_used, &short_description, &mut totals)
                .await;
            tracing::info!(category = %category_used, mr_url = mr_url.as_deref().unwrap_or("none"), "merge request stage finished");

            return PipelineResult {
                outcome: Outcome::MrCreated,
                mr_url,
                category_used,
                is_fallback,
                reason: None,
                summary: None,
                total_cost_usd: totals.cost_usd,
                total_duration_ms: totals.duration_ms,
            };
        }

        let summary = failures
            .iter()
            .map(|(category, failure)| format!("{category}: {}", failure.describe()))
            .collect::<Vec<_>>()
            .join("; ");
        let outcome = if failures
            .iter()
            .any(|(_, f)| *f == CategoryFailure::RetriesExhausted)
        {
            Outcome::Abandoned
        } else {
            Outcome::NoImprovement
        };
        tracing::info!(%outcome, %summary, "all categories exhausted");

        PipelineResult {
            outcome,
            mr_url: None,
            category_used: primary.to_string(),
            is_fallback: false,
            reason: Some(format!("All categories exhausted. {summary}")),
            summary: Some(summary),
            total_cost_usd: totals.cost_usd,
            total_duration_ms: totals.duration_ms,
        }
    }

    async fn analyze(&self, category: &Category, totals: &mut Totals) -> handoff::AnalysisResult {
        let handoff_file = self.ctx.handoff_dir.join(ANALYSIS_FILE);
        handoff::seed_analysis(&handoff_file).await;

        let vars = self.vars(category, &handoff_file.to_string_lossy());
        let result = self.invoke(Stage::Analyze, &self.ctx.config.prompts.analyze, &vars).await;
        totals.add(&result);

        handoff::read_analysis(&handoff_file, category.as_str()).await
    }

    /// Implement/verify attempts; `true` once verify passes.
    async fn implement_until_verified(&self, category: &Category, totals: &mut Totals) -> bool {
        let analysis_file = self.ctx.handoff_dir.join(ANALYSIS_FILE);
        let verify_file = self.ctx.handoff_dir.join(VERIFY_FILE);
        let mut last_error = String::new();

        for attempt in 1..=MAX_ATTEMPTS {
            if attempt > 1 {
                tracing::info!(%category, attempt, "resetting checkout before retry");
                self.reset(category).await;
            }

            tracing::info!(%category, attempt, max = MAX_ATTEMPTS, "implementing");
            let mut vars = self.vars(category, &analysis_file.to_string_lossy());
            vars.insert(
                "analysis_file".into(),
                analysis_file.to_string_lossy().into_owned(),
            );
            vars.insert("verify_error".into(), last_error.clone());
            let result = self
                .invoke(Stage::Implement, &self.ctx.config.prompts.implement, &vars)
                .await;
            totals.add(&result);

            tracing::info!(%category, attempt, "verifying");
            handoff::seed_verify(&verify_file).await;
            let vars = self.vars(category, &verify_file.to_string_lossy());
            let result = self
                .invoke(Stage::Verify, &self.ctx.config.prompts.verify, &vars)
                .await;
            totals.add(&result);

            let verdict = handoff::read_verify(&verify_file).await;
            if verdict.passed {
                return true;
            }
            last_error = verdict.error_details.unwrap_or_default();
            tracing::warn!(
                %category,
                attempt,
                error = crate::util::text::truncate_chars(&last_error, 200),
                "verify failed"
            );
        }
        false
    }

    async fn publish(
        &self,
        category: &Category,
        category_used: &str,
        short_description: &str,
        totals: &mut Totals,
    ) -> Option<String> {
        let analysis_file = self.ctx.handoff_dir.join(ANALYSIS_FILE);
        let mut vars = self.vars(category, &analysis_file.to_string_lossy());
        vars.insert(
            "analysis_file".into(),
            analysis_file.to_string_lossy().into_owned(),
        );
        vars.insert("short_description".into(), short_description.to_string());
        vars.insert("category".into(), category_used.to_string());

        if self.ctx.credential.is_none() {
            tracing::warn!(var = %self.ctx.config.credential_env, "credential not set, merge request creation may fail");
        }
        let result = self.invoke(Stage::Mr, &self.ctx.config.prompts.mr, &vars).await;
        totals.add(&result);
        extract_mr_url(&result.stdout)
    }

    async fn reset(&self, category: &Category) {
        if let Err(e) = self.harness.reset(&self.ctx.repo_dir).await {
            tracing::warn!(%category, error = %e, "failed to reset checkout");
        }
    }

    /// Built-ins first; user `variables` overwrite them on collision.
    fn vars(&self, category: &Category, handoff_file: &str) -> HashMap<String, String> {
        let config = &self.ctx.config;
        let mut vars = HashMap::from([
            ("category".to_string(), category.to_string()),
            ("category_guidance".to_string(), category.guidance().to_string()),
            ("repo_url".to_string(), config.repo_url.clone()),
            ("handoff_file".to_string(), handoff_file.to_string()),
            ("allowed_commands".to_string(), config.allowed_commands.join(", ")),
            ("reviewer".to_string(), config.reviewer.clone().unwrap_or_default()),
        ]);
        vars.extend(
            config
                .variables
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        vars
    }

    async fn invoke(
        &self,
        stage: Stage,
        template_path: &str,
        vars: &HashMap<String, String>,
    ) -> BeadResult {
        let prompt = load_stage_prompt(stage, template_path, vars, &self.ctx.config_dir).await;
        let invocation = StageInvocation {
            stage,
            program: self.ctx.agent_bin.clone(),
            args: build_stage_args(
                &prompt,
                stage_model(&self.ctx.config, stage),
                STAGE_TOOLS,
                self.ctx.config.max_budget_usd,
                None,
            ),
            env: build_stage_env(stage, self.ctx.credential.as_ref()),
            cwd: self.ctx.repo_dir.clone(),
            timeout: self.ctx.stage_timeout,
        };
        let result = self.executor.execute(&invocation).await;
        if !result.succeeded() {
            tracing::warn!(
                %stage,
                exit_code = result.exit_code,
                timed_out = result.timed_out,
                stderr = crate::util::text::truncate_chars(result.stderr.trim(), 200),
                "stage did not exit cleanly"
            );
        }
        result
    }
}

pub fn stage_model(config: &CodeAgentConfig, stage: Stage) -> &str {
    match stage {
        Stage::Analyze => &config.models.analyze,
        Stage::Implement => &config.models.implement,
        Stage::Verify => &config.models.verify,
        Stage::Mr => &config.models.mr,
        Stage::Log => &config.models.log,
    }
}

/// Merge request URL from the agent's JSON `result`, or from raw stdout when
/// it is not JSON.
pub fn extract_mr_url(stdout: &str) -> Option<String> {
    if stdout.trim().is_empty() {
        return None;
    }
    let haystack = match serde_json::from_str::<AgentJsonOutput>(stdout) {
        Ok(parsed) => parsed.result,
        Err(_) => stdout.to_string(),
    };
    MR_URL.find(&haystack).map(|m| m.as_str().to_string())
}
