use crate::error::ConfigError;
use crate::platform::cron::parse_schedule;
use crate::util::duration::parse_timeout;
use chrono::Weekday;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

pub const DEFAULT_CONFIG_FILE: &str = "nightshift.toml";

static SSH_REPO_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^git@[a-zA-Z0-9._-]+:[a-zA-Z0-9._/-]+\.git$").expect("repo url pattern is valid")
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to nightshift.toml - set by the loader, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default = "default_workspace")]
    pub workspace: String,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    #[serde(default = "default_timeout")]
    pub default_timeout: String,

    /// Reasoning-agent executable invoked for every task and stage.
    #[serde(default = "default_agent_bin")]
    pub agent_bin: String,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(default)]
    pub recurring: Vec<RecurringTaskConfig>,

    #[serde(default)]
    pub one_off_defaults: OneOffDefaults,

    #[serde(default)]
    pub code_agent: Option<CodeAgentConfig>,

    /// Push notifications for tasks that set `notify`.
    #[serde(default)]
    pub ntfy: Option<NtfyConfig>,
}

fn default_workspace() -> String {
    "./workspace".into()
}

fn default_max_concurrent() -> usize {
    2
}

fn default_timeout() -> String {
    "30m".into()
}

fn default_agent_bin() -> String {
    "claude".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_FILE),
            workspace: default_workspace(),
            max_concurrent: default_max_concurrent(),
            default_timeout: default_timeout(),
            agent_bin: default_agent_bin(),
            queue: QueueConfig::default(),
            daemon: DaemonConfig::default(),
            recurring: Vec::new(),
            one_off_defaults: OneOffDefaults::default(),
            code_agent: None,
            ntfy: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    #[default]
    File,
    Beads,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub backend: QueueBackend,
    #[serde(default = "default_beads_bin")]
    pub beads_bin: String,
}

fn default_beads_bin() -> String {
    "bd".into()
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::default(),
            beads_bin: default_beads_bin(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_log_retention_days")]
    pub log_retention_days: u32,
}

fn default_poll_interval_ms() -> u64 {
    30_000
}

fn default_heartbeat_interval_ms() -> u64 {
    10_000
}

fn default_log_retention_days() -> u32 {
    30
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            log_retention_days: default_log_retention_days(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecurringTaskConfig {
    pub name: String,
    /// Five-field crontab expression (six or seven fields with seconds/year).
    pub schedule: String,
    pub prompt: String,
    #[serde(default)]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub timeout: Option<String>,
    #[serde(default)]
    pub max_budget_usd: Option<f64>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub mcp_config: Option<String>,
    /// Turns the task into a code-agent run with this primary category.
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub notify: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneOffDefaults {
    #[serde(default = "default_timeout")]
    pub timeout: String,
    #[serde(default)]
    pub max_budget_usd: Option<f64>,
    #[serde(default)]
    pub model: Option<String>,
}

impl Default for OneOffDefaults {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            max_budget_usd: None,
            model: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NtfyConfig {
    pub topic: String,
    /// Bearer token for protected topics.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_ntfy_base_url")]
    pub base_url: String,
}

fn default_ntfy_base_url() -> String {
    "https://ntfy.sh".into()
}

impl NtfyConfig {
    /// Topic URL messages are published to.
    pub fn topic_url(&self) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), self.topic)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeAgentConfig {
    pub repo_url: String,
    #[serde(default)]
    pub confluence_page_id: String,
    #[serde(default)]
    pub category_schedule: CategorySchedule,
    #[serde(default)]
    pub prompts: PromptPaths,
    /// MCP config handed to the optional log stage.
    #[serde(default)]
    pub log_mcp_config: Option<String>,
    #[serde(default)]
    pub reviewer: Option<String>,
    #[serde(default = "default_allowed_commands")]
    pub allowed_commands: Vec<String>,
    #[serde(default)]
    pub max_budget_usd: Option<f64>,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    /// Environment variable holding the repository credential.
    #[serde(default = "default_credential_env")]
    pub credential_env: String,
    #[serde(default)]
    pub models: StageModels,
}

fn default_allowed_commands() -> Vec<String> {
    ["git", "glab", "sbt compile", "sbt test", "sbt fmtCheck", "sbt fmt"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_credential_env() -> String {
    "GITLAB_TOKEN".into()
}

impl CodeAgentConfig {
    pub fn new(repo_url: impl Into<String>) -> Self {
        Self {
            repo_url: repo_url.into(),
            confluence_page_id: String::new(),
            category_schedule: CategorySchedule::default(),
            prompts: PromptPaths::default(),
            log_mcp_config: None,
            reviewer: None,
            allowed_commands: default_allowed_commands(),
            max_budget_usd: None,
            variables: BTreeMap::new(),
            credential_env: default_credential_env(),
            models: StageModels::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CategorySchedule {
    #[serde(default)]
    pub monday: Vec<String>,
    #[serde(default)]
    pub tuesday: Vec<String>,
    #[serde(default)]
    pub wednesday: Vec<String>,
    #[serde(default)]
    pub thursday: Vec<String>,
    #[serde(default)]
    pub friday: Vec<String>,
    #[serde(default)]
    pub saturday: Vec<String>,
    #[serde(default)]
    pub sunday: Vec<String>,
}

impl CategorySchedule {
    pub fn for_weekday(&self, weekday: Weekday) -> &[String] {
        match weekday {
            Weekday::Mon => &self.monday,
            Weekday::Tue => &self.tuesday,
            Weekday::Wed => &self.wednesday,
            Weekday::Thu => &self.thursday,
            Weekday::Fri => &self.friday,
            Weekday::Sat => &self.saturday,
            Weekday::Sun => &self.sunday,
        }
    }

    fn entries(&self) -> impl Iterator<Item = &String> {
        self.monday
            .iter()
            .chain(&self.tuesday)
            .chain(&self.wednesday)
            .chain(&self.thursday)
            .chain(&self.friday)
            .chain(&self.saturday)
            .chain(&self.sunday)
    }
}

/// Prompt template locations, relative to the config file's directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptPaths {
    #[serde(default = "default_analyze_prompt")]
    pub analyze: String,
    #[serde(default = "default_implement_prompt")]
    pub implement: String,
    #[serde(default = "default_verify_prompt")]
    pub verify: String,
    #[serde(default = "default_mr_prompt")]
    pub mr: String,
    #[serde(default = "default_log_prompt")]
    pub log: String,
}

fn default_analyze_prompt() -> String {
    "./prompts/analyze.md".into()
}

fn default_implement_prompt() -> String {
    "./prompts/implement.md".into()
}

fn default_verify_prompt() -> String {
    "./prompts/verify.md".into()
}

fn default_mr_prompt() -> String {
    "./prompts/mr.md".into()
}

fn default_log_prompt() -> String {
    "./prompts/log.md".into()
}

impl Default for PromptPaths {
    fn default() -> Self {
        Self {
            analyze: default_analyze_prompt(),
            implement: default_implement_prompt(),
            verify: default_verify_prompt(),
            mr: default_mr_prompt(),
            log: default_log_prompt(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageModels {
    #[serde(default = "default_heavy_model")]
    pub analyze: String,
    #[serde(default = "default_heavy_model")]
    pub implement: String,
    #[serde(default = "default_light_model")]
    pub verify: String,
    #[serde(default = "default_light_model")]
    pub mr: String,
    #[serde(default = "default_light_model")]
    pub log: String,
}

fn default_heavy_model() -> String {
    "opus".into()
}

fn default_light_model() -> String {
    "sonnet".into()
}

impl Default for StageModels {
    fn default() -> Self {
        Self {
            analyze: default_heavy_model(),
            implement: default_heavy_model(),
            verify: default_light_model(),
            mr: default_light_model(),
            log: default_light_model(),
        }
    }
}

impl Config {
    /// Read, parse and validate the config file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::NotFound(path.display().to_string()),
            _ => ConfigError::Io(e),
        })?;
        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| ConfigError::Parse(format!("{}: {e}", path.display())))?;
        config.config_path = path.to_path_buf();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::Validation(
                "max_concurrent must be at least 1".into(),
            ));
        }
        if self.daemon.poll_interval_ms == 0 || self.daemon.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "daemon intervals must be positive".into(),
            ));
        }
        if self.agent_bin.trim().is_empty() {
            return Err(ConfigError::Validation("agent_bin must not be empty".into()));
        }
        parse_timeout(&self.default_timeout)?;
        parse_timeout(&self.one_off_defaults.timeout)?;

        let mut names = HashSet::new();
        for recurring in &self.recurring {
            if recurring.name.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "recurring task name must not be empty".into(),
                ));
            }
            if !names.insert(recurring.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate recurring task name: {}",
                    recurring.name
                )));
            }
            if recurring.prompt.trim().is_empty() && recurring.category.is_none() {
                return Err(ConfigError::Validation(format!(
                    "recurring task {} has an empty prompt",
                    recurring.name
                )));
            }
            parse_schedule(&recurring.schedule)?;
            if let Some(timeout) = &recurring.timeout {
                parse_timeout(timeout)?;
            }
            if recurring.max_budget_usd.is_some_and(|b| b <= 0.0) {
                return Err(ConfigError::Validation(format!(
                    "recurring task {} max_budget_usd must be positive",
                    recurring.name
                )));
            }
        }

        if let Some(ntfy) = &self.ntfy
            && ntfy.topic.trim().is_empty()
        {
            return Err(ConfigError::Validation("ntfy.topic must not be empty".into()));
        }

        if let Some(code_agent) = &self.code_agent {
            if !SSH_REPO_URL.is_match(&code_agent.repo_url) {
                return Err(ConfigError::Validation(
                    "code_agent.repo_url must be an SSH git URL (git@host:org/repo.git)".into(),
                ));
            }
            if code_agent.category_schedule.entries().any(|c| c.trim().is_empty()) {
                return Err(ConfigError::Validation(
                    "code_agent.category_schedule entries must not be empty".into(),
                ));
            }
            if code_agent.credential_env.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "code_agent.credential_env must not be empty".into(),
                ));
            }
        }
        Ok(())
    }

    /// Directory holding the config file; relative paths resolve against it.
    pub fn base_dir(&self) -> PathBuf {
        self.config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), PathBuf::from)
    }

    pub fn workspace_dir(&self) -> PathBuf {
        self.resolve_path(&self.workspace)
    }

    /// Expand `~` and anchor relative paths at [`Config::base_dir`].
    pub fn resolve_path(&self, raw: &str) -> PathBuf {
        let expanded = PathBuf::from(shellexpand::tilde(raw).as_ref());
        if expanded.is_absolute() {
            expanded
        } else {
            self.base_dir().join(expanded)
        }
    }
}
