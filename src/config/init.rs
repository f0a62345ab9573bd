use std::path::Path;

use crate::error::ConfigError;

/// Starter config written by `nightshift init`.
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"workspace = "./workspace"
max_concurrent = 2
default_timeout = "30m"

[queue]
backend = "file"      # or "beads"

[daemon]
poll_interval_ms = 30000
heartbeat_interval_ms = 10000
log_retention_days = 30

# [[recurring]]
# name = "daily-standup-prep"
# schedule = "0 6 * * 1-5"
# prompt = """
# Check Jira for my team's recent updates and prepare
# standup notes for today's meeting.
# """
# allowed_tools = ["mcp__jira__*", "Read", "Write"]
# output = "inbox/standup-prep-{{date}}.md"
# timeout = "15m"
# max_budget_usd = 2.00
# notify = true

# [ntfy]
# topic = "night-shift"
# token = "tk_abc123"            # optional
# base_url = "https://ntfy.sh"   # optional

# [code_agent]
# repo_url = "git@gitlab.com:team/repo.git"
# confluence_page_id = "123456"
#
# [code_agent.category_schedule]
# monday = ["tests"]
# tuesday = ["refactoring"]
# wednesday = ["docs"]
# thursday = ["error_handling"]
# friday = ["cleanup"]
#
# Prompt template overrides, relative to this file:
# [code_agent.prompts]
# analyze = "./prompts/analyze.md"
# implement = "./prompts/implement.md"
# verify = "./prompts/verify.md"
# mr = "./prompts/mr.md"
"#;

/// Write [`DEFAULT_CONFIG_TEMPLATE`] to `path`. An existing file is kept
/// unless `force` is set; returns whether the file was written.
pub fn write_default_config(path: &Path, force: bool) -> Result<bool, ConfigError> {
    if path.exists() && !force {
        return Ok(false);
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, DEFAULT_CONFIG_TEMPLATE)?;
    Ok(true)
}
