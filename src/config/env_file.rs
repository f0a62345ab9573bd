//! `.env` support: `KEY=VALUE` lines that fill in unset environment variables.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

pub const ENV_FILE: &str = ".env";

static ENV_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)=(.*)$").expect("env line pattern is valid")
});

/// Parse `.env` contents. Blank lines, `#` comments and malformed lines are
/// skipped; one pair of matching surrounding quotes is stripped.
pub fn parse_env(contents: &str) -> Vec<(String, String)> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let caps = ENV_LINE.captures(line)?;
            Some((caps[1].to_string(), unquote(caps[2].trim()).to_string()))
        })
        .collect()
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Pairs from `dir/.env` whose keys are not already set. A missing file
/// yields nothing.
pub fn pending_env(dir: &Path) -> std::io::Result<Vec<(String, String)>> {
    let contents = match std::fs::read_to_string(dir.join(ENV_FILE)) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    Ok(parse_env(&contents)
        .into_iter()
        .filter(|(key, _)| std::env::var_os(key).is_none())
        .collect())
}

/// Export the unset variables from `dir/.env` into this process. Variables
/// already in the environment win. Returns how many were set.
///
/// # Safety
///
/// Mutates the process environment; call before any other thread exists.
pub unsafe fn load_env_file(dir: &Path) -> std::io::Result<usize> {
    let pending = pending_env(dir)?;
    for (key, value) in &pending {
        // SAFETY: upheld by the caller.
        unsafe { std::env::set_var(key, value) };
    }
    Ok(pending.len())
}
