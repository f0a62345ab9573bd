use chrono::{DateTime, Local};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{(\w+)\}\}").expect("placeholder pattern is valid"));

/// Render `{{var}}` placeholders.
///
/// Date helpers (`date`, `datetime`, `time`, `year`, `month`, `day`) are always
/// available and may be overridden by `vars`. Unknown placeholders are kept
/// verbatim so a typo shows up in the rendered output instead of vanishing.
pub fn render_template(template: &str, vars: &HashMap<String, String>) -> String {
    render_template_at(template, vars, Local::now())
}

pub fn render_template_at(
    template: &str,
    vars: &HashMap<String, String>,
    now: DateTime<Local>,
) -> String {
    let defaults = date_defaults(now);
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let key = &caps[1];
            vars.get(key)
                .or_else(|| defaults.get(key))
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn date_defaults(now: DateTime<Local>) -> HashMap<String, String> {
    [
        ("date", now.format("%Y-%m-%d").to_string()),
        ("datetime", now.format("%Y-%m-%d_%H-%M-%S").to_string()),
        ("time", now.format("%H-%M-%S").to_string()),
        ("year", now.format("%Y").to_string()),
        ("month", now.format("%m").to_string()),
        ("day", now.format("%d").to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}
