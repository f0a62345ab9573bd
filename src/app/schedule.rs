use chrono::{DateTime, TimeZone};
use std::fmt::Display;

use nightshift::config::Config;
use nightshift::platform::cron::{next_fire, parse_schedule};
use nightshift::ui::style;

/// Recurring tasks with their next trigger after `now`.
pub fn render_schedule<Tz>(config: &Config, now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let mut lines = vec![format!("◆ {}", style::header("Recurring tasks")), String::new()];
    if config.recurring.is_empty() {
        lines.push(style::dim("  No recurring tasks configured."));
        lines.push(style::dim(format!(
            "  Add [[recurring]] entries to {}.",
            config.config_path.display()
        )));
        return lines.join("\n");
    }

    for task in &config.recurring {
        let next = parse_schedule(&task.schedule)
            .ok()
            .and_then(|schedule| next_fire(&schedule, now))
            .map_or_else(|| "n/a".to_string(), |at| at.format("%Y-%m-%d %H:%M").to_string());
        let timeout = task.timeout.as_deref().unwrap_or(&config.default_timeout);
        let budget = task
            .max_budget_usd
            .map_or_else(|| "default".to_string(), |b| format!("${b:.2}"));

        lines.push(format!("  {}", style::header(&task.name)));
        lines.push(format!("    {}  {}", style::dim("Schedule"), task.schedule));
        lines.push(format!("    {}  {next}", style::dim("Next run")));
        lines.push(format!("    {}   {timeout}", style::dim("Timeout")));
        lines.push(format!("    {}    {budget}", style::dim("Budget")));
        if let Some(category) = &task.category {
            lines.push(format!("    {}  {category}", style::dim("Category")));
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use nightshift::config::RecurringTaskConfig;

    #[test]
    fn empty_schedule_points_at_config() {
        let out = render_schedule(&Config::default(), &Utc::now());
        assert!(out.contains("No recurring tasks configured."));
        assert!(out.contains("nightshift.toml"));
    }

    #[test]
    fn lists_next_run_timeout_and_budget() {
        let config = Config {
            recurring: vec![
                RecurringTaskConfig {
                    name: "standup".into(),
                    schedule: "30 6 * * *".into(),
                    prompt: "prepare notes".into(),
                    max_budget_usd: Some(2.0),
                    ..RecurringTaskConfig::default()
                },
                RecurringTaskConfig {
                    name: "weekly".into(),
                    schedule: "0 9 * * 1".into(),
                    prompt: "plan the week".into(),
                    timeout: Some("1h".into()),
                    ..RecurringTaskConfig::default()
                },
            ],
            ..Config::default()
        };
        // 2026-03-09 is a Monday.
        let now = Utc.with_ymd_and_hms(2026, 3, 9, 8, 0, 0).unwrap();
        let out = render_schedule(&config, &now);

        assert!(out.contains("2026-03-10 06:30"));
        assert!(out.contains("2026-03-09 09:00"));
        assert!(out.contains("$2.00"));
        assert!(out.contains("1h"));
        assert!(out.contains("30m"));
        assert!(out.contains("default"));
    }
}
