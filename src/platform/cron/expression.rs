use crate::error::ConfigError;
use cron::Schedule;
use std::str::FromStr;

/// Parse a crontab expression into a [`Schedule`].
///
/// Five-field expressions (`minute hour day month weekday`) get a leading
/// seconds field and their numeric weekdays shifted from crontab numbering
/// (0 or 7 = Sunday) to the crate's 1 = Sunday .. 7 = Saturday.
pub fn parse_schedule(expression: &str) -> Result<Schedule, ConfigError> {
    let normalized = normalize_expression(expression)?;
    Schedule::from_str(&normalized).map_err(|e| ConfigError::Cron {
        expression: expression.to_string(),
        message: e.to_string(),
    })
}

fn normalize_expression(expression: &str) -> Result<String, ConfigError> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    match fields.len() {
        5 => {
            let weekday = map_weekday_field(fields[4]);
            Ok(format!("0 {} {weekday}", fields[..4].join(" ")))
        }
        6 | 7 => Ok(fields.join(" ")),
        count => Err(ConfigError::Cron {
            expression: expression.to_string(),
            message: format!("expected 5, 6, or 7 fields, got {count}"),
        }),
    }
}

fn map_weekday_field(field: &str) -> String {
    field
        .split(',')
        .map(map_weekday_item)
        .collect::<Vec<_>>()
        .join(",")
}

fn map_weekday_item(item: &str) -> String {
    let (base, step) = match item.split_once('/') {
        Some((base, step)) => (base, Some(step)),
        None => (item, None),
    };
    let with_step = |mapped: String| match step {
        Some(step) => format!("{mapped}/{step}"),
        None => mapped,
    };

    if let Some((start, end)) = base.split_once('-')
        && let (Ok(start), Ok(end)) = (start.parse::<u8>(), end.parse::<u8>())
    {
        return match (start, end) {
            (0, 7) => with_step("1-7".into()),
            (start, 7) if start > 0 => format!("{},1", with_step(format!("{}-7", shift(start)))),
            (start, end) => with_step(format!("{}-{}", shift(start), shift(end))),
        };
    }
    match base.parse::<u8>() {
        Ok(day) => with_step(shift(day).to_string()),
        Err(_) => item.to_string(),
    }
}

fn shift(day: u8) -> u8 {
    day % 7 + 1
}
