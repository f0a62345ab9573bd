use crate::error::ConfigError;
use std::time::Duration;

/// Parse a task timeout such as `"30m"`, `"2h"`, `"90s"` or `"5000ms"`.
pub fn parse_timeout(raw: &str) -> Result<Duration, ConfigError> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| ConfigError::Timeout(raw.to_string()))?;
    let (digits, unit) = raw.split_at(split);
    if digits.is_empty() {
        return Err(ConfigError::Timeout(raw.to_string()));
    }
    let value: u64 = digits
        .parse()
        .map_err(|_| ConfigError::Timeout(raw.to_string()))?;

    let duration = match unit {
        "ms" => Duration::from_millis(value),
        "s" => Duration::from_secs(value),
        "m" => Duration::from_secs(value.saturating_mul(60)),
        "h" => Duration::from_secs(value.saturating_mul(3600)),
        _ => return Err(ConfigError::Timeout(raw.to_string())),
    };
    Ok(duration)
}

/// Human-readable rendering used by reports and the status command.
pub fn format_duration_human(seconds: u64) -> String {
    if seconds < 60 {
        return format!("{seconds}s");
    }
    let minutes = seconds / 60;
    let secs = seconds % 60;
    if minutes < 60 {
        return format!("{minutes}m {secs}s");
    }
    format!("{}h {}m", minutes / 60, minutes % 60)
}
