use chrono::{DateTime, Utc};

use nightshift::platform::daemon::{DaemonState, DaemonStatus, is_daemon_running};
use nightshift::ui::style;
use nightshift::util::duration::format_duration_human;

/// Human view of the recorded daemon state at `now`.
pub fn render_status(state: Option<&DaemonState>, now: DateTime<Utc>) -> String {
    let mut lines = vec![format!("◆ {}", style::header("nightshift daemon")), String::new()];

    let Some(state) = state else {
        lines.push(format!("  {}  {}", style::dim("Status"), style::warn("not running")));
        return lines.join("\n");
    };

    let age = u64::try_from(state.heartbeat_age(now).num_seconds()).unwrap_or(0);
    let status = if is_daemon_running(state, now) {
        style::success(format!("{} (pid {})", state.status, state.pid))
    } else if state.status == DaemonStatus::Stopped {
        style::warn("stopped")
    } else {
        style::failure(format!("stale (pid {})", state.pid))
    };

    lines.push(format!("  {}     {status}", style::dim("Status")));
    lines.push(format!(
        "  {}  {} ago",
        style::dim("Heartbeat"),
        format_duration_human(age)
    ));
    lines.push(format!(
        "  {}    {}",
        style::dim("Started"),
        state.started_at.to_rfc3339()
    ));
    lines.push(format!("  {}     {}", style::dim("Active"), state.active_tasks));
    lines.push(format!("  {}   {}", style::dim("Executed"), state.total_executed));
    lines.push(format!(
        "  {}       ${:.2}",
        style::dim("Cost"),
        state.total_cost_usd
    ));
    lines.join("\n")
}
