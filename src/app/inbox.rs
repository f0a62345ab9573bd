use nightshift::inbox::ReportSummary;
use nightshift::ui::style;
use nightshift::util::duration::format_duration_human;

/// Table of inbox reports, newest first.
pub fn render_inbox(reports: &[ReportSummary]) -> String {
    if reports.is_empty() {
        return style::dim("No inbox reports yet.");
    }

    let rows: Vec<[String; 5]> = reports
        .iter()
        .map(|report| {
            [
                report.task_name.clone(),
                report.status.clone(),
                report
                    .duration_seconds
                    .map_or_else(|| "?".into(), format_duration_human),
                report
                    .cost_usd
                    .map_or_else(|| "?".into(), |cost| format!("${cost:.2}")),
                report.file_name.clone(),
            ]
        })
        .collect();
    let headers = ["Task", "Status", "Duration", "Cost", "File"];
    let widths: Vec<usize> = (0..headers.len())
        .map(|col| {
            rows.iter()
                .map(|row| row[col].chars().count())
                .chain([headers[col].len()])
                .max()
                .unwrap_or(0)
        })
        .collect();

    let mut lines = vec![format!("◆ {}", style::header("Inbox")), String::new()];
    let header_row: Vec<String> = headers
        .iter()
        .zip(&widths)
        .map(|(h, w)| style::dim(format!("{h:<w$}")))
        .collect();
    lines.push(format!("  {}", header_row.join("  ")));
    for row in &rows {
        let cells: Vec<String> = row
            .iter()
            .zip(&widths)
            .enumerate()
            .map(|(col, (cell, w))| {
                let padded = format!("{cell:<w$}");
                match (col, cell.as_str()) {
                    (1, "completed") => style::success(padded),
                    (1, "failed" | "timed-out") => style::failure(padded),
                    _ => padded,
                }
            })
            .collect();
        lines.push(format!("  {}", cells.join("  ").trim_end()));
    }
    lines.push(String::new());
    lines.push(style::dim("Run 'nightshift inbox --read <file>' to view a report"));
    lines.join("\n")
}
