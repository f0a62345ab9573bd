//! Markdown reports for finished tasks.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::PersistenceError;
use crate::task::TaskResult;
use crate::util::duration::format_duration_human;
use crate::util::fs::atomic_write;
use crate::util::template::render_template;

/// Render a report with a YAML front-matter block.
pub fn generate_report(entry: &TaskResult) -> String {
    let task = &entry.task;
    let result = &entry.result;
    let duration_seconds = (entry.completed_at - entry.started_at)
        .num_seconds()
        .max(0)
        .unsigned_abs();
    let status = entry.final_status();
    let quoted_prompt = task
        .prompt
        .lines()
        .map(|line| format!("> {line}"))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "---\n\
         task_id: {id}\n\
         task_name: {name}\n\
         origin: {origin}\n\
         status: {status}\n\
         started_at: {started}\n\
         completed_at: {completed}\n\
         duration_seconds: {duration_seconds}\n\
         cost_usd: {cost:.2}\n\
         num_turns: {turns}\n\
         ---\n\
         \n\
         # {name}\n\
         \n\
         **Status**: {status_title} | **Duration**: {human} | **Cost**: ${cost:.2}\n\
         \n\
         ## Result\n\
         \n\
         {body}\n\
         \n\
         ## Original Prompt\n\
         \n\
         {quoted_prompt}\n",
        id = task.id,
        name = task.name,
        origin = task.origin,
        started = entry.started_at.to_rfc3339(),
        completed = entry.completed_at.to_rfc3339(),
        cost = result.total_cost_usd,
        turns = result.num_turns,
        status_title = capitalize(&status.to_string()),
        human = format_duration_human(duration_seconds),
        body = result.result,
    )
}

/// Write the report into `inbox_dir` and mirror it to the task's `output` path.
///
/// Relative output paths resolve against `base_dir`. Returns the inbox path.
pub async fn write_report(
    entry: &TaskResult,
    inbox_dir: &Path,
    base_dir: &Path,
) -> Result<PathBuf, PersistenceError> {
    let task = &entry.task;
    let short_id: String = task.id.chars().take(8).collect();
    let file_name = format!(
        "{}_{}_{}.md",
        entry.completed_at.format("%Y-%m-%d"),
        sanitize(&task.name),
        short_id
    );
    let path = inbox_dir.join(file_name);
    let content = generate_report(entry);
    atomic_write(&path, content.as_bytes()).await?;

    if let Some(output) = &task.output {
        let vars = HashMap::from([("name".to_string(), task.name.clone())]);
        let output_path = base_dir.join(render_template(output, &vars));
        atomic_write(&output_path, content.as_bytes()).await?;
        tracing::debug!(task_id = %task.id, path = %output_path.display(), "report mirrored");
    }

    Ok(path)
}

/// Front-matter fields of one report, as listed by `nightshift inbox`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportSummary {
    pub file_name: String,
    pub task_name: String,
    pub status: String,
    pub duration_seconds: Option<u64>,
    pub cost_usd: Option<f64>,
}

/// `key: value` pairs of the leading `---` block; empty without one.
pub fn parse_front_matter(content: &str) -> HashMap<String, String> {
    let Some(rest) = content.strip_prefix("---\n") else {
        return HashMap::new();
    };
    rest.lines()
        .take_while(|line| *line != "---")
        .filter_map(|line| line.split_once(": "))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}

/// Newest `limit` reports in `inbox_dir`, ordered by file name descending.
/// A missing inbox lists nothing.
pub async fn list_reports(
    inbox_dir: &Path,
    limit: usize,
) -> Result<Vec<ReportSummary>, PersistenceError> {
    let read_err = |path: &Path, source| PersistenceError::Read {
        path: path.display().to_string(),
        source,
    };
    let mut entries = match tokio::fs::read_dir(inbox_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(read_err(inbox_dir, e)),
    };

    let mut names = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| read_err(inbox_dir, e))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".md") {
            names.push(name);
        }
    }
    names.sort_unstable_by(|a, b| b.cmp(a));
    names.truncate(limit);

    let mut summaries = Vec::with_capacity(names.len());
    for file_name in names {
        let path = inbox_dir.join(&file_name);
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| read_err(&path, e))?;
        let mut meta = parse_front_matter(&content);
        summaries.push(ReportSummary {
            task_name: meta.remove("task_name").unwrap_or_else(|| "unknown".into()),
            status: meta.remove("status").unwrap_or_else(|| "completed".into()),
            duration_seconds: meta.get("duration_seconds").and_then(|v| v.parse().ok()),
            cost_usd: meta.get("cost_usd").and_then(|v| v.parse().ok()),
            file_name,
        });
    }
    Ok(summaries)
}

/// Contents of the report named `file_name`. Only bare file names inside
/// `inbox_dir` are accepted.
pub async fn read_report(inbox_dir: &Path, file_name: &str) -> Result<String, PersistenceError> {
    let path = inbox_dir.join(file_name);
    let is_bare = Path::new(file_name)
        .file_name()
        .is_some_and(|name| name == file_name);
    if !is_bare {
        return Err(PersistenceError::Read {
            path: path.display().to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "report name must be a file in the inbox",
            ),
        });
    }
    tokio::fs::read_to_string(&path)
        .await
        .map_err(|source| PersistenceError::Read {
            path: path.display().to_string(),
            source,
        })
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    chars
        .next()
        .map(|first| first.to_uppercase().chain(chars).collect())
        .unwrap_or_default()
}
