use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use nightshift::config::{Config, ConfigHandle};
use nightshift::platform::daemon::{DaemonStatus, Orchestrator, read_daemon_state, read_pid_file};
use nightshift::platform::pool::{ExecFuture, TaskExecutor};
use nightshift::queue::{FileQueue, TaskQueue};
use nightshift::task::{AgentExecutionResult, Task};

const HANGING_PROMPT: &str = "hang until cancelled";

/// Succeeds for every task and records the prompts it was handed.
/// [`HANGING_PROMPT`] blocks until the task is cancelled.
#[derive(Default)]
struct RecordingExecutor {
    prompts: Mutex<Vec<String>>,
}

impl TaskExecutor for RecordingExecutor {
    fn execute<'a>(&'a self, task: &'a Task, cancel: CancellationToken) -> ExecFuture<'a> {
        Box::pin(async move {
            self.prompts.lock().unwrap().push(task.prompt.clone());
            if task.prompt == HANGING_PROMPT {
                cancel.cancelled().await;
                return Ok(AgentExecutionResult::failure("Task cancelled during shutdown", 0));
            }
            Ok(AgentExecutionResult {
                session_id: "s-1".into(),
                duration_ms: 1500,
                total_cost_usd: 0.25,
                result: format!("handled: {}", task.prompt),
                is_error: false,
                num_turns: 2,
            })
        })
    }
}

struct Fixture {
    _tmp: TempDir,
    config: ConfigHandle,
    queue: Arc<dyn TaskQueue>,
    executor: Arc<RecordingExecutor>,
}

impl Fixture {
    fn new(extra: &str) -> Self {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nightshift.toml");
        std::fs::write(
            &path,
            format!(
                "workspace = \".\"\nmax_concurrent = 2\n\n[daemon]\npoll_interval_ms = 20\nheartbeat_interval_ms = 20\n{extra}"
            ),
        )
        .unwrap();
        let config = Config::load(&path).unwrap();
        let queue: Arc<dyn TaskQueue> =
            Arc::new(FileQueue::new(tmp.path().join(".nightshift/queue")));
        Self {
            _tmp: tmp,
            config: ConfigHandle::new(config),
            queue,
            executor: Arc::new(RecordingExecutor::default()),
        }
    }

    fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            self.config.clone(),
            Arc::clone(&self.queue),
            self.executor.clone(),
        )
    }
}

async fn wait_idle(orchestrator: &Orchestrator) {
    for _ in 0..300 {
        if orchestrator.pool().active_count() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("tasks never finished");
}

fn files_with_extension(dir: &Path, ext: &str) -> Vec<String> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .filter(|e| e.path().extension().is_some_and(|x| x == ext))
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn one_off_task_is_run_reported_and_removed() {
    let fixture = Fixture::new("");
    let mut orchestrator = fixture.orchestrator();
    orchestrator.start().await.unwrap();
    let paths = orchestrator.paths().clone();
    assert_eq!(read_pid_file(&paths).await, Some(std::process::id()));

    let task = Task::one_off("summarize open issues", &fixture.config.load(), chrono::Utc::now());
    fixture.queue.enqueue(&task).await.unwrap();

    orchestrator.tick().await;
    wait_idle(&orchestrator).await;
    orchestrator.tick().await;

    assert_eq!(
        *fixture.executor.prompts.lock().unwrap(),
        vec!["summarize open issues".to_string()]
    );
    let reports = files_with_extension(&paths.inbox_dir(), "md");
    assert_eq!(reports.len(), 1);
    let report = std::fs::read_to_string(paths.inbox_dir().join(&reports[0])).unwrap();
    assert!(report.contains("handled: summarize open issues"));
    assert!(files_with_extension(&paths.queue_dir(), "json").is_empty());

    assert_eq!(orchestrator.state().total_executed, 1);
    assert!((orchestrator.state().total_cost_usd - 0.25).abs() < f64::EPSILON);
    let persisted = read_daemon_state(&paths).await.unwrap();
    assert_eq!(persisted.total_executed, 1);
    assert_eq!(persisted.status, DaemonStatus::Running);

    orchestrator.stop().await;
    assert_eq!(read_pid_file(&paths).await, None);
    assert_eq!(
        read_daemon_state(&paths).await.unwrap().status,
        DaemonStatus::Stopped
    );
}

#[tokio::test]
async fn due_recurring_task_is_queued_and_dispatched_in_one_tick() {
    let fixture = Fixture::new(
        "\n[[recurring]]\nname = \"digest\"\nschedule = \"* * * * *\"\nprompt = \"write the digest\"\n",
    );
    let mut orchestrator = fixture.orchestrator();
    orchestrator.start().await.unwrap();
    let paths = orchestrator.paths().clone();

    orchestrator.tick().await;
    wait_idle(&orchestrator).await;
    orchestrator.tick().await;

    let prompts = fixture.executor.prompts.lock().unwrap().clone();
    assert_eq!(prompts.first().map(String::as_str), Some("write the digest"));
    let reports = files_with_extension(&paths.inbox_dir(), "md");
    assert!(!reports.is_empty());
    assert!(reports.iter().all(|name| name.contains("digest")));
    assert!(paths.scheduler_state_file().exists());

    orchestrator.stop().await;
}

#[tokio::test]
async fn run_loop_stops_when_shutdown_fires() {
    let fixture = Fixture::new("");
    let mut orchestrator = fixture.orchestrator();
    orchestrator.start().await.unwrap();
    let paths = orchestrator.paths().clone();

    let task = Task::one_off("late task", &fixture.config.load(), chrono::Utc::now());
    fixture.queue.enqueue(&task).await.unwrap();

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });
    tokio::time::timeout(Duration::from_secs(5), orchestrator.run(shutdown, CancellationToken::new()))
        .await
        .expect("run loop did not stop");

    assert_eq!(orchestrator.state().total_executed, 1);
    assert_eq!(read_pid_file(&paths).await, None);
    let persisted = read_daemon_state(&paths).await.unwrap();
    assert_eq!(persisted.status, DaemonStatus::Stopped);
    assert_eq!(persisted.active_tasks, 0);
}

#[tokio::test]
async fn forced_stop_cancels_running_tasks() {
    let fixture = Fixture::new("");
    let mut orchestrator = fixture.orchestrator();
    orchestrator.start().await.unwrap();
    let paths = orchestrator.paths().clone();

    let task = Task::one_off(HANGING_PROMPT, &fixture.config.load(), chrono::Utc::now());
    fixture.queue.enqueue(&task).await.unwrap();
    orchestrator.tick().await;
    assert_eq!(orchestrator.pool().active_count(), 1);

    let force = CancellationToken::new();
    let trigger = force.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });
    tokio::time::timeout(Duration::from_secs(5), orchestrator.stop_with(&force))
        .await
        .expect("forced stop did not finish");

    assert_eq!(orchestrator.state().total_executed, 1);
    let reports = files_with_extension(&paths.inbox_dir(), "md");
    assert_eq!(reports.len(), 1);
    let report = std::fs::read_to_string(paths.inbox_dir().join(&reports[0])).unwrap();
    assert!(report.contains("Task cancelled during shutdown"));
    assert_eq!(
        read_daemon_state(&paths).await.unwrap().status,
        DaemonStatus::Stopped
    );
}

#[tokio::test]
async fn notify_tasks_publish_start_and_end() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/night-shift"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    let fixture = Fixture::new(&format!(
        "\n[ntfy]\ntopic = \"night-shift\"\nbase_url = \"{}\"\n",
        server.uri()
    ));
    let mut orchestrator = fixture.orchestrator();
    orchestrator.start().await.unwrap();

    let mut loud = Task::one_off("loud task", &fixture.config.load(), chrono::Utc::now());
    loud.notify = true;
    fixture.queue.enqueue(&loud).await.unwrap();
    let quiet = Task::one_off("quiet task", &fixture.config.load(), chrono::Utc::now());
    fixture.queue.enqueue(&quiet).await.unwrap();

    orchestrator.tick().await;
    wait_idle(&orchestrator).await;
    orchestrator.tick().await;
    orchestrator.stop().await;

    let mut titles = Vec::new();
    for _ in 0..100 {
        let requests = server.received_requests().await.unwrap();
        if requests.len() >= 2 {
            titles = requests
                .iter()
                .map(|r| {
                    let body: serde_json::Value = serde_json::from_slice(&r.body).unwrap();
                    body["title"].as_str().unwrap().to_string()
                })
                .collect();
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    titles.sort();
    assert_eq!(
        titles,
        vec![
            "Night-shift done: loud task".to_string(),
            "Night-shift started: loud task".to_string(),
        ]
    );
}
