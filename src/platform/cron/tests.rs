use super::*;
use crate::config::RecurringTaskConfig;
use crate::error::QueueError;
use crate::queue::{QueueFuture, TaskQueue};
use crate::task::{Task, TaskOrigin};
use chrono::{DateTime, Local, TimeDelta, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

#[derive(Default)]
struct RecordingQueue {
    enqueued: Mutex<Vec<Task>>,
    fail: AtomicBool,
}

impl TaskQueue for RecordingQueue {
    fn name(&self) -> &str {
        "recording"
    }

    fn enqueue<'a>(&'a self, task: &'a Task) -> QueueFuture<'a, String> {
        Box::pin(async move {
            if self.fail.load(Ordering::SeqCst) {
                return Err(QueueError::Malformed("disk full".into()));
            }
            self.enqueued.lock().unwrap().push(task.clone());
            Ok(format!("q-{}", task.name))
        })
    }

    fn list_ready(&self) -> QueueFuture<'_, Vec<Task>> {
        Box::pin(async { Ok(Vec::new()) })
    }

    fn claim<'a>(&'a self, _task: &'a Task) -> QueueFuture<'a, bool> {
        Box::pin(async { Ok(true) })
    }

    fn complete<'a>(&'a self, _task: &'a Task, _failed: bool) -> QueueFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }
}

fn job(name: &str, schedule: &str) -> RecurringTaskConfig {
    RecurringTaskConfig {
        name: name.into(),
        schedule: schedule.into(),
        prompt: format!("run {name}"),
        ..RecurringTaskConfig::default()
    }
}

fn utc(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 9, h, m, 0).unwrap()
}

fn local(h: u32, m: u32) -> DateTime<Local> {
    Local.with_ymd_and_hms(2026, 3, 9, h, m, 0).unwrap()
}

fn scheduler(tmp: &TempDir, queue: Arc<RecordingQueue>, jobs: Vec<RecurringTaskConfig>) -> Scheduler {
    Scheduler::new(queue, tmp.path().join("scheduler.json"), jobs, "30m")
}

#[test]
fn never_fired_job_is_due_within_lookback() {
    let schedule = parse_schedule("*/5 * * * *").unwrap();
    assert!(is_due(&schedule, None, &utc(10, 2)));
}

#[test]
fn never_fired_job_outside_lookback_is_skipped() {
    let schedule = parse_schedule("0 9 * * *").unwrap();
    assert!(!is_due(&schedule, None, &utc(10, 0)));
    assert!(is_due(&schedule, None, &utc(9, 4)));
    assert!(!is_due(&schedule, None, &(utc(9, 5) + TimeDelta::seconds(1))));
}

#[test]
fn fired_job_waits_for_next_trigger() {
    let schedule = parse_schedule("0 * * * *").unwrap();
    let last = utc(9, 0);
    assert!(!is_due(&schedule, Some(last), &utc(9, 59)));
    assert!(is_due(&schedule, Some(last), &utc(10, 0)));
    assert!(is_due(&schedule, Some(last), &utc(13, 30)));
    assert!(!is_due(&schedule, Some(utc(10, 0)), &utc(10, 0)));
}

#[test]
fn next_fire_is_strictly_after_now() {
    let schedule = parse_schedule("0 * * * *").unwrap();
    assert_eq!(next_fire(&schedule, &utc(9, 30)), Some(utc(10, 0)));
    assert_eq!(next_fire(&schedule, &utc(10, 0)), Some(utc(11, 0)));
}

#[tokio::test]
async fn due_job_is_queued_once_and_persisted() {
    let tmp = TempDir::new().unwrap();
    let queue = Arc::new(RecordingQueue::default());
    let mut sched = scheduler(&tmp, Arc::clone(&queue), vec![job("digest", "*/5 * * * *")]);

    let first = sched.evaluate_schedules(local(10, 2)).await;
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].id, "q-digest");
    assert_eq!(first[0].origin, TaskOrigin::Recurring);
    assert_eq!(first[0].timeout, "30m");
    assert_eq!(first[0].recurring_name.as_deref(), Some("digest"));

    let second = sched.evaluate_schedules(local(10, 2)).await;
    assert!(second.is_empty());
    assert_eq!(queue.enqueued.lock().unwrap().len(), 1);

    let persisted = SchedulerState::load(&tmp.path().join("scheduler.json")).await;
    assert_eq!(
        persisted.last_run("digest"),
        Some(local(10, 2).with_timezone(&Utc))
    );
}

#[tokio::test]
async fn nothing_due_writes_no_state() {
    let tmp = TempDir::new().unwrap();
    let queue = Arc::new(RecordingQueue::default());
    let mut sched = scheduler(&tmp, queue, vec![job("nightly", "0 3 * * *")]);

    assert!(sched.evaluate_schedules(local(12, 0)).await.is_empty());
    assert!(!tmp.path().join("scheduler.json").exists());
}

#[tokio::test]
async fn failed_enqueue_is_retried_next_tick() {
    let tmp = TempDir::new().unwrap();
    let queue = Arc::new(RecordingQueue::default());
    queue.fail.store(true, Ordering::SeqCst);
    let mut sched = scheduler(&tmp, Arc::clone(&queue), vec![job("digest", "*/5 * * * *")]);

    assert!(sched.evaluate_schedules(local(10, 2)).await.is_empty());
    assert_eq!(sched.state().last_run("digest"), None);

    queue.fail.store(false, Ordering::SeqCst);
    assert_eq!(sched.evaluate_schedules(local(10, 3)).await.len(), 1);
}

#[tokio::test]
async fn restored_state_prevents_refire_after_restart() {
    let tmp = TempDir::new().unwrap();
    let queue = Arc::new(RecordingQueue::default());
    let jobs = vec![job("digest", "*/5 * * * *")];

    let mut first = scheduler(&tmp, Arc::clone(&queue), jobs.clone());
    assert_eq!(first.evaluate_schedules(local(10, 2)).await.len(), 1);

    let mut restarted = scheduler(&tmp, Arc::clone(&queue), jobs);
    restarted.load_state().await;
    assert!(restarted.evaluate_schedules(local(10, 4)).await.is_empty());
    assert_eq!(restarted.evaluate_schedules(local(10, 5)).await.len(), 1);
}

#[tokio::test]
async fn update_config_swaps_jobs_and_keeps_history() {
    let tmp = TempDir::new().unwrap();
    let queue = Arc::new(RecordingQueue::default());
    let mut sched = scheduler(&tmp, queue, vec![job("digest", "*/5 * * * *")]);
    sched.evaluate_schedules(local(10, 2)).await;

    let mut review = job("review", "*/5 * * * *");
    review.timeout = Some("2h".into());
    sched.update_config(vec![job("digest", "*/5 * * * *"), review], "45m");

    let queued = sched.evaluate_schedules(local(10, 3)).await;
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].name, "review");
    assert_eq!(queued[0].timeout, "2h");
    assert!(sched.state().last_run("digest").is_some());
    assert_eq!(sched.recurring().len(), 2);
}

#[tokio::test]
async fn invalid_schedule_is_skipped() {
    let tmp = TempDir::new().unwrap();
    let queue = Arc::new(RecordingQueue::default());
    let mut sched = scheduler(
        &tmp,
        queue,
        vec![job("broken", "every day"), job("digest", "*/5 * * * *")],
    );

    let queued = sched.evaluate_schedules(local(10, 2)).await;
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].name, "digest");
}
