use super::*;
use crate::config::Config;
use chrono::Utc;
use serde_json::json;
use std::net::TcpListener;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn ntfy(base_url: &str, token: Option<&str>) -> NtfyConfig {
    NtfyConfig {
        topic: "night-shift".into(),
        token: token.map(String::from),
        base_url: base_url.into(),
    }
}

fn result(is_error: bool, text: &str) -> AgentExecutionResult {
    AgentExecutionResult {
        session_id: "s-1".into(),
        duration_ms: 1000,
        total_cost_usd: 1.234,
        result: text.into(),
        is_error,
        num_turns: 2,
    }
}

#[tokio::test]
async fn send_posts_json_to_topic_with_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/night-shift"))
        .and(header("authorization", "Bearer tk_abc"))
        .and(body_json(json!({
            "title": "Night-shift done: digest",
            "message": "all good",
            "priority": 3,
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = NtfyClient::new(&ntfy(&format!("{}/", server.uri()), Some("tk_abc")));
    assert_eq!(client.url(), format!("{}/night-shift", server.uri()));

    let sent = client
        .send(&NtfyMessage::new("Night-shift done: digest", "all good"))
        .await;
    assert!(sent);
}

#[tokio::test]
async fn rejected_notification_is_reported_not_raised() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    let client = NtfyClient::new(&ntfy(&server.uri(), None));
    assert!(!client.send(&NtfyMessage::new("t", "m")).await);

    let requests = server.received_requests().await.unwrap();
    assert!(requests[0].headers.get("authorization").is_none());
}

#[tokio::test]
async fn unreachable_server_is_reported_not_raised() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = NtfyClient::new(&ntfy(&format!("http://{addr}"), None));
    assert!(!client.send(&NtfyMessage::new("t", "m")).await);
}

#[test]
fn start_message_names_category_when_present() {
    let mut task = Task::one_off("tidy up", &Config::default(), Utc::now());
    assert_eq!(task_started(&task).message, "Running…");
    assert_eq!(task_started(&task).title, "Night-shift started: tidy up");

    task.category = Some("tests".into());
    assert_eq!(task_started(&task).message, "Category: tests");
}

#[test]
fn finished_message_reflects_outcome() {
    let task = Task::one_off("digest", &Config::default(), Utc::now());

    let done = task_finished(&task, &result(false, "wrote the digest"));
    assert_eq!(done.title, "Night-shift done: digest");
    assert_eq!(done.message, "Cost: $1.23 · wrote the digest");
    assert_eq!(done.priority, PRIORITY_DEFAULT);

    let long = "x".repeat(500);
    let failed = task_finished(&task, &result(true, &long));
    assert_eq!(failed.title, "Night-shift FAILED: digest");
    assert_eq!(failed.message, format!("Error: {}", "x".repeat(200)));
    assert_eq!(failed.priority, PRIORITY_HIGH);
    assert_eq!(failed.tags, vec!["warning".to_string()]);
}
