//! ntfy push notifications.
//!
//! Delivery is best effort: failures are logged and never reach the caller.

use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use crate::config::NtfyConfig;
use crate::task::{AgentExecutionResult, Task};
use crate::util::text::truncate_chars;

const SEND_TIMEOUT: Duration = Duration::from_secs(5);
const BODY_PREVIEW_CHARS: usize = 200;

pub const PRIORITY_DEFAULT: u8 = 3;
pub const PRIORITY_HIGH: u8 = 4;

/// JSON body accepted by an ntfy topic endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NtfyMessage {
    pub title: String,
    pub message: String,
    pub priority: u8,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl NtfyMessage {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            priority: PRIORITY_DEFAULT,
            tags: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct NtfyClient {
    client: Client,
    url: String,
    token: Option<String>,
}

impl NtfyClient {
    pub fn new(config: &NtfyConfig) -> Self {
        let client = Client::builder()
            .timeout(SEND_TIMEOUT)
            .connect_timeout(SEND_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            url: config.topic_url(),
            token: config.token.clone(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Publish `message`. Returns whether the server accepted it.
    pub async fn send(&self, message: &NtfyMessage) -> bool {
        let mut request = self.client.post(&self.url).json(message);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        match request.send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(url = %self.url, "notification sent");
                true
            }
            Ok(response) => {
                tracing::warn!(url = %self.url, status = %response.status(), "notification rejected");
                false
            }
            Err(e) => {
                tracing::warn!(url = %self.url, error = %e, "notification failed");
                false
            }
        }
    }

    /// Fire-and-forget variant of [`NtfyClient::send`].
    pub fn spawn_send(&self, message: NtfyMessage) {
        let client = self.clone();
        tokio::spawn(async move {
            client.send(&message).await;
        });
    }
}

pub fn task_started(task: &Task) -> NtfyMessage {
    let body = match &task.category {
        Some(category) => format!("Category: {category}"),
        None => "Running…".to_string(),
    };
    NtfyMessage::new(format!("Night-shift started: {}", task.name), body)
}

pub fn task_finished(task: &Task, result: &AgentExecutionResult) -> NtfyMessage {
    let preview = truncate_chars(&result.result, BODY_PREVIEW_CHARS);
    if result.is_error {
        NtfyMessage::new(
            format!("Night-shift FAILED: {}", task.name),
            format!("Error: {preview}"),
        )
        .with_priority(PRIORITY_HIGH)
        .with_tag("warning")
    } else {
        NtfyMessage::new(
            format!("Night-shift done: {}", task.name),
            format!("Cost: ${:.2} · {preview}", result.total_cost_usd),
        )
    }
}

#[cfg(test)]
mod tests;
