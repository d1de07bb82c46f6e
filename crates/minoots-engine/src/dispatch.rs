//! Webhook Dispatcher.
//!
//! Builds the outbound JSON payload, posts it through a [`WebhookClient`],
//! and classifies the response into success/failure. The HTTP transport is
//! a trait so tests can substitute a deterministic double instead of a real
//! `reqwest::Client` — every IO concern here takes its dependencies
//! injected rather than reaching for a global client.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::timer::Timer;

/// Default webhook POST timeout.
pub const DEFAULT_WEBHOOK_TIMEOUT_MS: u64 = 10_000;

/// Outcome of a single webhook delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// No webhook was configured; treated as success.
    NotConfigured,
    /// 2xx response.
    Success,
    /// Transport-level failure (connect/timeout/DNS).
    TransportFailure(String),
    /// Non-2xx HTTP response.
    HttpFailure(u16),
}

impl WebhookOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, WebhookOutcome::Success | WebhookOutcome::NotConfigured)
    }

    /// The `failureReason` string to persist on the timer.
    pub fn failure_reason(&self) -> Option<String> {
        match self {
            WebhookOutcome::TransportFailure(msg) => Some(msg.clone()),
            WebhookOutcome::HttpFailure(status) => Some(format!("Webhook HTTP {status}")),
            _ => None,
        }
    }
}

/// The result of one dispatch attempt, including the measured latency used
/// for the team metric's `webhookLatencyMs`.
#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub outcome: WebhookOutcome,
    pub latency_ms: Option<i64>,
}

/// Minimal HTTP transport seam for webhook delivery.
#[async_trait]
pub trait WebhookClient: Send + Sync {
    /// POSTs `body` as JSON to `url`, returning the HTTP status code or a
    /// transport-level error string (connect/timeout/DNS).
    async fn post_json(&self, url: &str, body: &Value, timeout_ms: u64) -> Result<u16, String>;
}

/// Production transport backed by `reqwest`.
pub struct ReqwestWebhookClient {
    client: reqwest::Client,
}

impl ReqwestWebhookClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for ReqwestWebhookClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebhookClient for ReqwestWebhookClient {
    async fn post_json(&self, url: &str, body: &Value, timeout_ms: u64) -> Result<u16, String> {
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .timeout(Duration::from_millis(timeout_ms))
            .json(body)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        Ok(response.status().as_u16())
    }
}

/// Builds the outbound payload.
pub fn build_payload(timer: &Timer) -> Value {
    let message = timer
        .events
        .on_expire
        .as_ref()
        .and_then(|e| e.message.clone());
    let data = timer.events.on_expire.as_ref().and_then(|e| e.data.clone());

    json!({
        "event": "timer_expired",
        "timer": timer,
        "message": message,
        "data": data,
    })
}

/// Dispatches the webhook for `timer`, if one is configured, and
/// classifies the outcome.
pub async fn dispatch(
    client: &dyn WebhookClient,
    clock_now_ms: impl Fn() -> i64,
    timer: &Timer,
    timeout_ms: u64,
) -> DispatchResult {
    let Some(webhook_url) = timer
        .events
        .on_expire
        .as_ref()
        .and_then(|e| e.webhook_url.as_deref())
    else {
        return DispatchResult {
            outcome: WebhookOutcome::NotConfigured,
            latency_ms: None,
        };
    };

    let payload = build_payload(timer);
    let started_ms = clock_now_ms();
    let result = client.post_json(webhook_url, &payload, timeout_ms).await;
    let latency_ms = Some((clock_now_ms() - started_ms).max(0));

    let outcome = match result {
        Ok(status) if (200..300).contains(&status) => WebhookOutcome::Success,
        Ok(status) => WebhookOutcome::HttpFailure(status),
        Err(message) => WebhookOutcome::TransportFailure(message),
    };

    DispatchResult { outcome, latency_ms }
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Deterministic webhook double: returns queued responses in order,
    /// falling back to the last one once exhausted.
    pub struct ScriptedWebhookClient {
        responses: Mutex<VecDeque<Result<u16, String>>>,
        pub requests: Mutex<Vec<(String, Value)>>,
    }

    impl ScriptedWebhookClient {
        pub fn new(responses: Vec<Result<u16, String>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl WebhookClient for ScriptedWebhookClient {
        async fn post_json(&self, url: &str, body: &Value, _timeout_ms: u64) -> Result<u16, String> {
            self.requests
                .lock()
                .unwrap()
                .push((url.to_string(), body.clone()));
            let mut responses = self.responses.lock().unwrap();
            if responses.len() > 1 {
                responses.pop_front().unwrap()
            } else {
                responses.front().cloned().unwrap_or(Ok(200))
            }
        }
    }
}
