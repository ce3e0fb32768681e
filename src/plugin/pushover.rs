//! Pushover delivery transport.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::plugin::notifier::{DEFAULT_ENQUEUE_TIMEOUT, DEFAULT_QUEUE_CAPACITY, Message, Transport};
use crate::plugin::NotifyError;
use crate::record::truncate_chars;

/// Pushover message API endpoint.
pub const DEFAULT_API_URL: &str = "https://api.pushover.net/1/messages.json";

/// Pushover's message length limit.
pub const MESSAGE_MAX_LEN: usize = 1024;

/// Pushover's title length limit.
pub const TITLE_MAX_LEN: usize = 250;

/// Default HTTP request timeout.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_enqueue_timeout() -> Duration {
    DEFAULT_ENQUEUE_TIMEOUT
}

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

/// Pushover notifier configuration.
///
/// The notifier is enabled only when both `user` and `token` are set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushoverConfig {
    /// Recipient user key. Supports `${VAR}` expansion.
    #[serde(default)]
    pub user: String,
    /// Application API token. Supports `${VAR}` expansion.
    #[serde(default)]
    pub token: String,
    /// API endpoint (default: Pushover messages API).
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Notifier queue capacity (default: 50).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Bounded wait when the queue is full (default: 1s).
    #[serde(default = "default_enqueue_timeout", with = "humantime_serde")]
    pub enqueue_timeout: Duration,
    /// HTTP request timeout (default: 10s).
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for PushoverConfig {
    fn default() -> Self {
        Self::new("", "")
    }
}

impl PushoverConfig {
    /// Create a configuration with default endpoint and queue settings.
    pub fn new(user: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            token: token.into(),
            api_url: default_api_url(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            enqueue_timeout: DEFAULT_ENQUEUE_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Set the API endpoint.
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    /// Whether credentials are present.
    pub fn is_enabled(&self) -> bool {
        !self.user.is_empty() && !self.token.is_empty()
    }
}

/// Sends notifications through the Pushover HTTP API.
pub struct PushoverTransport {
    client: Client,
    api_url: String,
    user: String,
    token: String,
}

impl std::fmt::Debug for PushoverTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushoverTransport")
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

impl PushoverTransport {
    /// Build a transport from configuration.
    ///
    /// # Errors
    /// Returns `NotifyError::Config` if credentials are missing or the HTTP
    /// client cannot be built.
    pub fn new(config: &PushoverConfig) -> Result<Self, NotifyError> {
        if !config.is_enabled() {
            return Err(NotifyError::Config(
                "pushover user and token are required".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| NotifyError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            user: config.user.clone(),
            token: config.token.clone(),
        })
    }
}

#[async_trait]
impl Transport for PushoverTransport {
    fn name(&self) -> &str {
        "pushover"
    }

    fn max_message_len(&self) -> usize {
        MESSAGE_MAX_LEN
    }

    async fn send(&self, message: &Message) -> Result<(), NotifyError> {
        let timestamp = message.timestamp.to_string();
        let form = [
            ("token", self.token.as_str()),
            ("user", self.user.as_str()),
            ("title", truncate_chars(&message.title, TITLE_MAX_LEN)),
            ("message", message.body.as_str()),
            ("timestamp", timestamp.as_str()),
        ];

        let response = self.client.post(&self.api_url).form(&form).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(NotifyError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use axum::{Form, Router, http::StatusCode, routing::post};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    type Captured = Arc<Mutex<Vec<HashMap<String, String>>>>;

    async fn start_mock(status: StatusCode) -> (String, Captured) {
        let captured: Captured = Arc::default();
        let sink = Arc::clone(&captured);
        let app = Router::new().route(
            "/1/messages.json",
            post(move |Form(form): Form<HashMap<String, String>>| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().unwrap().push(form);
                    (status, r#"{"status":1}"#)
                }
            }),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}/1/messages.json", addr), captured)
    }

    #[test]
    fn test_config_enabled() {
        assert!(PushoverConfig::new("u", "t").is_enabled());
        assert!(!PushoverConfig::new("", "t").is_enabled());
        assert!(!PushoverConfig::default().is_enabled());
        assert!(PushoverTransport::new(&PushoverConfig::default()).is_err());
    }

    #[test]
    fn test_config_defaults_from_yaml() {
        let config: PushoverConfig = serde_yaml::from_str("user: u\ntoken: t\n").unwrap();
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.enqueue_timeout, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_send_posts_form() {
        let (url, captured) = start_mock(StatusCode::OK).await;
        let transport =
            PushoverTransport::new(&PushoverConfig::new("user-key", "app-token").with_api_url(url))
                .unwrap();

        let record = Record::new("hello").with_sender("a@b.com");
        let message = Message::from_record(&record, transport.max_message_len());
        transport.send(&message).await.unwrap();

        let forms = captured.lock().unwrap().clone();
        assert_eq!(forms.len(), 1);
        assert_eq!(forms[0]["token"], "app-token");
        assert_eq!(forms[0]["user"], "user-key");
        assert_eq!(forms[0]["title"], record.id().to_string());
        assert_eq!(forms[0]["message"], "From: a@b.com\n\nhello\n");
        assert_eq!(forms[0]["timestamp"], record.created_at().timestamp().to_string());
    }

    #[tokio::test]
    async fn test_send_reports_rejection() {
        let (url, _captured) = start_mock(StatusCode::BAD_REQUEST).await;
        let transport =
            PushoverTransport::new(&PushoverConfig::new("u", "t").with_api_url(url)).unwrap();

        let message = Message::from_record(&Record::new("x"), MESSAGE_MAX_LEN);
        match transport.send(&message).await {
            Err(NotifyError::Rejected { status, .. }) => assert_eq!(status, 400),
            other => panic!("expected rejection, got {other:?}"),
        }
    }
}
