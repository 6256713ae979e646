//! Webhook notification channel
//!
//! Posts each notification as JSON. An attachment is inlined as base64 so a
//! single request carries the whole message.

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::{Channel, ChannelError, ChannelResult, DeliveryStatus};
use crate::notifications::Notification;

/// Webhook channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Webhook URL endpoint
    pub url: String,
    /// Optional authentication token (sent as Bearer token)
    pub auth_token: Option<String>,
    /// Custom headers to include in requests
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Maximum retry attempts on failure
    #[serde(default = "default_retries")]
    pub max_retries: u32,
    /// Base delay between retries in milliseconds, doubled per attempt
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_timeout() -> u64 {
    10
}

fn default_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth_token: None,
            headers: HashMap::new(),
            timeout_secs: default_timeout(),
            max_retries: default_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("Webhook URL cannot be empty".to_string());
        }
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err("Webhook URL must start with http:// or https://".to_string());
        }
        if self.timeout_secs == 0 {
            return Err("Timeout must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Webhook notification channel
///
/// # Payload Format
///
/// ```json
/// {
///   "id": "6f1c…",
///   "kind": "availability",
///   "subject": "Earlier appointment available: 2026-11-20",
///   "body": "Earliest date: 2026-11-20\n…",
///   "created_at": "2026-10-19T08:15:00Z",
///   "attachment": { "filename": "…_consulate_busy.png", "content_base64": "iVBOR…" }
/// }
/// ```
pub struct WebhookChannel {
    config: WebhookConfig,
    client: Client,
}

impl WebhookChannel {
    pub fn new(config: WebhookConfig) -> ChannelResult<Self> {
        config.validate().map_err(ChannelError::InvalidConfig)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    pub fn from_url(url: impl Into<String>) -> ChannelResult<Self> {
        Self::new(WebhookConfig::new(url))
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    async fn build_payload(&self, notification: &Notification) -> ChannelResult<serde_json::Value> {
        let attachment = match &notification.attachment {
            Some(path) => {
                let bytes = tokio::fs::read(path)
                    .await
                    .map_err(|source| ChannelError::Attachment {
                        path: path.display().to_string(),
                        source,
                    })?;
                let filename = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                Some(serde_json::json!({
                    "filename": filename,
                    "content_base64": base64::engine::general_purpose::STANDARD.encode(bytes),
                }))
            }
            None => None,
        };

        Ok(serde_json::json!({
            "id": notification.id,
            "kind": notification.kind.as_str(),
            "subject": notification.subject,
            "body": notification.body,
            "created_at": notification.created_at.to_rfc3339(),
            "attachment": attachment,
        }))
    }

    /// Send the request with retry logic
    async fn send_with_retry(&self, payload: &serde_json::Value) -> ChannelResult<()> {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(
                    self.config
                        .retry_delay_ms
                        .saturating_mul(2_u64.saturating_pow(attempt - 1)),
                );
                tokio::time::sleep(delay).await;
                tracing::debug!(
                    "Retrying webhook request (attempt {}/{})",
                    attempt + 1,
                    self.config.max_retries + 1
                );
            }

            let mut request = self.client.post(&self.config.url);
            if let Some(token) = &self.config.auth_token {
                request = request.bearer_auth(token);
            }
            for (key, value) in &self.config.headers {
                request = request.header(key, value);
            }

            match request.json(payload).send().await {
                Ok(response) if response.status().is_success() => {
                    tracing::info!(
                        "Webhook delivered successfully to {} (status: {})",
                        self.config.url,
                        response.status()
                    );
                    return Ok(());
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unable to read response body".to_string());
                    let error = ChannelError::Rejected { status, body };
                    let retry = error.is_recoverable();
                    last_error = Some(error);
                    if !retry {
                        break;
                    }
                }
                Err(e) => last_error = Some(ChannelError::HttpError(e)),
            }
        }

        Err(last_error.unwrap_or_else(|| ChannelError::InvalidConfig("no attempts made".into())))
    }
}

#[async_trait]
impl Channel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, notification: &Notification) -> ChannelResult<DeliveryStatus> {
        let payload = self.build_payload(notification).await?;

        match self.send_with_retry(&payload).await {
            Ok(()) => Ok(DeliveryStatus::success_with_message(
                "webhook",
                format!("Delivered to {}", self.config.url),
            )),
            Err(e) => {
                tracing::error!("Failed to deliver webhook to {}: {}", self.config.url, e);
                Ok(DeliveryStatus::failure("webhook", e.to_string()))
            }
        }
    }

    fn config(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name(),
            "url": self.config.url,
            "timeout_secs": self.config.timeout_secs,
            "max_retries": self.config.max_retries,
            "has_auth": self.config.auth_token.is_some(),
            "custom_headers": self.config.headers.keys().collect::<Vec<_>>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::NotificationKind;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn quick(url: String) -> WebhookConfig {
        WebhookConfig::new(url)
            .with_max_retries(2)
            .with_retry_delay(Duration::from_millis(5))
    }

    #[test]
    fn test_webhook_config_validation() {
        assert!(WebhookConfig::new("https://example.com/webhook").validate().is_ok());
        assert!(WebhookConfig::new("").validate().is_err());
        assert!(WebhookConfig::new("example.com/webhook").validate().is_err());
        assert!(WebhookConfig::new("https://example.com")
            .with_timeout(0)
            .validate()
            .is_err());
        assert!(WebhookChannel::from_url("not-a-url").is_err());
    }

    #[tokio::test]
    async fn test_payload_carries_subject_body_and_attachment() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("20261019-081500_consulate_busy.png");
        std::fs::write(&file, b"png").unwrap();

        let channel = WebhookChannel::from_url("https://example.com/hook").unwrap();
        let notification = Notification::new(NotificationKind::Availability, "Subject", "Body")
            .with_attachment(&file);
        let payload = channel.build_payload(&notification).await.unwrap();

        assert_eq!(payload["kind"], "availability");
        assert_eq!(payload["subject"], "Subject");
        assert_eq!(payload["body"], "Body");
        assert_eq!(payload["attachment"]["filename"], "20261019-081500_consulate_busy.png");
        assert_eq!(payload["attachment"]["content_base64"], "cG5n");
    }

    #[tokio::test]
    async fn test_missing_attachment_is_an_error() {
        let channel = WebhookChannel::from_url("https://example.com/hook").unwrap();
        let notification = Notification::new(NotificationKind::Error, "s", "b")
            .with_attachment("/definitely/not/here.png");
        assert!(matches!(
            channel.send(&notification).await,
            Err(ChannelError::Attachment { .. })
        ));
    }

    #[tokio::test]
    async fn test_delivers_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("authorization", "Bearer s3cret"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let channel =
            WebhookChannel::new(quick(format!("{}/hook", server.uri())).with_auth_token("s3cret"))
                .unwrap();
        let status = channel
            .send(&Notification::new(NotificationKind::Error, "s", "b"))
            .await
            .unwrap();
        assert!(status.success, "{status}");
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let channel = WebhookChannel::new(quick(server.uri())).unwrap();
        let status = channel
            .send(&Notification::new(NotificationKind::Error, "s", "b"))
            .await
            .unwrap();
        assert!(status.success);
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string("unknown hook"))
            .mount(&server)
            .await;

        let channel = WebhookChannel::new(quick(server.uri())).unwrap();
        let status = channel
            .send(&Notification::new(NotificationKind::Error, "s", "b"))
            .await
            .unwrap();
        assert!(!status.success);
        assert!(status.to_string().contains("unknown hook"));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }
}
