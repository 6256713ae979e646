//! Email notification channel
//!
//! Sends each notification as a plain-text mail over SMTP. A screenshot
//! attachment travels as a MIME part next to the body.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{Channel, ChannelError, ChannelResult, DeliveryStatus};
use crate::notifications::Notification;
use crate::utils::mask;

/// How the SMTP connection is secured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmtpSecurity {
    /// Plain connection upgraded with STARTTLS (port 587)
    Starttls,
    /// TLS from the first byte (port 465)
    Tls,
    /// No encryption; local relays only
    None,
}

/// Email channel configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub host: String,
    pub port: u16,
    pub security: SmtpSecurity,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Sender, `Name <addr>` or a bare address
    pub from: String,
    pub to: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 587,
            security: SmtpSecurity::Starttls,
            username: None,
            password: None,
            from: String::new(),
            to: Vec::new(),
            timeout_secs: 30,
        }
    }
}

impl std::fmt::Debug for EmailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("security", &self.security)
            .field("username", &self.username)
            .field("password", &self.password.as_deref().map(mask))
            .field("from", &self.from)
            .field("to", &self.to)
            .finish()
    }
}

impl EmailConfig {
    pub fn new(host: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            from: from.into(),
            to: vec![to.into()],
            ..Default::default()
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_port(mut self, port: u16, security: SmtpSecurity) -> Self {
        self.port = port;
        self.security = security;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.host.trim().is_empty() {
            return Err("SMTP host is required".to_string());
        }
        if self.port == 0 {
            return Err("SMTP port must be greater than 0".to_string());
        }
        if self.timeout_secs == 0 {
            return Err("Timeout must be greater than 0".to_string());
        }
        parse_mailbox(&self.from).map_err(|e| format!("from: {e}"))?;
        if self.to.is_empty() {
            return Err("at least one recipient is required".to_string());
        }
        for to in &self.to {
            parse_mailbox(to).map_err(|e| format!("to: {e}"))?;
        }
        if self.username.is_some() != self.password.is_some() {
            return Err("username and password must be set together".to_string());
        }
        Ok(())
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, String> {
    address
        .trim()
        .parse::<Mailbox>()
        .map_err(|e| format!("invalid address {address:?}: {e}"))
}

/// SMTP notification channel
pub struct EmailChannel {
    config: EmailConfig,
    from: Mailbox,
    to: Vec<Mailbox>,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl EmailChannel {
    pub fn new(config: EmailConfig) -> ChannelResult<Self> {
        config.validate().map_err(ChannelError::InvalidConfig)?;
        let from = parse_mailbox(&config.from).map_err(ChannelError::InvalidConfig)?;
        let to = config
            .to
            .iter()
            .map(|to| parse_mailbox(to))
            .collect::<Result<Vec<_>, _>>()
            .map_err(ChannelError::InvalidConfig)?;

        let host = config.host.trim();
        let mut builder = match config.security {
            SmtpSecurity::Starttls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .map_err(|e| ChannelError::Email(e.to_string()))?,
            SmtpSecurity::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                .map_err(|e| ChannelError::Email(e.to_string()))?,
            SmtpSecurity::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host),
        };
        builder = builder
            .port(config.port)
            .timeout(Some(Duration::from_secs(config.timeout_secs)));
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            config,
            from,
            to,
        })
    }

    async fn build_message(&self, notification: &Notification) -> ChannelResult<Message> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(notification.subject.clone());
        for to in &self.to {
            builder = builder.to(to.clone());
        }
        let body = SinglePart::plain(notification.body.clone());

        let message = match &notification.attachment {
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
                    .unwrap_or_else(|| "attachment".to_string());
                let mime = if path.extension().is_some_and(|ext| ext == "png") {
                    "image/png"
                } else {
                    "application/octet-stream"
                };
                let content_type =
                    ContentType::parse(mime).map_err(|e| ChannelError::Email(e.to_string()))?;
                builder.multipart(
                    MultiPart::mixed()
                        .singlepart(body)
                        .singlepart(Attachment::new(filename).body(bytes, content_type)),
                )
            }
            None => builder.singlepart(body),
        };
        message.map_err(|e| ChannelError::Email(e.to_string()))
    }
}

#[async_trait]
impl Channel for EmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    async fn send(&self, notification: &Notification) -> ChannelResult<DeliveryStatus> {
        let message = self.build_message(notification).await?;

        match self.transport.send(message).await {
            Ok(response) => {
                tracing::info!(
                    host = %self.config.host,
                    recipients = self.to.len(),
                    code = %response.code(),
                    "Email notification sent"
                );
                Ok(DeliveryStatus::success_with_message(
                    "email",
                    format!("Sent to {} recipient(s)", self.to.len()),
                ))
            }
            Err(e) => {
                tracing::error!(host = %self.config.host, error = %e, "Failed to send email notification");
                Ok(DeliveryStatus::failure("email", e.to_string()))
            }
        }
    }

    fn config(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name(),
            "host": self.config.host,
            "port": self.config.port,
            "security": self.config.security,
            "to": self.config.to,
            "has_auth": self.config.username.is_some(),
        })
    }
}
