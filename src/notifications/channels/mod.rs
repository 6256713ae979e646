//! Delivery channels for notifications
//!
//! A channel takes a [`Notification`] and reports whether it reached the
//! user. Channels never decide *whether* to notify; that is the job of the
//! dedup gates in the parent module.

pub mod email;
pub mod log;
pub mod webhook;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::notifications::Notification;

/// Result type for channel operations
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Errors that can occur during channel operations
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Invalid channel configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The endpoint answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The attachment could not be read
    #[error("Failed to read attachment {path}: {source}")]
    Attachment {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Message building or SMTP transport setup failed
    #[error("Email error: {0}")]
    Email(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl ChannelError {
    /// Server errors and transport failures may succeed on a later attempt
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::HttpError(_) => true,
            Self::Rejected { status, .. } => *status >= 500 || *status == 429,
            Self::InvalidConfig(_)
            | Self::Attachment { .. }
            | Self::Email(_)
            | Self::SerializationError(_) => false,
        }
    }
}

/// Response from sending a notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryStatus {
    /// Whether the notification was successfully delivered
    pub success: bool,
    /// Channel that delivered (or failed to deliver) the notification
    pub channel: String,
    /// Optional message about the delivery
    pub message: Option<String>,
    /// Timestamp of delivery attempt
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl DeliveryStatus {
    pub fn success(channel: impl Into<String>) -> Self {
        Self {
            success: true,
            channel: channel.into(),
            message: None,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn success_with_message(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: true,
            channel: channel.into(),
            message: Some(message.into()),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn failure(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            channel: channel.into(),
            message: Some(message.into()),
            timestamp: chrono::Utc::now(),
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.success { "SUCCESS" } else { "FAILED" };
        write!(f, "[{status}] {}", self.channel)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

/// Trait for notification channels
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver `notification`; transport failures come back as a failed status
    async fn send(&self, notification: &Notification) -> ChannelResult<DeliveryStatus>;

    /// Channel configuration as JSON, secrets omitted
    fn config(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_status_display() {
        let success = DeliveryStatus::success_with_message("webhook", "Delivered");
        assert!(success.to_string().contains("SUCCESS"));
        assert!(success.to_string().contains("webhook"));

        let failure = DeliveryStatus::failure("webhook", "HTTP 500");
        assert!(!failure.success);
        assert!(failure.to_string().contains("FAILED"));
        assert!(failure.to_string().contains("HTTP 500"));
    }

    #[test]
    fn test_channel_error_recoverability() {
        let server = ChannelError::Rejected {
            status: 503,
            body: "down".into(),
        };
        assert!(server.is_recoverable());

        let throttled = ChannelError::Rejected {
            status: 429,
            body: String::new(),
        };
        assert!(throttled.is_recoverable());

        let client = ChannelError::Rejected {
            status: 404,
            body: "no hook".into(),
        };
        assert!(!client.is_recoverable());
        assert!(!ChannelError::InvalidConfig("empty url".into()).is_recoverable());
    }
}
