//! User notifications
//!
//! ```text
//! ┌──────────────────────────────┐   ┌──────────────────────────────┐
//! │ AvailabilityGate             │   │ ErrorGate                    │
//! │  skip unchanged date lists   │   │  skip same signature < 30 m  │
//! └──────────────┬───────────────┘   └──────────────┬───────────────┘
//!                └────────────────┬─────────────────┘
//!                                 ▼
//!                      ┌─────────────────────┐
//!                      │      Notifier       │  success = any channel delivered
//!                      └──────────┬──────────┘
//!                      ┌──────────┼──────────┐
//!                      ▼          ▼          ▼
//!                ┌─────────┐ ┌─────────┐ ┌─────────┐
//!                │ Webhook │ │  Email  │ │   Log   │
//!                └─────────┘ └─────────┘ └─────────┘
//! ```
//!
//! Delivery failures are logged and reported as `false`, never raised.

pub mod channels;
mod manager;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub use channels::email::{EmailChannel, EmailConfig, SmtpSecurity};
pub use channels::log::LogChannel;
pub use channels::webhook::{WebhookChannel, WebhookConfig};
pub use channels::{Channel, ChannelError, ChannelResult, DeliveryStatus};
pub use manager::{AvailabilityGate, ErrorGate, GateDecision, Notifier, ERROR_DEDUP_WINDOW};

/// What a notification is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    /// Earlier appointment dates were found
    Availability,
    /// A check cycle failed
    Error,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Availability => "availability",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message for the user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub kind: NotificationKind,
    pub subject: String,
    /// Plain-text body
    pub body: String,
    pub attachment: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(kind: NotificationKind, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            subject: subject.into(),
            body: body.into(),
            attachment: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_attachment(mut self, path: impl AsRef<Path>) -> Self {
        self.attachment = Some(path.as_ref().to_path_buf());
        self
    }

    /// Earlier dates were found; `earlier` must be sorted ascending
    pub fn availability(
        earlier: &[NaiveDate],
        current_appointment: NaiveDate,
        location: &str,
    ) -> Option<Self> {
        let earliest = earlier.first()?;
        let listed = earlier
            .iter()
            .map(|d| format!("  - {}", d.format("%Y-%m-%d (%A)")))
            .collect::<Vec<_>>()
            .join("\n");
        let body = format!(
            "Earliest available date: {earliest}\n\
             Current appointment: {current_appointment}\n\
             Location: {location}\n\
             \n\
             All earlier dates inside the requested window:\n{listed}\n\
             \n\
             Log in to reschedule before the slot is taken."
        );
        Some(Self::new(
            NotificationKind::Availability,
            format!("Earlier appointment available: {earliest}"),
            body,
        ))
    }

    /// A cycle failed with `message`
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Error, "Appointment checker error", message)
    }
}
