//! Channel fan-out and the dedup gates in front of it

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::channels::email::{EmailChannel, EmailConfig};
use super::channels::log::LogChannel;
use super::channels::webhook::{WebhookChannel, WebhookConfig};
use super::channels::{Channel, ChannelResult};
use super::Notification;
use crate::metrics;

/// Identical error signatures inside this window are sent once
pub const ERROR_DEDUP_WINDOW: Duration = Duration::from_secs(30 * 60);

/// Sends a notification to every registered channel
#[derive(Default)]
pub struct Notifier {
    channels: Vec<Box<dyn Channel>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_channel(&mut self, channel: Box<dyn Channel>) {
        self.channels.push(channel);
    }

    pub fn add_webhook_channel(&mut self, config: WebhookConfig) -> ChannelResult<()> {
        let channel = WebhookChannel::new(config)?;
        self.add_channel(Box::new(channel));
        Ok(())
    }

    pub fn add_email_channel(&mut self, config: EmailConfig) -> ChannelResult<()> {
        let channel = EmailChannel::new(config)?;
        self.add_channel(Box::new(channel));
        Ok(())
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    /// True when at least one channel delivered
    ///
    /// With no channels registered the notification goes to the log.
    pub async fn send(&self, notification: &Notification) -> bool {
        let delivered = self.deliver(notification).await;
        metrics::record_notification(notification.kind.as_str(), delivered);
        delivered
    }

    async fn deliver(&self, notification: &Notification) -> bool {
        if self.channels.is_empty() {
            return matches!(LogChannel.send(notification).await, Ok(status) if status.success);
        }

        let mut delivered = false;
        for channel in &self.channels {
            match channel.send(notification).await {
                Ok(status) if status.success => {
                    debug!(channel = channel.name(), "Notification delivered");
                    delivered = true;
                }
                Ok(status) => {
                    warn!(channel = channel.name(), status = %status, "Notification not delivered");
                }
                Err(e) => {
                    error!(channel = channel.name(), error = %e, "Failed to send notification");
                }
            }
        }
        delivered
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Send,
    Suppress(String),
}

impl GateDecision {
    pub fn is_send(&self) -> bool {
        matches!(self, Self::Send)
    }
}

/// Suppresses repeats of the same error signature
///
/// Every signature keeps its own send time, so interleaved failures are each
/// deduplicated. A signature is only remembered once a notification was
/// actually delivered; a failed send is retried on the next occurrence.
#[derive(Debug, Clone)]
pub struct ErrorGate {
    window: chrono::Duration,
    sent: HashMap<String, DateTime<Utc>>,
}

impl Default for ErrorGate {
    fn default() -> Self {
        Self::new(ERROR_DEDUP_WINDOW)
    }
}

impl ErrorGate {
    pub fn new(window: Duration) -> Self {
        Self {
            window: chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX),
            sent: HashMap::new(),
        }
    }

    pub fn check(&self, signature: &str, now: DateTime<Utc>) -> GateDecision {
        match self.sent.get(signature) {
            Some(sent_at) if now - *sent_at < self.window => {
                let elapsed = now - *sent_at;
                GateDecision::Suppress(format!(
                    "last sent {:.1} minutes ago",
                    elapsed.num_seconds() as f64 / 60.0
                ))
            }
            _ => GateDecision::Send,
        }
    }

    /// Remember `signature` as sent at `now`, dropping entries past the window
    pub fn record_sent(&mut self, signature: &str, now: DateTime<Utc>) {
        let window = self.window;
        self.sent.retain(|_, sent_at| now - *sent_at < window);
        self.sent.insert(signature.to_string(), now);
    }

    /// Signatures still inside the window
    pub fn tracked(&self) -> usize {
        self.sent.len()
    }

    /// Check, send and record in one step; returns whether anything was delivered
    pub async fn notify(
        &mut self,
        notifier: &Notifier,
        signature: &str,
        notification: &Notification,
        now: DateTime<Utc>,
    ) -> bool {
        if let GateDecision::Suppress(reason) = self.check(signature, now) {
            info!(reason = %reason, "Skipping duplicate error notification");
            return false;
        }
        let delivered = notifier.send(notification).await;
        if delivered {
            self.record_sent(signature, now);
        }
        delivered
    }
}

/// Suppresses re-sending the same list of earlier dates
///
/// Cleared when a probe finds no earlier dates, so dates that disappear and
/// come back are announced again.
#[derive(Debug, Clone, Default)]
pub struct AvailabilityGate {
    last: Option<Vec<NaiveDate>>,
}

impl AvailabilityGate {
    pub fn check(&self, earlier: &[NaiveDate]) -> GateDecision {
        match &self.last {
            Some(last) if last.as_slice() == earlier => {
                GateDecision::Suppress("earlier dates unchanged since last notification".into())
            }
            _ => GateDecision::Send,
        }
    }

    pub fn record_sent(&mut self, earlier: &[NaiveDate]) {
        self.last = Some(earlier.to_vec());
    }

    pub fn clear(&mut self) {
        self.last = None;
    }

    pub async fn notify(
        &mut self,
        notifier: &Notifier,
        earlier: &[NaiveDate],
        notification: &Notification,
    ) -> bool {
        if let GateDecision::Suppress(reason) = self.check(earlier) {
            info!(reason = %reason, "Skipping availability notification");
            return false;
        }
        let delivered = notifier.send(notification).await;
        if delivered {
            self.record_sent(earlier);
        }
        delivered
    }
}
