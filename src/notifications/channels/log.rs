//! Channel that writes notifications to the log

use async_trait::async_trait;

use super::{Channel, ChannelResult, DeliveryStatus};
use crate::notifications::Notification;

/// Fallback channel used when no transport is configured
#[derive(Debug, Default, Clone)]
pub struct LogChannel;

#[async_trait]
impl Channel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, notification: &Notification) -> ChannelResult<DeliveryStatus> {
        tracing::info!(
            kind = %notification.kind,
            subject = %notification.subject,
            attachment = notification
                .attachment
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            "Notification: {}",
            notification.body
        );
        Ok(DeliveryStatus::success("log"))
    }
}
