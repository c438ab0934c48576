//! Redis Publisher
//!
//! Publishes alerts to a Redis pub/sub channel for live subscribers
//! (dashboards, websocket gateways). Delivery is at-most-once.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::debug;

use crate::alert::Alert;
use crate::notifier::{LiveNotifier, NotifyError};

/// Default Redis channel for publishing alerts
pub const DEFAULT_CHANNEL: &str = "compliance_alerts";

/// Redis publisher for alert messages
#[derive(Clone)]
pub struct AlertPublisher {
    connection: MultiplexedConnection,
    channel: String,
}

impl AlertPublisher {
    /// Create a new publisher with a Redis connection
    ///
    /// # Arguments
    /// * `connection` - An established Redis multiplexed connection
    /// * `channel` - The pub/sub channel name to publish to
    pub fn new(connection: MultiplexedConnection, channel: impl Into<String>) -> Self {
        Self {
            connection,
            channel: channel.into(),
        }
    }

    /// Create a new publisher with the default channel
    pub fn with_default_channel(connection: MultiplexedConnection) -> Self {
        Self::new(connection, DEFAULT_CHANNEL)
    }

    /// Publish an alert
    ///
    /// # Returns
    /// The number of subscribers that received the message
    pub async fn publish_alert(&self, alert: &Alert) -> Result<i64, NotifyError> {
        let json = alert.to_json()?;
        let mut connection = self.connection.clone();
        let subscribers: i64 = connection.publish(&self.channel, &json).await?;
        debug!("Published alert {} to {} subscriber(s)", alert.key(), subscribers);
        Ok(subscribers)
    }

    /// Get the channel name
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[async_trait]
impl LiveNotifier for AlertPublisher {
    async fn publish(&self, alert: &Alert) -> Result<(), NotifyError> {
        self.publish_alert(alert).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_channel_name() {
        assert_eq!(DEFAULT_CHANNEL, "compliance_alerts");
        assert!(!DEFAULT_CHANNEL.contains(' '));
    }
}
