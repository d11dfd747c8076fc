use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::StreamExt;
use tracing::{debug, info};

use super::bus::{BusSubscription, InboundMessage, MessageBus};
use crate::config::BusConfig;
use crate::error::{IntercomError, Result};

/// NATS-backed message bus
pub struct NatsBus {
    client: async_nats::Client,
}

impl NatsBus {
    /// Connect to NATS server, identifying as `client_name`
    pub async fn connect(config: &BusConfig, client_name: &str) -> Result<Self> {
        info!("Connecting to NATS at {} as {}", config.url, client_name);

        let options = match (&config.user, &config.password) {
            (Some(user), Some(password)) => {
                async_nats::ConnectOptions::with_user_and_password(user.clone(), password.clone())
            }
            _ => async_nats::ConnectOptions::new(),
        }
        .name(client_name);

        let client = options
            .connect(config.url.as_str())
            .await
            .map_err(|e| IntercomError::transport(config.url.clone(), e))?;

        info!("Connected to NATS successfully");

        Ok(Self { client })
    }
}

#[async_trait]
impl MessageBus for NatsBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        let len = payload.len();

        self.client
            .publish(topic.to_string(), payload)
            .await
            .map_err(|e| IntercomError::transport(topic, e))?;

        debug!("Published to {} (bytes={})", topic, len);

        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<BusSubscription> {
        info!("Subscribing to {}", topic);

        let subscriber = self
            .client
            .subscribe(topic.to_string())
            .await
            .map_err(|e| IntercomError::transport(topic, e))?;

        info!("Subscribed to {}", topic);

        let stream = subscriber.map(|msg| InboundMessage {
            topic: msg.subject.to_string(),
            payload: msg.payload,
        });

        Ok(Box::pin(stream))
    }

    fn name(&self) -> &str {
        "nats"
    }
}
