use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::chunker;
use crate::error::{IntercomError, Result};

/// A message delivered by the bus
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

/// Stream of messages for one subscription
pub type BusSubscription = BoxStream<'static, InboundMessage>;

/// Publish/subscribe transport
///
/// Delivery is at-most-once; ordering is only guaranteed within a topic for a
/// single publisher.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()>;

    async fn subscribe(&self, topic: &str) -> Result<BusSubscription>;

    /// Get bus name for logging
    fn name(&self) -> &str;
}

/// Publish `payload` as `ceil(len / max_chunk)` independent messages.
///
/// Stops at the first failed chunk; the caller decides whether to retry or drop.
pub async fn publish_chunked(
    bus: &dyn MessageBus,
    topic: &str,
    payload: &Bytes,
    max_chunk: usize,
) -> Result<usize> {
    let chunks = chunker::split_bytes(payload, max_chunk);
    let count = chunks.len();
    for chunk in chunks {
        bus.publish(topic, chunk).await?;
    }
    Ok(count)
}

/// NATS-style subject match: exact, or `prefix.>` for everything below `prefix`.
pub fn topic_matches(pattern: &str, subject: &str) -> bool {
    match pattern.strip_suffix(">") {
        Some(prefix) if prefix.is_empty() || prefix.ends_with('.') => {
            subject.len() > prefix.len() && subject.starts_with(prefix)
        }
        _ => pattern == subject,
    }
}

/// In-process bus used for tests and broker-less local runs
pub struct MemoryBus {
    tx: broadcast::Sender<InboundMessage>,
    history: Mutex<Vec<InboundMessage>>,
    failures_pending: AtomicUsize,
}

impl MemoryBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(4096);
        Self {
            tx,
            history: Mutex::new(Vec::new()),
            failures_pending: AtomicUsize::new(0),
        }
    }

    /// Make the next `n` publish calls fail with a transport error
    pub fn fail_next_publishes(&self, n: usize) {
        self.failures_pending.store(n, Ordering::SeqCst);
    }

    /// Every payload successfully published to `topic`, in publish order
    pub fn published(&self, topic: &str) -> Vec<Bytes> {
        self.history
            .lock()
            .map(|history| {
                history
                    .iter()
                    .filter(|m| m.topic == topic)
                    .map(|m| m.payload.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        let injected = self
            .failures_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(IntercomError::transport(topic, "injected publish failure"));
        }

        let message = InboundMessage {
            topic: topic.to_string(),
            payload,
        };

        if let Ok(mut history) = self.history.lock() {
            history.push(message.clone());
        }

        // No subscribers is not an error: the broker would drop it too.
        let _ = self.tx.send(message);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<BusSubscription> {
        let rx = self.tx.subscribe();
        let pattern = topic.to_string();
        debug!("Memory bus subscription on {}", pattern);

        let stream = futures::stream::unfold((rx, pattern), |(mut rx, pattern)| async move {
            loop {
                match rx.recv().await {
                    Ok(msg) if topic_matches(&pattern, &msg.topic) => {
                        return Some((msg, (rx, pattern)));
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Subscriber on {} lagged, {} messages dropped", pattern, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(Box::pin(stream))
    }

    fn name(&self) -> &str {
        "memory"
    }
}
