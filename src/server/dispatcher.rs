use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{IntercomError, Result};
use crate::transport::{publish_chunked, MessageBus};

/// A payload waiting to be published
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

/// Non-blocking producer side of the dispatcher, safe to call from any thread
#[derive(Clone)]
pub struct OutboundHandle {
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl OutboundHandle {
    pub fn publish(&self, topic: impl Into<String>, payload: Bytes) -> Result<()> {
        self.tx
            .send(OutboundMessage {
                topic: topic.into(),
                payload,
            })
            .map_err(|_| IntercomError::Shutdown {
                component: "outbound dispatcher",
            })
    }
}

/// Totals reported when the dispatcher drains and stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub messages: usize,
    pub chunks: usize,
    pub failures: usize,
}

/// Single consumer draining queued payloads into the bus.
///
/// Keeps blocking network publishes off recognition and synthesis paths. The
/// task ends once every [`OutboundHandle`] is dropped and the queue is empty.
pub struct OutboundDispatcher;

impl OutboundDispatcher {
    pub fn spawn(
        bus: Arc<dyn MessageBus>,
        max_chunk: usize,
    ) -> (OutboundHandle, JoinHandle<DispatcherStats>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(Self::drain(bus, max_chunk, rx));
        (OutboundHandle { tx }, task)
    }

    async fn drain(
        bus: Arc<dyn MessageBus>,
        max_chunk: usize,
        mut rx: mpsc::UnboundedReceiver<OutboundMessage>,
    ) -> DispatcherStats {
        let mut stats = DispatcherStats::default();

        info!("Outbound dispatcher started on {} bus", bus.name());

        while let Some(message) = rx.recv().await {
            if message.payload.is_empty() {
                debug!("Skipping empty payload for {}", message.topic);
                continue;
            }

            stats.messages += 1;

            match publish_chunked(bus.as_ref(), &message.topic, &message.payload, max_chunk).await
            {
                Ok(chunks) => {
                    stats.chunks += chunks;
                    debug!(
                        "Published {} bytes to {} in {} chunks",
                        message.payload.len(),
                        message.topic,
                        chunks
                    );
                }
                Err(e) => {
                    stats.failures += 1;
                    warn!("Dropping outbound message for {}: {}", message.topic, e);
                }
            }
        }

        info!(
            "Outbound dispatcher stopped ({} messages, {} chunks, {} failures)",
            stats.messages, stats.chunks, stats.failures
        );

        stats
    }
}
