use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use tokio::sync::Notify;

/// Bounded FIFO of received audio segments awaiting playback.
///
/// When full, `push` evicts the oldest segment so playback latency stays
/// bounded by the capacity.
#[derive(Debug)]
pub struct PlaybackQueue {
    segments: Mutex<VecDeque<Bytes>>,
    capacity: usize,
    available: Notify,
}

impl PlaybackQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            segments: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            available: Notify::new(),
        }
    }

    /// Enqueue `segment`, returning the evicted oldest segment if the queue was full.
    pub fn push(&self, segment: Bytes) -> Option<Bytes> {
        let evicted = {
            let mut segments = self.lock();
            let evicted = if segments.len() >= self.capacity {
                segments.pop_front()
            } else {
                None
            };
            segments.push_back(segment);
            evicted
        };

        self.available.notify_one();
        evicted
    }

    pub fn try_pop(&self) -> Option<Bytes> {
        self.lock().pop_front()
    }

    /// Wait for the oldest segment. Cancel-safe: a dropped call never loses a segment.
    pub async fn pop(&self) -> Bytes {
        loop {
            if let Some(segment) = self.try_pop() {
                return segment;
            }
            self.available.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Bytes>> {
        self.segments.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
