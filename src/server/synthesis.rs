//! Speech synthesis and re-buffering of synthesized audio for transport.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::StreamExt;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::dispatcher::OutboundHandle;
use crate::config::BackendsConfig;
use crate::error::{IntercomError, Result};

/// Progress reported by a synthesizer while it works on one text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisEvent {
    /// Next piece of raw 16kHz 16-bit mono PCM
    AudioChunk(Bytes),
    /// All audio for the text has been delivered
    Complete,
    /// Backend gave up; audio already delivered stays valid
    Canceled { reason: String },
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize `text`, reporting zero or more `AudioChunk`s then `Complete`
    async fn synthesize(&self, text: &str, events: mpsc::Sender<SynthesisEvent>) -> Result<()>;

    /// Tear down backend state after a failure
    fn reset(&self) {}

    /// Get synthesizer name for logging
    fn name(&self) -> &str;
}

/// Accumulates synthesized audio and hands threshold-sized segments to the
/// outbound dispatcher.
///
/// Safe to drive from a backend-owned callback thread: append, flush and clear
/// happen under one lock, so concurrent chunks are published exactly once and
/// in arrival order.
pub struct SynthesisBuffer {
    threshold: usize,
    topic: String,
    outbound: OutboundHandle,
    pending: Mutex<Vec<u8>>,
}

impl SynthesisBuffer {
    pub fn new(threshold: usize, topic: impl Into<String>, outbound: OutboundHandle) -> Self {
        Self {
            threshold,
            topic: topic.into(),
            outbound,
            pending: Mutex::new(Vec::with_capacity(threshold)),
        }
    }

    pub fn on_audio_chunk(&self, chunk: &[u8]) -> Result<()> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.extend_from_slice(chunk);
        if pending.len() >= self.threshold {
            self.flush_locked(&mut pending)?;
        }
        Ok(())
    }

    /// Publish any remainder, however small
    pub fn on_synthesis_complete(&self) -> Result<()> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if !pending.is_empty() {
            self.flush_locked(&mut pending)?;
        }
        Ok(())
    }

    pub fn pending_len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Feed every event from `events` into the buffer until the sender is gone.
    /// Returns the number of audio bytes received.
    pub async fn consume(&self, mut events: mpsc::Receiver<SynthesisEvent>) -> Result<usize> {
        let mut received = 0;

        while let Some(event) = events.recv().await {
            match event {
                SynthesisEvent::AudioChunk(chunk) => {
                    received += chunk.len();
                    self.on_audio_chunk(&chunk)?;
                }
                SynthesisEvent::Complete => self.on_synthesis_complete()?,
                SynthesisEvent::Canceled { reason } => {
                    warn!("Synthesis canceled: {}", reason);
                    self.on_synthesis_complete()?;
                }
            }
        }

        // A backend that dies without `Complete` must not strand audio.
        self.on_synthesis_complete()?;

        Ok(received)
    }

    fn flush_locked(&self, pending: &mut Vec<u8>) -> Result<()> {
        let payload = Bytes::from(std::mem::replace(
            pending,
            Vec::with_capacity(self.threshold),
        ));
        debug!("Flushing {} bytes of synthesized audio to {}", payload.len(), self.topic);
        self.outbound.publish(self.topic.clone(), payload)
    }
}

/// Azure Speech REST synthesizer streaming raw PCM
pub struct AzureSynthesizer {
    client: reqwest::Client,
    endpoint: String,
    key: String,
    voice: String,
    language: String,
}

impl AzureSynthesizer {
    pub fn new(config: &BackendsConfig) -> Self {
        info!("Azure synthesizer configured ({})", config.synthesis_voice);

        Self {
            client: reqwest::Client::new(),
            endpoint: format!(
                "https://{}.tts.speech.microsoft.com/cognitiveservices/v1",
                config.speech_region
            ),
            key: config.speech_key.clone(),
            voice: config.synthesis_voice.clone(),
            language: config.recognition_language.clone(),
        }
    }

    fn ssml(&self, text: &str) -> String {
        format!(
            "<speak version='1.0' xml:lang='{}'><voice name='{}'>{}</voice></speak>",
            self.language,
            self.voice,
            escape_xml(text)
        )
    }
}

#[async_trait]
impl Synthesizer for AzureSynthesizer {
    async fn synthesize(&self, text: &str, events: mpsc::Sender<SynthesisEvent>) -> Result<()> {
        debug!(text_len = text.len(), "Starting synthesis");

        let resp = self
            .client
            .post(&self.endpoint)
            .header("Ocp-Apim-Subscription-Key", &self.key)
            .header("Content-Type", "application/ssml+xml")
            .header("X-Microsoft-OutputFormat", "raw-16khz-16bit-mono-pcm")
            .header("User-Agent", "loqa-intercom")
            .body(self.ssml(text))
            .send()
            .await
            .map_err(|e| IntercomError::Synthesis {
                message: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(IntercomError::Synthesis {
                message: format!("HTTP {status}: {body}"),
            });
        }

        let mut stream = resp.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| IntercomError::Synthesis {
                message: format!("stream error: {e}"),
            })?;

            if events.send(SynthesisEvent::AudioChunk(chunk)).await.is_err() {
                debug!("Synthesis receiver dropped, stopping stream");
                return Ok(());
            }
        }

        let _ = events.send(SynthesisEvent::Complete).await;
        Ok(())
    }

    fn name(&self) -> &str {
        "azure"
    }
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&apos;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}
