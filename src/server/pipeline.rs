//! Turn processing after the accumulator: recognition, then reply.
//!
//! Each stage is one task consuming a channel, so events for a turn are
//! handled strictly in order and a slow backend applies backpressure instead
//! of piling up callbacks.

use bytes::Bytes;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::chat::ChatBackend;
use super::command::RobotCommandPolicy;
use super::dispatcher::OutboundHandle;
use super::recognition::RecognitionSession;
use super::segmenter::SentenceSegmenter;
use super::session::{ConversationToken, SessionId, Utterance};
use super::synthesis::{SynthesisBuffer, Synthesizer};
use crate::config::Config;
use crate::error::{ErrorClass, Result};

/// Capacity of the per-sentence synthesis event channel
const SYNTHESIS_EVENT_CAPACITY: usize = 64;

/// Events flowing from recognition to the response stage
#[derive(Debug, Clone)]
pub enum TurnEvent {
    Recognized {
        session: SessionId,
        text: String,
        conversation: Arc<ConversationToken>,
    },
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub audio_topic: String,
    pub robot_topic: String,
    pub min_sentence_chars: usize,
    pub robot_command_max_chars: usize,
    pub synthesis_flush_bytes: usize,
}

impl From<&Config> for PipelineConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            audio_topic: cfg.bus.audio_topic.clone(),
            robot_topic: cfg.bus.robot_topic.clone(),
            min_sentence_chars: cfg.server.min_sentence_chars,
            robot_command_max_chars: cfg.server.robot_command_max_chars,
            synthesis_flush_bytes: cfg.server.synthesis_flush_bytes,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

pub struct RecognitionStage {
    recognizer: Box<dyn RecognitionSession>,
}

impl RecognitionStage {
    pub fn new(recognizer: Box<dyn RecognitionSession>) -> Self {
        Self { recognizer }
    }

    pub fn spawn(
        self,
        utterances: mpsc::Receiver<Utterance>,
        events: mpsc::Sender<TurnEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(utterances, events))
    }

    async fn run(mut self, mut utterances: mpsc::Receiver<Utterance>, events: mpsc::Sender<TurnEvent>) {
        info!("Recognition stage started ({})", self.recognizer.name());

        while let Some(utterance) = utterances.recv().await {
            let text = match self.recognize(&utterance).await {
                Ok(Some(text)) => text,
                Ok(None) => continue,
                Err(e) => {
                    error!("Recognition stage cannot continue: {}", e);
                    break;
                }
            };

            let event = TurnEvent::Recognized {
                session: utterance.session_id,
                text,
                conversation: utterance.conversation,
            };

            if events.send(event).await.is_err() {
                error!("Response stage is gone, stopping recognition");
                break;
            }
        }

        info!("Recognition stage stopped");
    }

    /// Run one utterance through the recognizer.
    ///
    /// A transient failure is retried once on a reset session. Any other
    /// failure resets the session and drops the turn, except an unrecoverable
    /// one, which is returned.
    pub async fn recognize(&mut self, utterance: &Utterance) -> Result<Option<String>> {
        let mut result = self.recognize_frames(&utterance.frames).await;

        let transient = matches!(&result, Err(e) if e.class() == ErrorClass::Transient);
        if transient {
            warn!("Recognition for {} interrupted, retrying", utterance.session_id);
            self.recognizer.reset();
            result = self.recognize_frames(&utterance.frames).await;
        }

        match result {
            Ok(Some(text)) if !text.trim().is_empty() => {
                info!("Recognized for {}: {}", utterance.session_id, text);
                Ok(Some(text))
            }
            Ok(_) => {
                debug!("No speech recognized for {}", utterance.session_id);
                Ok(None)
            }
            Err(e) if e.class() == ErrorClass::Unrecoverable => Err(e),
            Err(e) => {
                warn!(
                    "Recognition failed for {}, resetting {}: {}",
                    utterance.session_id,
                    self.recognizer.name(),
                    e
                );
                self.recognizer.reset();
                Ok(None)
            }
        }
    }

    async fn recognize_frames(&mut self, frames: &[Bytes]) -> Result<Option<String>> {
        for frame in frames {
            self.recognizer.feed(frame).await?;
        }
        self.recognizer.finish().await
    }
}

/// What a finished reply produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplySummary {
    pub sentences: usize,
    pub audio_bytes: usize,
    pub robot_command: Option<String>,
}

pub struct ResponseStage {
    chat: Arc<dyn ChatBackend>,
    synthesizer: Arc<dyn Synthesizer>,
    outbound: OutboundHandle,
    policy: RobotCommandPolicy,
    config: PipelineConfig,
}

impl ResponseStage {
    pub fn new(
        chat: Arc<dyn ChatBackend>,
        synthesizer: Arc<dyn Synthesizer>,
        outbound: OutboundHandle,
        config: PipelineConfig,
    ) -> Self {
        Self {
            chat,
            synthesizer,
            outbound,
            policy: RobotCommandPolicy::new(config.robot_command_max_chars),
            config,
        }
    }

    pub fn spawn(self, events: mpsc::Receiver<TurnEvent>) -> JoinHandle<()> {
        tokio::spawn(self.run(events))
    }

    async fn run(self, mut events: mpsc::Receiver<TurnEvent>) {
        info!("Response stage started");

        while let Some(event) = events.recv().await {
            match event {
                TurnEvent::Recognized {
                    session,
                    text,
                    conversation,
                } => match self.reply(&session, &text, &conversation).await {
                    Ok(summary) => info!(
                        "Reply for {} done ({} sentences, {} audio bytes)",
                        session, summary.sentences, summary.audio_bytes
                    ),
                    Err(e) => {
                        error!("Response stage cannot continue: {}", e);
                        break;
                    }
                },
            }
        }

        info!("Response stage stopped");
    }

    /// Stream a chat reply for `query` and speak it sentence by sentence.
    ///
    /// Chat and synthesis failures are absorbed; unrecoverable errors, such as
    /// a closed outbound path, are returned.
    pub async fn reply(
        &self,
        session: &SessionId,
        query: &str,
        conversation: &ConversationToken,
    ) -> Result<ReplySummary> {
        let mut summary = ReplySummary::default();
        let mut segmenter = SentenceSegmenter::new(self.config.min_sentence_chars);
        let buffer = SynthesisBuffer::new(
            self.config.synthesis_flush_bytes,
            self.config.audio_topic.clone(),
            self.outbound.clone(),
        );

        let mut stream = match self.chat.stream_reply(query, conversation.get()).await {
            Ok(stream) => stream,
            Err(e) if e.class() == ErrorClass::Unrecoverable => return Err(e),
            Err(e) => {
                warn!("Chat request failed for {}: {}", session, e);
                return Ok(summary);
            }
        };

        let mut complete = true;

        while let Some(delta) = stream.next().await {
            let delta = match delta {
                Ok(delta) => delta,
                Err(e) if e.class() == ErrorClass::Unrecoverable => return Err(e),
                Err(e) => {
                    warn!("Chat stream for {} ended early: {}", session, e);
                    complete = false;
                    break;
                }
            };

            if let Some(id) = delta.conversation_id {
                if conversation.set_once(id) {
                    info!(
                        "Conversation for {} is {}",
                        session,
                        conversation.get().unwrap_or_default()
                    );
                }
            }

            if let Some(answer) = delta.answer {
                for sentence in segmenter.feed_str(&answer) {
                    summary.sentences += 1;
                    summary.audio_bytes += self.speak(&sentence.text, &buffer).await?;
                }
            }
        }

        if let Some(residual) = segmenter.end_of_stream() {
            if complete {
                if let Some(command) = self.policy.command_for(&residual) {
                    info!("Robot command for {}: {}", session, command);
                    self.outbound.publish(
                        self.config.robot_topic.clone(),
                        Bytes::copy_from_slice(command.as_bytes()),
                    )?;
                    summary.robot_command = Some(command.to_string());
                }
            }

            summary.sentences += 1;
            summary.audio_bytes += self.speak(&residual.text, &buffer).await?;
        }

        Ok(summary)
    }

    /// Synthesize one sentence into `buffer`. Returns audio bytes received.
    async fn speak(&self, text: &str, buffer: &SynthesisBuffer) -> Result<usize> {
        debug!("Speaking: {}", text);

        let (tx, rx) = mpsc::channel(SYNTHESIS_EVENT_CAPACITY);
        let (synthesized, consumed) =
            tokio::join!(self.synthesizer.synthesize(text, tx), buffer.consume(rx));

        let spoken = consumed?;

        if let Err(e) = synthesized {
            match e.class() {
                ErrorClass::BackendReset => {
                    warn!(
                        "Synthesis failed, resetting {}: {}",
                        self.synthesizer.name(),
                        e
                    );
                    self.synthesizer.reset();
                }
                ErrorClass::Unrecoverable => return Err(e),
                ErrorClass::Transient | ErrorClass::TurnFatal => {
                    warn!("Synthesis of one sentence failed: {}", e);
                }
            }
        }

        Ok(spoken)
    }
}
