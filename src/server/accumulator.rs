//! Server-side utterance accumulation.
//!
//! Frames, end markers, cancellations and timer expiries for every session are
//! funnelled through one command channel consumed by a single task, so a flush
//! can never race an append. Inactivity is treated as end of turn: the
//! accumulator cannot tell a pause from a finished sentence.

use bytes::Bytes;
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::session::{
    AccumulatorState, FlushReason, Session, SessionId, SessionStats, Utterance,
};
use crate::config::ServerConfig;
use crate::error::{IntercomError, Result};
use crate::timer::RestartableTimer;
use crate::transport::MicMessage;

#[derive(Debug, Clone)]
pub struct AccumulatorConfig {
    pub inactivity_timeout: Duration,
    /// Utterances with fewer frames are discarded without recognition
    pub min_frames: usize,
}

impl Default for AccumulatorConfig {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for AccumulatorConfig {
    fn from(cfg: &ServerConfig) -> Self {
        Self {
            inactivity_timeout: cfg.inactivity_timeout(),
            min_frames: cfg.min_utterance_frames,
        }
    }
}

#[derive(Debug)]
enum Command {
    Frame { session: SessionId, payload: Bytes },
    EndOfTurn { session: SessionId },
    TimerExpired { session: SessionId, generation: u64 },
    Cancel { session: SessionId },
    Snapshot { reply: oneshot::Sender<Vec<SessionStats>> },
}

/// Cloneable front door to the accumulator task
#[derive(Clone)]
pub struct AccumulatorHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl AccumulatorHandle {
    pub fn frame(&self, session: SessionId, payload: Bytes) -> Result<()> {
        self.send(Command::Frame { session, payload })
    }

    pub fn end_of_turn(&self, session: SessionId) -> Result<()> {
        self.send(Command::EndOfTurn { session })
    }

    /// Abandon the turn in progress: cancel its timer and drop buffered frames.
    pub fn cancel(&self, session: SessionId) -> Result<()> {
        self.send(Command::Cancel { session })
    }

    pub fn dispatch(&self, session: SessionId, message: MicMessage) -> Result<()> {
        match message {
            MicMessage::Audio(payload) => self.frame(session, payload),
            MicMessage::EndOfTurn => self.end_of_turn(session),
        }
    }

    pub async fn snapshot(&self) -> Result<Vec<SessionStats>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply })?;
        rx.await.map_err(|_| IntercomError::Shutdown {
            component: "utterance accumulator",
        })
    }

    fn send(&self, command: Command) -> Result<()> {
        self.tx.send(command).map_err(|_| IntercomError::Shutdown {
            component: "utterance accumulator",
        })
    }
}

pub struct UtteranceAccumulator {
    config: AccumulatorConfig,
    sessions: HashMap<SessionId, Session>,
    // Weak so the task ends once every handle is dropped.
    timer_tx: mpsc::WeakUnboundedSender<Command>,
    utterance_tx: mpsc::Sender<Utterance>,
}

impl UtteranceAccumulator {
    /// Start the accumulator task. Flushed utterances are sent to `utterance_tx`.
    pub fn spawn(
        config: AccumulatorConfig,
        utterance_tx: mpsc::Sender<Utterance>,
    ) -> (AccumulatorHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();

        info!(
            "Utterance accumulator started (timeout={}ms, min_frames={})",
            config.inactivity_timeout.as_millis(),
            config.min_frames
        );

        let accumulator = Self {
            config,
            sessions: HashMap::new(),
            timer_tx: tx.downgrade(),
            utterance_tx,
        };

        let task = tokio::spawn(accumulator.run(rx));

        (AccumulatorHandle { tx }, task)
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Frame { session, payload } => self.on_frame(session, payload),
                Command::EndOfTurn { session } => {
                    self.flush(&session, FlushReason::EndMarker).await
                }
                Command::TimerExpired {
                    session,
                    generation,
                } => self.on_timer_expiry(session, generation).await,
                Command::Cancel { session } => self.on_cancel(&session),
                Command::Snapshot { reply } => {
                    let stats = self.sessions.values().map(Session::stats).collect();
                    let _ = reply.send(stats);
                }
            }
        }

        info!("Utterance accumulator stopped");
    }

    fn on_frame(&mut self, id: SessionId, payload: Bytes) {
        let timeout = self.config.inactivity_timeout;
        let session = self
            .sessions
            .entry(id.clone())
            .or_insert_with(|| Session::new(id.clone(), RestartableTimer::new(timeout)));

        if session.state == AccumulatorState::Idle {
            debug!("Session {} started a new utterance", id);
            session.state = AccumulatorState::Accumulating;
            session.turn_started_at = Some(Utc::now());
        }

        session.frames.push(payload);

        let timer_tx = self.timer_tx.clone();
        session.timer.restart(move |generation| {
            if let Some(tx) = timer_tx.upgrade() {
                let _ = tx.send(Command::TimerExpired {
                    session: id,
                    generation,
                });
            }
        });
    }

    async fn on_timer_expiry(&mut self, id: SessionId, generation: u64) {
        let live = match self.sessions.get_mut(&id) {
            Some(session) if session.timer.is_current(generation) => {
                session.timer.disarm();
                true
            }
            _ => false,
        };

        if live {
            debug!("Session {} inactive for {:?}", id, self.config.inactivity_timeout);
            self.flush(&id, FlushReason::Inactivity).await;
        } else {
            debug!("Ignoring stale timer for session {} (generation {})", id, generation);
        }
    }

    fn on_cancel(&mut self, id: &SessionId) {
        match self.sessions.get_mut(id) {
            Some(session) => {
                let dropped = session.frames.len();
                session.clear();
                info!("Cancelled turn for session {} ({} frames dropped)", id, dropped);
            }
            None => debug!("Cancel for unknown session {}", id),
        }
    }

    async fn flush(&mut self, id: &SessionId, reason: FlushReason) {
        let Some(session) = self.sessions.get_mut(id) else {
            debug!("{:?} for unknown session {}", reason, id);
            return;
        };

        if session.state == AccumulatorState::Idle {
            debug!("{:?} for session {} with nothing buffered", reason, id);
            return;
        }

        let frames = std::mem::take(&mut session.frames);
        let started_at = session.turn_started_at.unwrap_or_else(Utc::now);
        session.clear();

        if frames.len() < self.config.min_frames {
            session.utterances_discarded += 1;
            debug!(
                "Discarding {}-frame utterance from session {} as noise",
                frames.len(),
                id
            );
            return;
        }

        session.utterances_flushed += 1;

        let utterance = Utterance {
            session_id: id.clone(),
            frames,
            started_at,
            reason,
            conversation: session.conversation.clone(),
        };

        info!(
            "Flushing utterance for session {} ({} frames, {} bytes, {:?})",
            id,
            utterance.frames.len(),
            utterance.byte_len(),
            reason
        );

        if let Err(e) = self.utterance_tx.send(utterance).await {
            error!("Recognition stage is gone, utterance dropped: {}", e);
        }
    }
}
