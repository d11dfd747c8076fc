use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::timer::RestartableTimer;

/// Identifies one device's turn stream (the mic subject its frames arrive on)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Backend conversation correlation token. Set once per conversation.
#[derive(Debug, Default)]
pub struct ConversationToken(OnceLock<String>);

impl ConversationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<&str> {
        self.0.get().map(String::as_str)
    }

    /// Store `id` if no token is set yet. Returns whether it was stored.
    pub fn set_once(&self, id: String) -> bool {
        self.0.set(id).is_ok()
    }
}

/// Accumulator state for one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccumulatorState {
    Idle,
    Accumulating,
}

/// Why an utterance was flushed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushReason {
    EndMarker,
    Inactivity,
}

/// One contiguous span of mic audio handed to recognition
#[derive(Debug, Clone)]
pub struct Utterance {
    pub session_id: SessionId,
    /// Frames in arrival order
    pub frames: Vec<Bytes>,
    pub started_at: DateTime<Utc>,
    pub reason: FlushReason,
    pub conversation: Arc<ConversationToken>,
}

impl Utterance {
    pub fn byte_len(&self) -> usize {
        self.frames.iter().map(Bytes::len).sum()
    }
}

/// Per-session accumulation state, owned by the accumulator task
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub state: AccumulatorState,
    pub frames: Vec<Bytes>,
    pub conversation: Arc<ConversationToken>,
    pub timer: RestartableTimer,
    pub turn_started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub utterances_flushed: usize,
    pub utterances_discarded: usize,
}

impl Session {
    pub fn new(id: SessionId, timer: RestartableTimer) -> Self {
        Self {
            id,
            state: AccumulatorState::Idle,
            frames: Vec::new(),
            conversation: Arc::new(ConversationToken::new()),
            timer,
            turn_started_at: None,
            created_at: Utc::now(),
            utterances_flushed: 0,
            utterances_discarded: 0,
        }
    }

    /// Drop accumulated frames and return to Idle. The conversation token survives.
    pub fn clear(&mut self) {
        self.timer.cancel();
        self.frames.clear();
        self.state = AccumulatorState::Idle;
        self.turn_started_at = None;
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            session_id: self.id.clone(),
            state: self.state,
            buffered_frames: self.frames.len(),
            buffered_bytes: self.frames.iter().map(Bytes::len).sum(),
            conversation_id: self.conversation.get().map(str::to_string),
            created_at: self.created_at,
            turn_started_at: self.turn_started_at,
            utterances_flushed: self.utterances_flushed,
            utterances_discarded: self.utterances_discarded,
        }
    }
}

/// Statistics about a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_id: SessionId,

    pub state: AccumulatorState,

    /// Frames buffered for the turn in progress
    pub buffered_frames: usize,

    pub buffered_bytes: usize,

    /// Backend conversation token, once known
    pub conversation_id: Option<String>,

    pub created_at: DateTime<Utc>,

    /// When the first frame of the current turn arrived
    pub turn_started_at: Option<DateTime<Utc>>,

    /// Utterances handed to recognition
    pub utterances_flushed: usize,

    /// Utterances dropped as noise
    pub utterances_discarded: usize,
}
