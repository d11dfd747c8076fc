//! Error types for loqa-intercom.

use thiserror::Error;

/// How a failure should be handled by the loop that observed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Log, back off briefly, keep looping.
    Transient,
    /// Abandon the current turn and roll state back; no local retry.
    TurnFatal,
    /// Tear down and rebuild the backend session so the next turn starts clean.
    BackendReset,
    /// Shared state can no longer be trusted; restart the process or device.
    Unrecoverable,
}

#[derive(Error, Debug)]
pub enum IntercomError {
    // Transport errors
    #[error("Transport error on {topic}: {message}")]
    Transport { topic: String, message: String },

    // Device errors
    #[error("Audio peripheral unavailable ({role}): {message}")]
    Peripheral { role: &'static str, message: String },

    #[error("Audio I/O failed: {message}")]
    AudioIo { message: String },

    // Backend errors
    #[error("Speech recognition failed: {message}")]
    Recognition { message: String },

    #[error("Speech synthesis failed: {message}")]
    Synthesis { message: String },

    #[error("Chat backend failed: {message}")]
    Chat { message: String },

    // Configuration errors
    #[error("Invalid configuration value for {key}: {message}")]
    Config { key: String, message: String },

    #[error("{component} has shut down")]
    Shutdown { component: &'static str },
}

impl IntercomError {
    pub fn transport(topic: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Transport {
            topic: topic.into(),
            message: err.to_string(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Transport { .. } | Self::AudioIo { .. } => ErrorClass::Transient,
            Self::Peripheral { .. } => ErrorClass::TurnFatal,
            Self::Recognition { .. } | Self::Synthesis { .. } | Self::Chat { .. } => {
                ErrorClass::BackendReset
            }
            Self::Config { .. } | Self::Shutdown { .. } => ErrorClass::Unrecoverable,
        }
    }
}

pub type Result<T> = std::result::Result<T, IntercomError>;
