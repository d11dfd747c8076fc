pub mod accumulator;
pub mod chat;
pub mod command;
pub mod dispatcher;
pub mod pipeline;
pub mod recognition;
pub mod segmenter;
pub mod service;
pub mod session;
pub mod synthesis;

pub use accumulator::{AccumulatorConfig, AccumulatorHandle, UtteranceAccumulator};
pub use chat::{ChatBackend, ChatDelta, ChatStream, DifyChatClient};
pub use command::RobotCommandPolicy;
pub use dispatcher::{DispatcherStats, OutboundDispatcher, OutboundHandle, OutboundMessage};
pub use pipeline::{PipelineConfig, RecognitionStage, ReplySummary, ResponseStage, TurnEvent};
pub use recognition::{pcm_to_wav, AzureRecognizer, RecognitionSession};
pub use segmenter::{Sentence, SentenceSegmenter};
pub use service::{IntercomServer, ServerBackends};
pub use session::{
    AccumulatorState, ConversationToken, FlushReason, Session, SessionId, SessionStats, Utterance,
};
pub use synthesis::{AzureSynthesizer, SynthesisBuffer, SynthesisEvent, Synthesizer};
