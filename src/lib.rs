pub mod config;
pub mod device;
pub mod error;
pub mod http;
pub mod server;
pub mod timer;
pub mod transport;

pub use config::Config;
pub use device::{
    AudioPeripherals, DeviceAudioController, DeviceRuntime, DeviceState, EdgeTrigger,
    PlaybackQueue, WavPeripherals,
};
pub use error::{ErrorClass, IntercomError};
pub use http::{create_router, AppState};
pub use server::{
    IntercomServer, SentenceSegmenter, ServerBackends, SynthesisBuffer, UtteranceAccumulator,
};
pub use timer::RestartableTimer;
pub use transport::{MemoryBus, MessageBus, MicMessage, NatsBus};
