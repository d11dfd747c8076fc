pub mod controller;
pub mod peripheral;
pub mod playback;
pub mod runtime;
pub mod wav;

pub use controller::{ControllerConfig, DeviceAudioController, DeviceState};
pub use peripheral::{AudioPeripherals, CaptureStream, PlaybackSink};
pub use playback::PlaybackQueue;
pub use runtime::{watch_edges, DeviceRuntime, EdgeTrigger, RuntimeConfig, RuntimeStats};
pub use wav::{load_pcm, WavPeripherals};

use crate::config::Config;

impl From<&Config> for ControllerConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            mic_topic: cfg.bus.mic_topic.clone(),
            input_sample_rate: cfg.device.input_sample_rate,
            output_sample_rate: cfg.device.output_sample_rate,
        }
    }
}
