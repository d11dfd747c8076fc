use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::IntercomError;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bus: BusConfig,
    pub device: DeviceConfig,
    pub server: ServerConfig,
    pub backends: BackendsConfig,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub mic_topic: String,
    pub audio_topic: String,
    pub robot_topic: String,
    /// Largest payload handed to a single publish call
    pub max_chunk_bytes: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            user: None,
            password: None,
            mic_topic: "mic".to_string(),
            audio_topic: "audio".to_string(),
            robot_topic: "robot".to_string(),
            max_chunk_bytes: 20_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub device_id: String,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    /// Size of one microphone read (one published frame)
    pub read_buffer_bytes: usize,
    pub debounce_ms: u64,
    pub capture_interval_ms: u64,
    pub error_backoff_ms: u64,
    pub playback_queue_capacity: usize,
    /// WAV file looped as the microphone when running the simulated device
    pub input_wav: PathBuf,
    /// WAV file that received audio is appended to
    pub output_wav: PathBuf,
    pub startup_sound: Option<PathBuf>,
    pub restart_sound: Option<PathBuf>,
    pub restart_delay_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_id: format!("device-{}", uuid::Uuid::new_v4().simple()),
            input_sample_rate: 16000,
            output_sample_rate: 16000,
            read_buffer_bytes: 1000,
            debounce_ms: 100,
            capture_interval_ms: 5,
            error_backoff_ms: 10,
            playback_queue_capacity: 10,
            input_wav: PathBuf::from("res/mic.wav"),
            output_wav: PathBuf::from("out/speaker.wav"),
            startup_sound: Some(PathBuf::from("res/init.wav")),
            restart_sound: Some(PathBuf::from("res/restart.wav")),
            restart_delay_ms: 2000,
        }
    }
}

impl DeviceConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn capture_interval(&self) -> Duration {
        Duration::from_millis(self.capture_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub inactivity_timeout_ms: u64,
    /// Utterances with fewer frames than this are discarded as noise
    pub min_utterance_frames: usize,
    pub min_sentence_chars: usize,
    pub robot_command_max_chars: usize,
    /// ~2s of 16kHz 16-bit mono
    pub synthesis_flush_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_ms: 2000,
            min_utterance_frames: 2,
            min_sentence_chars: 20,
            robot_command_max_chars: 10,
            synthesis_flush_bytes: 32_000,
        }
    }
}

impl ServerConfig {
    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_millis(self.inactivity_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendsConfig {
    pub speech_key: String,
    pub speech_region: String,
    pub recognition_language: String,
    pub synthesis_voice: String,
    pub chat_base_url: String,
    pub chat_api_key: String,
    pub chat_user_id: String,
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            speech_key: String::new(),
            speech_region: "eastasia".to_string(),
            recognition_language: "zh-CN".to_string(),
            synthesis_voice: "zh-CN-XiaoxiaoNeural".to_string(),
            chat_base_url: "https://api.dify.ai/v1".to_string(),
            chat_api_key: String::new(),
            chat_user_id: "esp32-001".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

impl Config {
    /// Load from `path` (any format the `config` crate understands, extension optional)
    /// and overlay `INTERCOM__SECTION__KEY` environment variables.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("INTERCOM")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let cfg: Self = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> std::result::Result<(), IntercomError> {
        let checks: [(&str, bool, &str); 7] = [
            ("bus.max_chunk_bytes", self.bus.max_chunk_bytes > 0, "must be non-zero"),
            ("device.read_buffer_bytes", self.device.read_buffer_bytes > 0, "must be non-zero"),
            (
                "device.playback_queue_capacity",
                self.device.playback_queue_capacity > 0,
                "must be non-zero",
            ),
            (
                "server.inactivity_timeout_ms",
                self.server.inactivity_timeout_ms > 0,
                "must be non-zero",
            ),
            (
                "server.min_utterance_frames",
                self.server.min_utterance_frames >= 2,
                "must be at least 2, single-frame flushes are noise",
            ),
            (
                "server.synthesis_flush_bytes",
                self.server.synthesis_flush_bytes > 0,
                "must be non-zero",
            ),
            (
                "bus.audio_topic",
                !self.bus.audio_topic.is_empty() && self.bus.audio_topic != self.bus.mic_topic,
                "must be set and differ from bus.mic_topic",
            ),
        ];

        for (key, ok, message) in checks {
            if !ok {
                return Err(IntercomError::Config {
                    key: key.to_string(),
                    message: message.to_string(),
                });
            }
        }

        Ok(())
    }
}
