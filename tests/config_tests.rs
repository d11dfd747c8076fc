// Integration tests for layered configuration

use anyhow::Result;
use loqa_intercom::{Config, ErrorClass, IntercomError};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_defaults_match_wire_protocol() {
    let cfg = Config::default();

    assert_eq!(cfg.bus.mic_topic, "mic");
    assert_eq!(cfg.bus.audio_topic, "audio");
    assert_eq!(cfg.bus.max_chunk_bytes, 20_000);
    assert_eq!(cfg.device.read_buffer_bytes, 1000);
    assert_eq!(cfg.device.debounce(), Duration::from_millis(100));
    assert_eq!(cfg.device.playback_queue_capacity, 10);
    assert_eq!(cfg.server.inactivity_timeout(), Duration::from_secs(2));
    assert_eq!(cfg.server.min_sentence_chars, 20);
    assert_eq!(cfg.server.robot_command_max_chars, 10);
    assert_eq!(cfg.backends.chat_user_id, "esp32-001");
    assert!(cfg.device.device_id.starts_with("device-"));

    assert!(cfg.validate().is_ok());
}

#[test]
fn test_partial_file_overrides_only_given_keys() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("intercom.toml");
    fs::write(
        &path,
        r#"
[bus]
url = "nats://broker:4222"
max_chunk_bytes = 8000

[server]
inactivity_timeout_ms = 3000

[device]
device_id = "device-kitchen"
startup_sound = "sounds/hello.wav"
"#,
    )?;

    let cfg = Config::load(path.to_str().unwrap())?;

    assert_eq!(cfg.bus.url, "nats://broker:4222");
    assert_eq!(cfg.bus.max_chunk_bytes, 8000);
    assert_eq!(cfg.bus.mic_topic, "mic");
    assert_eq!(cfg.server.inactivity_timeout(), Duration::from_secs(3));
    assert_eq!(cfg.server.min_utterance_frames, 2);
    assert_eq!(cfg.device.device_id, "device-kitchen");
    assert_eq!(
        cfg.device.startup_sound.as_deref(),
        Some(std::path::Path::new("sounds/hello.wav"))
    );
    assert_eq!(cfg.http.port, 8787);

    Ok(())
}

#[test]
fn test_missing_file_falls_back_to_defaults() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("absent");

    let cfg = Config::load(path.to_str().unwrap())?;
    assert_eq!(cfg.bus.max_chunk_bytes, 20_000);

    Ok(())
}

#[test]
fn test_zero_chunk_size_is_rejected() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("intercom.toml");
    fs::write(&path, "[bus]\nmax_chunk_bytes = 0\n")?;

    assert!(Config::load(path.to_str().unwrap()).is_err());

    Ok(())
}

#[test]
fn test_audio_topic_must_differ_from_mic_topic() {
    let mut cfg = Config::default();
    cfg.bus.audio_topic = cfg.bus.mic_topic.clone();

    let err = cfg.validate().unwrap_err();
    assert!(matches!(err, IntercomError::Config { ref key, .. } if key == "bus.audio_topic"));
    assert_eq!(err.class(), ErrorClass::Unrecoverable);
}

#[test]
fn test_single_frame_utterances_cannot_be_enabled() {
    for frames in [0, 1] {
        let mut cfg = Config::default();
        cfg.server.min_utterance_frames = frames;

        let err = cfg.validate().unwrap_err();
        assert!(
            matches!(err, IntercomError::Config { ref key, .. } if key == "server.min_utterance_frames")
        );
    }

    let mut cfg = Config::default();
    cfg.server.min_utterance_frames = 2;
    assert!(cfg.validate().is_ok());
}
