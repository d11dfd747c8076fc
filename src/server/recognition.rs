use async_trait::async_trait;
use serde::Deserialize;
use std::io::Cursor;
use tracing::{debug, info};

use crate::config::BackendsConfig;
use crate::error::{IntercomError, Result};

/// Speech recognition session
///
/// The pipeline feeds one utterance, asks for the result, and calls `reset`
/// after any failure so the next utterance starts from a clean session.
#[async_trait]
pub trait RecognitionSession: Send {
    /// Append raw 16-bit PCM to the current utterance
    async fn feed(&mut self, audio: &[u8]) -> Result<()>;

    /// Finish the utterance and return the recognized text, if any
    async fn finish(&mut self) -> Result<Option<String>>;

    /// Drop all per-utterance state
    fn reset(&mut self);

    /// Get recognizer name for logging
    fn name(&self) -> &str;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ShortAudioResponse {
    recognition_status: String,
    #[serde(default)]
    display_text: Option<String>,
}

/// Azure Speech REST recognizer for short (< 60s) utterances
pub struct AzureRecognizer {
    client: reqwest::Client,
    endpoint: String,
    key: String,
    sample_rate: u32,
    pcm: Vec<u8>,
}

impl AzureRecognizer {
    pub fn new(config: &BackendsConfig, sample_rate: u32) -> Self {
        let endpoint = format!(
            "https://{}.stt.speech.microsoft.com/speech/recognition/conversation/cognitiveservices/v1?language={}&format=simple",
            config.speech_region, config.recognition_language
        );

        info!(
            "Azure recognizer configured ({}, {}Hz)",
            config.recognition_language, sample_rate
        );

        Self {
            client: reqwest::Client::new(),
            endpoint,
            key: config.speech_key.clone(),
            sample_rate,
            pcm: Vec::new(),
        }
    }
}

#[async_trait]
impl RecognitionSession for AzureRecognizer {
    async fn feed(&mut self, audio: &[u8]) -> Result<()> {
        self.pcm.extend_from_slice(audio);
        Ok(())
    }

    async fn finish(&mut self) -> Result<Option<String>> {
        let pcm = std::mem::take(&mut self.pcm);
        if pcm.is_empty() {
            return Ok(None);
        }

        let wav = pcm_to_wav(&pcm, self.sample_rate)?;
        debug!("Uploading {} bytes of audio for recognition", wav.len());

        let resp = self
            .client
            .post(&self.endpoint)
            .header("Ocp-Apim-Subscription-Key", &self.key)
            .header(
                "Content-Type",
                format!("audio/wav; codecs=audio/pcm; samplerate={}", self.sample_rate),
            )
            .header("Accept", "application/json")
            .body(wav)
            .send()
            .await
            .map_err(|e| IntercomError::Recognition {
                message: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(IntercomError::Recognition {
                message: format!("HTTP {status}: {body}"),
            });
        }

        let parsed: ShortAudioResponse =
            resp.json().await.map_err(|e| IntercomError::Recognition {
                message: format!("bad response body: {e}"),
            })?;

        interpret(parsed)
    }

    fn reset(&mut self) {
        self.pcm.clear();
    }

    fn name(&self) -> &str {
        "azure"
    }
}

fn interpret(resp: ShortAudioResponse) -> Result<Option<String>> {
    match resp.recognition_status.as_str() {
        "Success" => Ok(resp.display_text.filter(|t| !t.trim().is_empty())),
        "NoMatch" | "InitialSilenceTimeout" | "BabbleTimeout" => {
            debug!("No speech recognized ({})", resp.recognition_status);
            Ok(None)
        }
        other => Err(IntercomError::Recognition {
            message: format!("recognition status {other}"),
        }),
    }
}

/// Wrap little-endian 16-bit mono PCM in a WAV container
pub fn pcm_to_wav(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let to_err = |e: hound::Error| IntercomError::Recognition {
        message: format!("failed to encode WAV: {e}"),
    };

    let mut cursor = Cursor::new(Vec::with_capacity(pcm.len() + 44));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(to_err)?;
        for sample in pcm.chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([sample[0], sample[1]]))
                .map_err(to_err)?;
        }
        writer.finalize().map_err(to_err)?;
    }

    Ok(cursor.into_inner())
}
