use bytes::Bytes;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::peripheral::{AudioPeripherals, CaptureStream, PlaybackSink};
use crate::error::{IntercomError, Result};

/// Load a 16-bit WAV file as little-endian PCM bytes
pub fn load_pcm(path: impl AsRef<Path>) -> Result<(Bytes, u32)> {
    let path = path.as_ref();

    let reader = WavReader::open(path).map_err(|e| IntercomError::AudioIo {
        message: format!("failed to open {}: {}", path.display(), e),
    })?;

    let spec = reader.spec();
    if spec.bits_per_sample != 16 || spec.sample_format != SampleFormat::Int {
        return Err(IntercomError::AudioIo {
            message: format!(
                "{} is not 16-bit PCM ({} bits, {:?})",
                path.display(),
                spec.bits_per_sample,
                spec.sample_format
            ),
        });
    }

    let samples = reader
        .into_samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| IntercomError::AudioIo {
            message: format!("failed to read {}: {}", path.display(), e),
        })?;

    let pcm: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();

    Ok((Bytes::from(pcm), spec.sample_rate))
}

/// Desktop stand-in for the device audio path.
///
/// The microphone loops the PCM of `input` forever; the speaker appends every
/// written segment to `output` as mono 16-bit WAV.
pub struct WavPeripherals {
    input: PathBuf,
    output: PathBuf,
}

impl WavPeripherals {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
        }
    }
}

impl AudioPeripherals for WavPeripherals {
    fn open_input(&mut self, sample_rate: u32) -> Result<Box<dyn CaptureStream>> {
        let (pcm, file_rate) = load_pcm(&self.input).map_err(|e| IntercomError::Peripheral {
            role: "input",
            message: e.to_string(),
        })?;

        if pcm.is_empty() {
            return Err(IntercomError::Peripheral {
                role: "input",
                message: format!("{} holds no samples", self.input.display()),
            });
        }

        if file_rate != sample_rate {
            warn!(
                "{} is {}Hz, capturing as {}Hz",
                self.input.display(),
                file_rate,
                sample_rate
            );
        }

        info!("Microphone opened from {}", self.input.display());
        Ok(Box::new(LoopingCapture { pcm, position: 0 }))
    }

    fn open_output(&mut self, sample_rate: u32) -> Result<Box<dyn PlaybackSink>> {
        let writer = open_writer(&self.output, sample_rate).map_err(|e| {
            IntercomError::Peripheral {
                role: "output",
                message: format!("{}: {}", self.output.display(), e),
            }
        })?;

        Ok(Box::new(WavSink { writer }))
    }

    fn name(&self) -> &str {
        "wav"
    }
}

fn open_writer(path: &Path, sample_rate: u32) -> hound::Result<WavWriter<BufWriter<File>>> {
    if path.exists() {
        let writer = WavWriter::append(path)?;
        if writer.spec().sample_rate != sample_rate {
            warn!(
                "{} is {}Hz, appending {}Hz audio",
                path.display(),
                writer.spec().sample_rate,
                sample_rate
            );
        }
        return Ok(writer);
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    WavWriter::create(path, spec)
}

struct LoopingCapture {
    pcm: Bytes,
    position: usize,
}

impl CaptureStream for LoopingCapture {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        // Whole samples only
        let want = buf.len() & !1;
        let mut filled = 0;

        while filled < want {
            if self.position >= self.pcm.len() {
                self.position = 0;
            }
            let n = (want - filled).min(self.pcm.len() - self.position);
            buf[filled..filled + n].copy_from_slice(&self.pcm[self.position..self.position + n]);
            filled += n;
            self.position += n;
        }

        Ok(filled)
    }
}

struct WavSink {
    writer: WavWriter<BufWriter<File>>,
}

impl PlaybackSink for WavSink {
    fn write(&mut self, pcm: &[u8]) -> Result<()> {
        for sample in pcm.chunks_exact(2) {
            self.writer
                .write_sample(i16::from_le_bytes([sample[0], sample[1]]))
                .map_err(|e| IntercomError::AudioIo {
                    message: e.to_string(),
                })?;
        }

        self.writer.flush().map_err(|e| IntercomError::AudioIo {
            message: e.to_string(),
        })
    }
}
