//! Arbitration of the single device audio path between capture and playback.

use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::peripheral::{AudioPeripherals, CaptureStream, PlaybackSink};
use crate::error::{IntercomError, Result};
use crate::transport::{MessageBus, MicMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// Neither peripheral held
    Idle,
    /// Input held, frames are captured
    Recording,
    /// Output held, queued audio is played
    Playing,
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub mic_topic: String,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
}

/// Owns the peripheral handles; at most one of input and output is held.
pub struct DeviceAudioController {
    peripherals: Box<dyn AudioPeripherals>,
    bus: Arc<dyn MessageBus>,
    config: ControllerConfig,
    state: DeviceState,
    input: Option<Box<dyn CaptureStream>>,
    output: Option<Box<dyn PlaybackSink>>,
}

impl DeviceAudioController {
    pub fn new(
        peripherals: Box<dyn AudioPeripherals>,
        bus: Arc<dyn MessageBus>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            peripherals,
            bus,
            config,
            state: DeviceState::Idle,
            input: None,
            output: None,
        }
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Acquire the output peripheral so queued audio can play before the first press.
    pub fn start(&mut self) -> Result<()> {
        if self.state != DeviceState::Idle {
            return Ok(());
        }

        self.acquire_output()?;
        info!(
            "Audio controller ready on {} (output {}Hz)",
            self.peripherals.name(),
            self.config.output_sample_rate
        );
        Ok(())
    }

    /// Apply a debounced edge. `pressed` starts a recording; release ends it.
    ///
    /// An acquisition failure is returned and loses the turn. After a failed
    /// press the output is reacquired, so the controller is Playing again
    /// unless that fails too and it is left Idle.
    pub async fn on_edge(&mut self, pressed: bool) -> Result<()> {
        if pressed {
            self.on_press()
        } else {
            self.on_release().await
        }
    }

    fn on_press(&mut self) -> Result<()> {
        if self.state == DeviceState::Recording {
            debug!("Press while already recording");
            return Ok(());
        }

        if self.output.take().is_some() {
            debug!("Released output peripheral");
        }
        self.state = DeviceState::Idle;
        self.peripherals.reclaim();

        match self.peripherals.open_input(self.config.input_sample_rate) {
            Ok(input) => {
                self.input = Some(input);
                self.state = DeviceState::Recording;
                info!("Recording started ({}Hz)", self.config.input_sample_rate);
                Ok(())
            }
            Err(e) => {
                error!("Failed to acquire input peripheral: {}", e);
                // The turn is lost but replies can still play.
                if self.acquire_output().is_err() {
                    debug!("Output unavailable too, staying idle");
                }
                Err(e)
            }
        }
    }

    async fn on_release(&mut self) -> Result<()> {
        if self.state != DeviceState::Recording {
            debug!("Release while {:?}, ignoring", self.state);
            return Ok(());
        }

        self.input = None;
        self.state = DeviceState::Idle;
        self.peripherals.reclaim();
        info!("Recording stopped");

        // The marker goes out before the speaker is claimed.
        let marker = MicMessage::EndOfTurn.into_payload();
        if let Err(e) = self.bus.publish(&self.config.mic_topic, marker).await {
            warn!("Failed to publish end-of-turn marker: {}", e);
        }

        self.acquire_output()
    }

    /// Return to the rest state: input released, output held.
    ///
    /// Abandons a recording in progress without a turn-end marker. Retries the
    /// output acquisition when an earlier one failed.
    pub fn settle(&mut self) -> Result<()> {
        if self.input.take().is_some() {
            debug!("Released input peripheral");
            self.peripherals.reclaim();
        }

        if self.output.is_some() {
            self.state = DeviceState::Playing;
            return Ok(());
        }

        self.state = DeviceState::Idle;
        self.acquire_output()
    }

    fn acquire_output(&mut self) -> Result<()> {
        match self.peripherals.open_output(self.config.output_sample_rate) {
            Ok(output) => {
                self.output = Some(output);
                self.state = DeviceState::Playing;
                Ok(())
            }
            Err(e) => {
                error!("Failed to acquire output peripheral: {}", e);
                self.state = DeviceState::Idle;
                Err(e)
            }
        }
    }

    /// Read one buffer from the microphone. Returns 0 when not recording.
    pub fn capture(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.input.as_mut() {
            Some(input) => input.read(buf),
            None => Ok(0),
        }
    }

    /// Write one segment to the speaker.
    pub fn play(&mut self, segment: &Bytes) -> Result<()> {
        match self.output.as_mut() {
            Some(output) => output.write(segment),
            None => Err(IntercomError::AudioIo {
                message: format!("output not held while {:?}", self.state),
            }),
        }
    }
}
