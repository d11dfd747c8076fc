//! Device task model.
//!
//! The edge interrupt only records the raw line level. A watcher task
//! debounces it and sends transition requests to [`DeviceRuntime`], the one
//! task that owns the controller and therefore every peripheral handle.
//! Inbound audio is queued by a separate subscription task.

use bytes::Bytes;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::controller::{DeviceAudioController, DeviceState};
use super::playback::PlaybackQueue;
use crate::config::Config;
use crate::error::{ErrorClass, IntercomError, Result};
use crate::transport::{publish_chunked, BusSubscription, MessageBus};

/// Pending transition requests between the edge watcher and the runtime
const EDGE_REQUEST_CAPACITY: usize = 4;

/// How often an Idle runtime tries to get the output peripheral back
const OUTPUT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Interrupt-side view of the push-to-talk line. Cheap to clone, never blocks.
#[derive(Clone)]
pub struct EdgeTrigger {
    level: Arc<watch::Sender<bool>>,
}

impl EdgeTrigger {
    /// Create a trigger with the line released
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { level: Arc::new(tx) }, rx)
    }

    /// Record the raw line level. May be called at any time, bounces included.
    pub fn set_level(&self, pressed: bool) {
        self.level.send_replace(pressed);
    }
}

/// Debounce raw levels into committed transitions.
///
/// Each change starts a `debounce` wait after which the level is read once;
/// a level equal to the last committed one is a bounce and produces nothing.
/// The line is assumed released when the watcher starts.
pub async fn watch_edges(
    mut level: watch::Receiver<bool>,
    debounce: Duration,
    requests: mpsc::Sender<bool>,
) {
    let mut committed = false;

    while level.changed().await.is_ok() {
        sleep(debounce).await;

        let pressed = *level.borrow_and_update();
        if pressed == committed {
            debug!("Edge bounce ignored (level {})", pressed);
            continue;
        }

        committed = pressed;
        if requests.send(pressed).await.is_err() {
            break;
        }
    }

    debug!("Edge watcher stopped");
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub mic_topic: String,
    pub audio_topic: String,
    pub max_chunk_bytes: usize,
    pub read_buffer_bytes: usize,
    pub debounce: Duration,
    pub capture_interval: Duration,
    pub error_backoff: Duration,
}

impl From<&Config> for RuntimeConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            mic_topic: cfg.bus.mic_topic.clone(),
            audio_topic: cfg.bus.audio_topic.clone(),
            max_chunk_bytes: cfg.bus.max_chunk_bytes,
            read_buffer_bytes: cfg.device.read_buffer_bytes,
            debounce: cfg.device.debounce(),
            capture_interval: cfg.device.capture_interval(),
            error_backoff: cfg.device.error_backoff(),
        }
    }
}

/// Counters kept by the runtime for logging
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    pub frames_published: usize,
    pub capture_errors: usize,
    pub segments_played: usize,
    pub playback_errors: usize,
    pub failed_transitions: usize,
}

pub struct DeviceRuntime {
    controller: DeviceAudioController,
    bus: Arc<dyn MessageBus>,
    queue: Arc<PlaybackQueue>,
    config: RuntimeConfig,
    startup_sound: Option<Bytes>,
    stats: RuntimeStats,
}

impl DeviceRuntime {
    pub fn new(
        controller: DeviceAudioController,
        bus: Arc<dyn MessageBus>,
        queue: Arc<PlaybackQueue>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            controller,
            bus,
            queue,
            config,
            startup_sound: None,
            stats: RuntimeStats::default(),
        }
    }

    /// PCM played once the output peripheral is first acquired
    pub fn with_startup_sound(mut self, pcm: Bytes) -> Self {
        self.startup_sound = Some(pcm);
        self
    }

    pub fn stats(&self) -> RuntimeStats {
        self.stats
    }

    pub fn state(&self) -> DeviceState {
        self.controller.state()
    }

    /// Run until the trigger goes away, then return the counters.
    ///
    /// Errors are handled by class: transient ones back off, turn-fatal ones
    /// abandon the turn. Only an unrecoverable error is returned, which means
    /// the device must be restarted.
    pub async fn run(mut self, level: watch::Receiver<bool>) -> Result<RuntimeStats> {
        let subscription = self.bus.subscribe(&self.config.audio_topic).await?;
        let mut inbound = tokio::spawn(route_audio(
            subscription,
            self.config.audio_topic.clone(),
            self.queue.clone(),
        ));

        let (request_tx, mut requests) = mpsc::channel(EDGE_REQUEST_CAPACITY);
        let watcher = tokio::spawn(watch_edges(level, self.config.debounce, request_tx));

        let result = self.event_loop(&mut requests, &mut inbound).await;

        watcher.abort();
        inbound.abort();

        info!(
            "Device runtime stopped ({} frames published, {} segments played)",
            self.stats.frames_published, self.stats.segments_played
        );

        result.map(|()| self.stats)
    }

    async fn event_loop(
        &mut self,
        requests: &mut mpsc::Receiver<bool>,
        inbound: &mut JoinHandle<()>,
    ) -> Result<()> {
        if let Err(e) = self.controller.start() {
            self.absorb("Output acquisition", e).await?;
        }

        if let Some(pcm) = self.startup_sound.take() {
            self.notify(&pcm);
        }

        let mut buf = vec![0u8; self.config.read_buffer_bytes];
        let mut capture_tick = interval(self.config.capture_interval);
        capture_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut output_retry = interval(OUTPUT_RETRY_INTERVAL);
        output_retry.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let queue = self.queue.clone();

        loop {
            let state = self.controller.state();

            tokio::select! {
                biased;

                request = requests.recv() => match request {
                    Some(pressed) => self.transition(pressed).await?,
                    None => {
                        info!("Edge trigger closed");
                        return Ok(());
                    }
                },

                _ = &mut *inbound => {
                    return Err(IntercomError::Shutdown { component: "audio subscription" });
                }

                _ = capture_tick.tick(), if state == DeviceState::Recording => {
                    self.capture_once(&mut buf).await?;
                }

                segment = queue.pop(), if state == DeviceState::Playing => {
                    self.play_once(segment).await?;
                }

                _ = output_retry.tick(), if state == DeviceState::Idle => {
                    if self.controller.settle().is_ok() {
                        info!("Output peripheral reacquired");
                    }
                }
            }
        }
    }

    async fn transition(&mut self, pressed: bool) -> Result<()> {
        match self.controller.on_edge(pressed).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.stats.failed_transitions += 1;
                let context = if pressed { "Press" } else { "Release" };
                self.absorb(context, e).await
            }
        }
    }

    /// Read one buffer and publish it on the mic topic.
    pub async fn capture_once(&mut self, buf: &mut [u8]) -> Result<()> {
        let n = match self.controller.capture(buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) => {
                self.stats.capture_errors += 1;
                return self.absorb("Capture", e).await;
            }
        };

        let frame = Bytes::copy_from_slice(&buf[..n]);
        let published = publish_chunked(
            self.bus.as_ref(),
            &self.config.mic_topic,
            &frame,
            self.config.max_chunk_bytes,
        )
        .await;

        match published {
            Ok(_) => {
                self.stats.frames_published += 1;
                debug!("Published audio frame to {} (bytes={})", self.config.mic_topic, n);
                Ok(())
            }
            Err(e) => {
                self.stats.capture_errors += 1;
                self.absorb("Publish", e).await
            }
        }
    }

    /// Write one segment to the speaker.
    pub async fn play_once(&mut self, segment: Bytes) -> Result<()> {
        match self.controller.play(&segment) {
            Ok(()) => {
                self.stats.segments_played += 1;
                debug!("Played {} bytes", segment.len());
                Ok(())
            }
            Err(e) => {
                self.stats.playback_errors += 1;
                self.absorb("Playback", e).await
            }
        }
    }

    /// Handle a loop error as its class asks. Only unrecoverable errors escape.
    async fn absorb(&mut self, context: &str, e: IntercomError) -> Result<()> {
        match e.class() {
            ErrorClass::Transient => {
                warn!("{} failed: {}", context, e);
                sleep(self.config.error_backoff).await;
            }
            ErrorClass::TurnFatal => {
                error!("{} failed, abandoning turn: {}", context, e);
                if self.controller.settle().is_err() {
                    warn!("No output peripheral, retrying every {:?}", OUTPUT_RETRY_INTERVAL);
                }
            }
            ErrorClass::BackendReset => {
                warn!("{} failed: {}", context, e);
            }
            ErrorClass::Unrecoverable => return Err(e),
        }
        Ok(())
    }

    fn notify(&mut self, pcm: &Bytes) {
        if self.controller.state() != DeviceState::Playing {
            debug!("Skipping notification while {:?}", self.controller.state());
            return;
        }
        if let Err(e) = self.controller.play(pcm) {
            warn!("Failed to play notification: {}", e);
        }
    }
}

/// Queue payloads whose subject is exactly `audio_topic`.
async fn route_audio(mut subscription: BusSubscription, audio_topic: String, queue: Arc<PlaybackQueue>) {
    while let Some(message) = subscription.next().await {
        if message.topic != audio_topic {
            debug!("Ignoring message on {}", message.topic);
            continue;
        }

        if message.payload.is_empty() {
            continue;
        }

        if let Some(evicted) = queue.push(message.payload) {
            warn!(
                "Playback queue full, dropped oldest segment ({} bytes)",
                evicted.len()
            );
        }
    }

    info!("Audio subscription closed");
}
