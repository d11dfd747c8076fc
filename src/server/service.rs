use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::accumulator::{AccumulatorConfig, AccumulatorHandle, UtteranceAccumulator};
use super::chat::{ChatBackend, DifyChatClient};
use super::dispatcher::{DispatcherStats, OutboundDispatcher};
use super::pipeline::{PipelineConfig, RecognitionStage, ResponseStage};
use super::recognition::{AzureRecognizer, RecognitionSession};
use super::session::SessionId;
use super::synthesis::{AzureSynthesizer, Synthesizer};
use crate::config::Config;
use crate::error::{IntercomError, Result};
use crate::transport::{BusSubscription, MessageBus, MicMessage};

/// Capacity of the utterance and turn-event channels between stages
const STAGE_CHANNEL_CAPACITY: usize = 16;

/// Speech and chat collaborators used by the server
pub struct ServerBackends {
    pub recognizer: Box<dyn RecognitionSession>,
    pub chat: Arc<dyn ChatBackend>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

impl ServerBackends {
    /// Azure Speech for recognition and synthesis, Dify for chat
    pub fn from_config(config: &Config) -> Self {
        Self {
            recognizer: Box::new(AzureRecognizer::new(
                &config.backends,
                config.device.input_sample_rate,
            )),
            chat: Arc::new(DifyChatClient::new(&config.backends)),
            synthesizer: Arc::new(AzureSynthesizer::new(&config.backends)),
        }
    }
}

/// Server role: mic topic in, synthesized audio and robot commands out.
pub struct IntercomServer {
    accumulator: AccumulatorHandle,
    inbound: JoinHandle<()>,
    stages: Vec<(&'static str, JoinHandle<()>)>,
    dispatcher: JoinHandle<DispatcherStats>,
}

impl IntercomServer {
    pub async fn start(
        config: &Config,
        bus: Arc<dyn MessageBus>,
        backends: ServerBackends,
    ) -> Result<Self> {
        let subscription = bus.subscribe(&config.bus.mic_topic).await?;

        let (outbound, dispatcher) =
            OutboundDispatcher::spawn(bus.clone(), config.bus.max_chunk_bytes);

        let (utterance_tx, utterance_rx) = mpsc::channel(STAGE_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(STAGE_CHANNEL_CAPACITY);

        let (accumulator, accumulator_task) =
            UtteranceAccumulator::spawn(AccumulatorConfig::from(&config.server), utterance_tx);

        let recognition = RecognitionStage::new(backends.recognizer).spawn(utterance_rx, event_tx);
        let response = ResponseStage::new(
            backends.chat,
            backends.synthesizer,
            outbound,
            PipelineConfig::from(config),
        )
        .spawn(event_rx);

        let inbound = tokio::spawn(Self::route_inbound(subscription, accumulator.clone()));

        info!(
            "Intercom server listening on {} via {} (audio -> {}, commands -> {})",
            config.bus.mic_topic,
            bus.name(),
            config.bus.audio_topic,
            config.bus.robot_topic
        );

        Ok(Self {
            accumulator,
            inbound,
            stages: vec![
                ("utterance accumulator", accumulator_task),
                ("recognition stage", recognition),
                ("response stage", response),
            ],
            dispatcher,
        })
    }

    /// Handle for inspecting or cancelling sessions
    pub fn accumulator(&self) -> AccumulatorHandle {
        self.accumulator.clone()
    }

    async fn route_inbound(mut subscription: BusSubscription, accumulator: AccumulatorHandle) {
        while let Some(message) = subscription.next().await {
            let session = SessionId::new(message.topic);
            let message = MicMessage::parse(message.payload);

            if let MicMessage::EndOfTurn = message {
                debug!("End of turn from {}", session);
            }

            if let Err(e) = accumulator.dispatch(session, message) {
                warn!("Dropping inbound mic message: {}", e);
                break;
            }
        }

        info!("Mic subscription closed");
    }

    /// Stop taking mic input, let in-flight turns drain, and join every stage.
    ///
    /// Other clones of the accumulator handle (such as the HTTP state) must be
    /// dropped first or the accumulator never finishes.
    pub async fn shutdown(self) -> Result<DispatcherStats> {
        self.inbound.abort();
        let _ = self.inbound.await;
        drop(self.accumulator);

        for (component, task) in self.stages {
            task.await
                .map_err(|_| IntercomError::Shutdown { component })?;
        }

        let stats = self.dispatcher.await.map_err(|_| IntercomError::Shutdown {
            component: "outbound dispatcher",
        })?;

        info!("Intercom server stopped");
        Ok(stats)
    }
}
