// Shared test doubles for integration tests
//
// Not every test file uses every helper.
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use loqa_intercom::device::{AudioPeripherals, CaptureStream, PlaybackSink};
use loqa_intercom::error::{IntercomError, Result};
use loqa_intercom::server::{ChatBackend, ChatDelta, ChatStream, RecognitionSession, SynthesisEvent, Synthesizer};
use loqa_intercom::transport::{BusSubscription, MemoryBus, MessageBus};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Poll `condition` every few milliseconds until it holds or `limit` passes.
pub async fn wait_until<F>(limit: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ============================================================================
// Peripherals
// ============================================================================

/// Shared record of everything the mock peripherals and bus observed
#[derive(Default)]
pub struct PeripheralLog {
    pub events: Vec<String>,
    pub input_open: bool,
    pub output_open: bool,
    /// Times input and output were held together
    pub violations: usize,
    pub fail_input: bool,
    pub fail_output: bool,
    /// Number of upcoming capture reads that fail
    pub fail_reads: usize,
    pub played: Vec<Bytes>,
}

pub type SharedLog = Arc<Mutex<PeripheralLog>>;

pub fn shared_log() -> SharedLog {
    Arc::new(Mutex::new(PeripheralLog::default()))
}

pub fn events(log: &SharedLog) -> Vec<String> {
    log.lock().unwrap().events.clone()
}

/// Peripherals that count any moment where input and output are both held
pub struct MockPeripherals {
    log: SharedLog,
    fill: u8,
}

impl MockPeripherals {
    pub fn new(log: SharedLog) -> Self {
        Self { log, fill: 0x11 }
    }
}

impl AudioPeripherals for MockPeripherals {
    fn open_input(&mut self, _sample_rate: u32) -> Result<Box<dyn CaptureStream>> {
        let mut log = self.log.lock().unwrap();
        if log.fail_input {
            return Err(IntercomError::Peripheral {
                role: "input",
                message: "mock failure".to_string(),
            });
        }
        if log.output_open {
            log.violations += 1;
        }
        log.input_open = true;
        log.events.push("open_input".to_string());

        Ok(Box::new(MockCapture {
            log: self.log.clone(),
            fill: self.fill,
        }))
    }

    fn open_output(&mut self, _sample_rate: u32) -> Result<Box<dyn PlaybackSink>> {
        let mut log = self.log.lock().unwrap();
        if log.fail_output {
            return Err(IntercomError::Peripheral {
                role: "output",
                message: "mock failure".to_string(),
            });
        }
        if log.input_open {
            log.violations += 1;
        }
        log.output_open = true;
        log.events.push("open_output".to_string());

        Ok(Box::new(MockSink {
            log: self.log.clone(),
        }))
    }

    fn reclaim(&mut self) {
        self.log.lock().unwrap().events.push("reclaim".to_string());
    }

    fn name(&self) -> &str {
        "mock"
    }
}

struct MockCapture {
    log: SharedLog,
    fill: u8,
}

impl CaptureStream for MockCapture {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut log = self.log.lock().unwrap();
        if log.fail_reads > 0 {
            log.fail_reads -= 1;
            return Err(IntercomError::AudioIo {
                message: "mock read overrun".to_string(),
            });
        }

        buf.fill(self.fill);
        Ok(buf.len())
    }
}

impl Drop for MockCapture {
    fn drop(&mut self) {
        let mut log = self.log.lock().unwrap();
        log.input_open = false;
        log.events.push("close_input".to_string());
    }
}

struct MockSink {
    log: SharedLog,
}

impl PlaybackSink for MockSink {
    fn write(&mut self, pcm: &[u8]) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .played
            .push(Bytes::copy_from_slice(pcm));
        Ok(())
    }
}

impl Drop for MockSink {
    fn drop(&mut self) {
        let mut log = self.log.lock().unwrap();
        log.output_open = false;
        log.events.push("close_output".to_string());
    }
}

/// Memory bus that also writes `publish:<topic>` into the peripheral log,
/// so publish order can be checked against peripheral transitions.
pub struct RecordingBus {
    pub inner: MemoryBus,
    log: SharedLog,
}

impl RecordingBus {
    pub fn new(log: SharedLog) -> Self {
        Self {
            inner: MemoryBus::new(),
            log,
        }
    }
}

#[async_trait]
impl MessageBus for RecordingBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .events
            .push(format!("publish:{}", topic));
        self.inner.publish(topic, payload).await
    }

    async fn subscribe(&self, topic: &str) -> Result<BusSubscription> {
        self.inner.subscribe(topic).await
    }

    fn name(&self) -> &str {
        "recording"
    }
}

// ============================================================================
// Backends
// ============================================================================

/// Recognizer returning scripted results, one per utterance
pub struct ScriptedRecognizer {
    results: VecDeque<Result<Option<String>>>,
    fed: Vec<u8>,
    pub utterances: Arc<Mutex<Vec<Vec<u8>>>>,
    pub resets: Arc<AtomicUsize>,
}

impl ScriptedRecognizer {
    pub fn new(results: Vec<Result<Option<String>>>) -> Self {
        Self {
            results: results.into(),
            fed: Vec::new(),
            utterances: Arc::new(Mutex::new(Vec::new())),
            resets: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl RecognitionSession for ScriptedRecognizer {
    async fn feed(&mut self, audio: &[u8]) -> Result<()> {
        self.fed.extend_from_slice(audio);
        Ok(())
    }

    async fn finish(&mut self) -> Result<Option<String>> {
        let audio = std::mem::take(&mut self.fed);
        self.utterances.lock().unwrap().push(audio);
        self.results
            .pop_front()
            .unwrap_or_else(|| Ok(Some("hello".to_string())))
    }

    fn reset(&mut self) {
        self.fed.clear();
        self.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub fn answer(text: &str) -> Result<ChatDelta> {
    Ok(ChatDelta {
        answer: Some(text.to_string()),
        conversation_id: None,
    })
}

pub fn conversation(id: &str) -> Result<ChatDelta> {
    Ok(ChatDelta {
        answer: None,
        conversation_id: Some(id.to_string()),
    })
}

/// Chat backend replaying one scripted delta list per request
#[derive(Default)]
pub struct ScriptedChat {
    replies: Mutex<VecDeque<Vec<Result<ChatDelta>>>>,
    /// (query, conversation id) of every request
    pub requests: Mutex<Vec<(String, Option<String>)>>,
}

impl ScriptedChat {
    pub fn new(replies: Vec<Vec<Result<ChatDelta>>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<(String, Option<String>)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatBackend for ScriptedChat {
    async fn stream_reply(&self, query: &str, conversation_id: Option<&str>) -> Result<ChatStream> {
        self.requests
            .lock()
            .unwrap()
            .push((query.to_string(), conversation_id.map(str::to_string)));

        let reply = self.replies.lock().unwrap().pop_front().unwrap_or_default();
        Ok(Box::pin(futures::stream::iter(reply)))
    }
}

/// Synthesizer whose "audio" is the UTF-8 text itself, split into `chunk` sized pieces
pub struct EchoSynthesizer {
    chunk: usize,
    /// Fail after the first chunk when the text equals this
    pub fail_on: Option<String>,
    pub spoken: Mutex<Vec<String>>,
    pub resets: AtomicUsize,
}

impl EchoSynthesizer {
    pub fn new(chunk: usize) -> Self {
        Self {
            chunk,
            fail_on: None,
            spoken: Mutex::new(Vec::new()),
            resets: AtomicUsize::new(0),
        }
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

#[async_trait]
impl Synthesizer for EchoSynthesizer {
    async fn synthesize(&self, text: &str, events: mpsc::Sender<SynthesisEvent>) -> Result<()> {
        self.spoken.lock().unwrap().push(text.to_string());

        for piece in text.as_bytes().chunks(self.chunk) {
            let _ = events
                .send(SynthesisEvent::AudioChunk(Bytes::copy_from_slice(piece)))
                .await;

            if self.fail_on.as_deref() == Some(text) {
                return Err(IntercomError::Synthesis {
                    message: "scripted failure".to_string(),
                });
            }
        }

        let _ = events.send(SynthesisEvent::Complete).await;
        Ok(())
    }

    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn name(&self) -> &str {
        "echo"
    }
}
