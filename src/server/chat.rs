//! Streaming chat-completion backend.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::BackendsConfig;
use crate::error::{IntercomError, Result};

/// One increment of a streamed reply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatDelta {
    /// Next piece of answer text
    pub answer: Option<String>,
    /// Conversation token echoed by the backend
    pub conversation_id: Option<String>,
}

/// Reply stream; ends when the backend finishes the answer
pub type ChatStream = BoxStream<'static, Result<ChatDelta>>;

#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn stream_reply(&self, query: &str, conversation_id: Option<&str>) -> Result<ChatStream>;
}

#[derive(Debug, Deserialize)]
struct DifyEvent {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Dify `chat-messages` client in streaming response mode
pub struct DifyChatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    user_id: String,
}

impl DifyChatClient {
    pub fn new(config: &BackendsConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.chat_base_url.trim_end_matches('/').to_string(),
            api_key: config.chat_api_key.clone(),
            user_id: config.chat_user_id.clone(),
        }
    }
}

#[async_trait]
impl ChatBackend for DifyChatClient {
    async fn stream_reply(&self, query: &str, conversation_id: Option<&str>) -> Result<ChatStream> {
        let url = format!("{}/chat-messages", self.base_url);

        debug!(query_len = query.len(), ?conversation_id, "Starting chat stream");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "inputs": {},
                "query": query,
                "user": self.user_id,
                "response_mode": "streaming",
                "conversation_id": conversation_id,
            }))
            .send()
            .await
            .map_err(|e| IntercomError::Chat {
                message: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(IntercomError::Chat {
                message: format!("HTTP {status}: {body}"),
            });
        }

        let lines = data_lines(resp.bytes_stream());
        let deltas = lines.filter_map(|line| async move {
            match line {
                Ok(line) => parse_data_line(&line),
                Err(e) => Some(Err(e)),
            }
        });

        Ok(Box::pin(deltas))
    }
}

/// Split a byte stream into newline-terminated text lines
fn data_lines<S>(bytes: S) -> BoxStream<'static, Result<String>>
where
    S: futures::Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
{
    // Bytes, not text: a multi-byte character may straddle two chunks.
    let state = (Box::pin(bytes), Vec::<u8>::new(), false);
    let stream = futures::stream::unfold(state, |(mut bytes, mut buffer, mut done)| async move {
        loop {
            if let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                let raw: Vec<u8> = buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&raw[..pos])
                    .trim_end_matches('\r')
                    .to_string();
                return Some((Ok(line), (bytes, buffer, done)));
            }

            if done {
                if buffer.is_empty() {
                    return None;
                }
                let line = String::from_utf8_lossy(&std::mem::take(&mut buffer)).into_owned();
                return Some((Ok(line), (bytes, buffer, done)));
            }

            match bytes.next().await {
                Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    done = true;
                    buffer.clear();
                    let err = IntercomError::Chat {
                        message: format!("stream error: {e}"),
                    };
                    return Some((Err(err), (bytes, buffer, done)));
                }
                None => done = true,
            }
        }
    });

    Box::pin(stream)
}

/// Interpret one SSE line. Non-data lines and undecodable payloads yield `None`.
fn parse_data_line(line: &str) -> Option<Result<ChatDelta>> {
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() {
        return None;
    }

    let event: DifyEvent = match serde_json::from_str(data) {
        Ok(event) => event,
        Err(e) => {
            warn!("Error decoding chat event: {} ({})", data, e);
            return None;
        }
    };

    if event.event.as_deref() == Some("error") {
        return Some(Err(IntercomError::Chat {
            message: event.message.unwrap_or_else(|| "unknown error".to_string()),
        }));
    }

    if event.answer.is_none() && event.conversation_id.is_none() {
        return None;
    }

    Some(Ok(ChatDelta {
        answer: event.answer,
        conversation_id: event.conversation_id,
    }))
}
