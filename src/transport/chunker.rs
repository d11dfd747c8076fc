//! Payload chunking for the size-limited bus.
//!
//! Chunks carry no sequence metadata and are never reassembled: each chunk is
//! delivered and consumed as an independent unit, so consumers must not assume
//! multi-chunk atomicity or any ordering beyond per-topic delivery order.

use bytes::Bytes;

/// Sentinel published on the mic topic when the user releases the trigger.
pub const END_MARKER: &[u8] = b"END";

/// Split `payload` into `ceil(len / max_chunk)` slices, each exactly
/// `max_chunk` bytes except possibly the last. An empty payload yields nothing.
///
/// `max_chunk` must be non-zero.
pub fn split(payload: &[u8], max_chunk: usize) -> impl Iterator<Item = &[u8]> {
    payload.chunks(max_chunk)
}

/// Same as [`split`] but produces cheap `Bytes` views sharing one allocation.
pub fn split_bytes(payload: &Bytes, max_chunk: usize) -> Vec<Bytes> {
    let mut chunks = Vec::with_capacity(payload.len().div_ceil(max_chunk.max(1)));
    let mut start = 0;
    while start < payload.len() {
        let end = (start + max_chunk).min(payload.len());
        chunks.push(payload.slice(start..end));
        start = end;
    }
    chunks
}

/// What arrived on the mic topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MicMessage {
    /// One captured audio frame
    Audio(Bytes),
    /// The user finished speaking
    EndOfTurn,
}

impl MicMessage {
    pub fn parse(payload: Bytes) -> Self {
        if payload.as_ref() == END_MARKER {
            MicMessage::EndOfTurn
        } else {
            MicMessage::Audio(payload)
        }
    }

    pub fn into_payload(self) -> Bytes {
        match self {
            MicMessage::Audio(bytes) => bytes,
            MicMessage::EndOfTurn => Bytes::from_static(END_MARKER),
        }
    }
}
