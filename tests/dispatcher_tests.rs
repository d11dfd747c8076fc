// Integration tests for outbound publication and synthesis re-buffering

use anyhow::Result;
use bytes::Bytes;
use loqa_intercom::server::{OutboundDispatcher, SynthesisBuffer, SynthesisEvent};
use loqa_intercom::MemoryBus;
use std::sync::Arc;
use tokio::sync::mpsc;

#[tokio::test]
async fn test_dispatcher_chunks_large_payloads() -> Result<()> {
    let bus = Arc::new(MemoryBus::new());
    let (handle, task) = OutboundDispatcher::spawn(bus.clone(), 20_000);

    let payload: Vec<u8> = (0..45_000u32).map(|i| (i % 256) as u8).collect();
    handle.publish("audio", Bytes::from(payload.clone()))?;
    drop(handle);

    let stats = task.await?;
    assert_eq!(stats.messages, 1);
    assert_eq!(stats.chunks, 3);

    let published = bus.published("audio");
    let sizes: Vec<usize> = published.iter().map(Bytes::len).collect();
    assert_eq!(sizes, vec![20_000, 20_000, 5_000]);
    assert_eq!(published.concat(), payload);

    Ok(())
}

#[tokio::test]
async fn test_dispatcher_survives_publish_failure() -> Result<()> {
    let bus = Arc::new(MemoryBus::new());
    bus.fail_next_publishes(1);
    let (handle, task) = OutboundDispatcher::spawn(bus.clone(), 1_000);

    handle.publish("audio", Bytes::from_static(b"lost"))?;
    handle.publish("audio", Bytes::new())?;
    handle.publish("robot", Bytes::from_static(b"stop"))?;
    drop(handle);

    let stats = task.await?;
    assert_eq!(stats.failures, 1);
    assert_eq!(stats.messages, 2, "empty payloads are skipped");

    assert!(bus.published("audio").is_empty());
    assert_eq!(bus.published("robot"), vec![Bytes::from_static(b"stop")]);

    Ok(())
}

#[tokio::test]
async fn test_synthesis_buffer_flushes_on_threshold_crossing_chunk() -> Result<()> {
    let bus = Arc::new(MemoryBus::new());
    let (handle, task) = OutboundDispatcher::spawn(bus.clone(), 1_000);
    let buffer = SynthesisBuffer::new(10, "audio", handle);

    buffer.on_audio_chunk(b"aaaa")?;
    buffer.on_audio_chunk(b"bbbb")?;
    assert_eq!(buffer.pending_len(), 8);

    // Crosses 10 mid-chunk: everything up to and including this chunk goes out
    buffer.on_audio_chunk(b"cccc")?;
    assert_eq!(buffer.pending_len(), 0);

    buffer.on_audio_chunk(b"ddd")?;
    buffer.on_synthesis_complete()?;
    // A second completion has nothing left to flush
    buffer.on_synthesis_complete()?;
    drop(buffer);

    task.await?;

    assert_eq!(
        bus.published("audio"),
        vec![
            Bytes::from_static(b"aaaabbbbcccc"),
            Bytes::from_static(b"ddd"),
        ]
    );

    Ok(())
}

#[tokio::test]
async fn test_synthesis_buffer_consumes_event_channel() -> Result<()> {
    let bus = Arc::new(MemoryBus::new());
    let (handle, task) = OutboundDispatcher::spawn(bus.clone(), 1_000);
    let buffer = SynthesisBuffer::new(6, "audio", handle);

    let (tx, rx) = mpsc::channel(8);
    let producer = tokio::spawn(async move {
        for piece in [&b"abc"[..], b"def", b"gh"] {
            tx.send(SynthesisEvent::AudioChunk(Bytes::from_static(piece)))
                .await
                .ok();
        }
        tx.send(SynthesisEvent::Complete).await.ok();
    });

    let received = buffer.consume(rx).await?;
    producer.await?;
    drop(buffer);
    task.await?;

    assert_eq!(received, 8);
    assert_eq!(
        bus.published("audio"),
        vec![Bytes::from_static(b"abcdef"), Bytes::from_static(b"gh")]
    );

    Ok(())
}

#[tokio::test]
async fn test_synthesis_buffer_concurrent_callbacks_publish_each_byte_once() -> Result<()> {
    let bus = Arc::new(MemoryBus::new());
    let (handle, task) = OutboundDispatcher::spawn(bus.clone(), 100_000);
    let buffer = SynthesisBuffer::new(64, "audio", handle);

    // Backend callback threads, each tagging its bytes with its own value
    std::thread::scope(|scope| {
        for tag in 1..=4u8 {
            let buffer = &buffer;
            scope.spawn(move || {
                for _ in 0..250 {
                    buffer.on_audio_chunk(&[tag; 3]).ok();
                }
            });
        }
    });
    buffer.on_synthesis_complete()?;
    drop(buffer);
    task.await?;

    let published = bus.published("audio").concat();
    assert_eq!(published.len(), 4 * 250 * 3);
    for tag in 1..=4u8 {
        assert_eq!(published.iter().filter(|&&b| b == tag).count(), 750);
    }

    Ok(())
}
