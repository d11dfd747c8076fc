// Integration tests for the utterance accumulator
//
// All timing runs on tokio's paused clock: the inactivity timeout is 2s of
// virtual time and the tests observe exactly when flushes happen.

use anyhow::Result;
use bytes::Bytes;
use loqa_intercom::server::{
    AccumulatorConfig, AccumulatorState, FlushReason, SessionId, UtteranceAccumulator,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};

fn config() -> AccumulatorConfig {
    AccumulatorConfig {
        inactivity_timeout: Duration::from_secs(2),
        min_frames: 2,
    }
}

fn frame(tag: &'static [u8]) -> Bytes {
    Bytes::from_static(tag)
}

#[tokio::test(start_paused = true)]
async fn test_end_marker_flushes_frames_in_order() -> Result<()> {
    let (tx, mut rx) = mpsc::channel(8);
    let (handle, _task) = UtteranceAccumulator::spawn(config(), tx);
    let session = SessionId::new("mic");

    for tag in [&b"one"[..], b"two", b"three"] {
        handle.frame(session.clone(), Bytes::from_static(tag))?;
    }
    handle.end_of_turn(session.clone())?;

    let utterance = rx.recv().await.expect("no utterance flushed");
    assert_eq!(utterance.session_id, session);
    assert_eq!(utterance.reason, FlushReason::EndMarker);
    assert_eq!(
        utterance.frames,
        vec![frame(b"one"), frame(b"two"), frame(b"three")]
    );
    assert_eq!(utterance.byte_len(), 11);

    // The end marker cancelled the timer: no second flush
    sleep(Duration::from_secs(10)).await;
    assert!(rx.try_recv().is_err());

    let stats = handle.snapshot().await?;
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].state, AccumulatorState::Idle);
    assert_eq!(stats[0].utterances_flushed, 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_inactivity_flush_at_last_frame_plus_timeout() -> Result<()> {
    let start = Instant::now();
    let (tx, mut rx) = mpsc::channel(8);
    let (handle, _task) = UtteranceAccumulator::spawn(config(), tx);
    let session = SessionId::new("mic");

    // Frames at 0ms, 500ms, 1000ms
    handle.frame(session.clone(), frame(b"a"))?;
    sleep(Duration::from_millis(500)).await;
    handle.frame(session.clone(), frame(b"b"))?;
    sleep(Duration::from_millis(500)).await;
    handle.frame(session.clone(), frame(b"c"))?;

    // Not before last frame + 2s
    sleep(Duration::from_millis(1990)).await;
    assert!(rx.try_recv().is_err(), "flushed before the inactivity threshold");

    let utterance = rx.recv().await.expect("no utterance flushed");
    let elapsed = Instant::now() - start;

    assert_eq!(utterance.reason, FlushReason::Inactivity);
    assert_eq!(utterance.frames.len(), 3);
    assert!(
        elapsed >= Duration::from_millis(3000) && elapsed < Duration::from_millis(3050),
        "flushed at {:?}",
        elapsed
    );

    sleep(Duration::from_secs(10)).await;
    assert!(rx.try_recv().is_err(), "exactly one flush expected");

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_single_frame_is_discarded_as_noise() -> Result<()> {
    let (tx, mut rx) = mpsc::channel(8);
    let (handle, _task) = UtteranceAccumulator::spawn(config(), tx);
    let session = SessionId::new("mic");

    handle.frame(session.clone(), frame(b"click"))?;
    handle.end_of_turn(session.clone())?;

    // A lone inactivity flush is discarded too
    handle.frame(session.clone(), frame(b"pop"))?;
    sleep(Duration::from_secs(5)).await;

    assert!(rx.try_recv().is_err());

    let stats = handle.snapshot().await?;
    assert_eq!(stats[0].utterances_discarded, 2);
    assert_eq!(stats[0].utterances_flushed, 0);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_end_marker_without_frames_is_ignored() -> Result<()> {
    let (tx, mut rx) = mpsc::channel(8);
    let (handle, _task) = UtteranceAccumulator::spawn(config(), tx);

    handle.end_of_turn(SessionId::new("mic"))?;
    sleep(Duration::from_secs(5)).await;

    assert!(rx.try_recv().is_err());
    assert!(handle.snapshot().await?.is_empty());

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_cancel_drops_turn_and_timer() -> Result<()> {
    let (tx, mut rx) = mpsc::channel(8);
    let (handle, _task) = UtteranceAccumulator::spawn(config(), tx);
    let session = SessionId::new("mic");

    handle.frame(session.clone(), frame(b"a"))?;
    handle.frame(session.clone(), frame(b"b"))?;
    handle.cancel(session.clone())?;

    sleep(Duration::from_secs(5)).await;
    assert!(rx.try_recv().is_err());

    let stats = handle.snapshot().await?;
    assert_eq!(stats[0].buffered_frames, 0);
    assert_eq!(stats[0].state, AccumulatorState::Idle);

    // The next turn starts clean
    handle.frame(session.clone(), frame(b"c"))?;
    handle.frame(session.clone(), frame(b"d"))?;
    handle.end_of_turn(session.clone())?;

    let utterance = rx.recv().await.expect("no utterance flushed");
    assert_eq!(utterance.frames, vec![frame(b"c"), frame(b"d")]);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_sessions_accumulate_independently() -> Result<()> {
    let (tx, mut rx) = mpsc::channel(8);
    let (handle, _task) = UtteranceAccumulator::spawn(config(), tx);
    let kitchen = SessionId::new("mic.kitchen");
    let garage = SessionId::new("mic.garage");

    handle.frame(kitchen.clone(), frame(b"k1"))?;
    handle.frame(garage.clone(), frame(b"g1"))?;
    handle.frame(kitchen.clone(), frame(b"k2"))?;
    handle.frame(garage.clone(), frame(b"g2"))?;
    handle.end_of_turn(garage.clone())?;

    let first = rx.recv().await.expect("no utterance flushed");
    assert_eq!(first.session_id, garage);
    assert_eq!(first.frames, vec![frame(b"g1"), frame(b"g2")]);

    // Kitchen never sent END and flushes on inactivity
    let second = rx.recv().await.expect("no utterance flushed");
    assert_eq!(second.session_id, kitchen);
    assert_eq!(second.reason, FlushReason::Inactivity);
    assert_eq!(second.frames, vec![frame(b"k1"), frame(b"k2")]);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_conversation_token_survives_turns() -> Result<()> {
    let (tx, mut rx) = mpsc::channel(8);
    let (handle, _task) = UtteranceAccumulator::spawn(config(), tx);
    let session = SessionId::new("mic");

    for _ in 0..2 {
        handle.frame(session.clone(), frame(b"a"))?;
        handle.frame(session.clone(), frame(b"b"))?;
        handle.end_of_turn(session.clone())?;
    }

    let first = rx.recv().await.expect("no utterance flushed");
    assert!(first.conversation.set_once("c-1".to_string()));

    let second = rx.recv().await.expect("no utterance flushed");
    assert_eq!(second.conversation.get(), Some("c-1"));
    assert!(!second.conversation.set_once("c-2".to_string()));
    assert_eq!(second.conversation.get(), Some("c-1"));

    let stats = handle.snapshot().await?;
    assert_eq!(stats[0].conversation_id.as_deref(), Some("c-1"));

    Ok(())
}
