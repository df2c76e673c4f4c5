mod support;

use std::sync::Arc;
use std::time::Duration;

use chainhead_core::{ConnectionState, MemoryStore};

use support::{eventually, tracker_with, MockTransport, RecordingObserver};

#[tokio::test]
async fn broken_stream_reconnects_with_growing_backoff() {
    let transport = MockTransport::new();
    let (tracker, sleeper) = tracker_with(Arc::new(MemoryStore::new()), transport.clone());
    let observer = RecordingObserver::new();
    tracker.attach(observer.clone()).await;
    tracker.start().await.unwrap();
    assert_eq!(transport.attempts(), 1);

    transport.fail_next(2);
    transport.break_stream("socket closed");

    eventually("reconnected", || {
        transport.attempts() == 4 && tracker.is_connected() && observer.connects() == 2
    })
    .await;

    let waits = sleeper.waits();
    assert_eq!(waits.len(), 3);
    assert!(waits.windows(2).all(|w| w[0] < w[1]), "waits: {waits:?}");
    assert_eq!(sleeper.resets(), 1);

    // observers see one disconnect for the outage and one connect on recovery
    assert_eq!(observer.disconnects(), 1);
    assert_eq!(observer.connects(), 2);

    transport.push(21);
    eventually("head after reconnect", || observer.heads() == vec![21]).await;
}

#[tokio::test]
async fn state_passes_through_reconnecting() {
    let transport = MockTransport::new();
    let (tracker, _) = tracker_with(Arc::new(MemoryStore::new()), transport.clone());
    tracker.start().await.unwrap();
    let mut states = tracker.watch_state();
    assert_eq!(*states.borrow_and_update(), ConnectionState::Connected);

    transport.fail_next(usize::MAX);
    transport.break_stream("node restarting");

    tokio::time::timeout(Duration::from_secs(2), states.changed())
        .await
        .expect("no state change")
        .unwrap();
    assert_eq!(*states.borrow(), ConnectionState::Reconnecting);
    assert!(!tracker.is_connected());

    tracker.stop().await;
}

#[tokio::test]
async fn stop_cancels_reconnect_loop() {
    let transport = MockTransport::new();
    let (tracker, _) = tracker_with(Arc::new(MemoryStore::new()), transport.clone());
    let observer = RecordingObserver::new();
    tracker.attach(observer.clone()).await;
    tracker.start().await.unwrap();

    transport.fail_next(usize::MAX);
    transport.break_stream("socket closed");
    eventually("retrying", || transport.attempts() >= 3).await;

    tracker.stop().await;
    eventually("disconnected", || tracker.state() == ConnectionState::Disconnected).await;

    let settled = transport.attempts();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.attempts(), settled);
    assert_eq!(tracker.state(), ConnectionState::Disconnected);
    assert_eq!(observer.disconnects(), 1);
}

#[tokio::test]
async fn tracker_restarts_after_cancelled_reconnect() {
    let transport = MockTransport::new();
    let (tracker, _) = tracker_with(Arc::new(MemoryStore::new()), transport.clone());
    let observer = RecordingObserver::new();
    tracker.attach(observer.clone()).await;
    tracker.start().await.unwrap();

    transport.fail_next(usize::MAX);
    transport.break_stream("socket closed");
    eventually("retrying", || transport.attempts() >= 2).await;
    tracker.stop().await;
    eventually("disconnected", || tracker.state() == ConnectionState::Disconnected).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    transport.fail_next(0);
    tracker.start().await.unwrap();
    assert!(tracker.is_connected());
    assert_eq!(observer.connects(), 2);
}

#[tokio::test]
async fn stop_right_after_stream_error_stays_stopped() {
    let transport = MockTransport::new();
    let (tracker, _) = tracker_with(Arc::new(MemoryStore::new()), transport.clone());
    let observer = RecordingObserver::new();
    tracker.attach(observer.clone()).await;

    for round in 0..40 {
        tracker.start().await.unwrap();
        let attempts = transport.attempts();

        transport.break_stream("socket closed");
        tracker.stop().await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(tracker.state(), ConnectionState::Disconnected, "round {round}");
        assert_eq!(transport.attempts(), attempts, "resubscribed in round {round}");
    }
    assert_eq!(observer.connects(), 40);
    assert_eq!(observer.disconnects(), 40);
}
