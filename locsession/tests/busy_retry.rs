//! Busy capture and replay on engine resume.
//!
//! Run with: `cargo test --test busy_retry`

mod common;

use common::{answer, reply, start, Harness};
use locsession::client::ResponseCallback;
use locsession::protocol::{MessageId, Request};
use locsession::{EventMask, LocationResponse, TrackingOptions};

async fn tracking_session(harness: &Harness) {
    let (callback, rx) = reply();
    harness
        .client
        .start_tracking(TrackingOptions::new(1000, 0), callback)
        .unwrap();
    assert_eq!(answer(rx).await, LocationResponse::Success);
}

#[tokio::test]
async fn test_busy_request_is_replayed_once_engine_resumes() {
    let harness = start().await;
    tracking_session(&harness).await;
    harness.engine.set_busy(MessageId::StopTracking, 1);

    let (callback, rx) = reply();
    harness.client.stop_tracking(callback).unwrap();
    assert_eq!(answer(rx).await, LocationResponse::Busy);

    let snap = harness
        .wait_until(|snap| snap.subscription.contains(EventMask::ENGINE_STATE))
        .await;
    assert_eq!(snap.pending_resends, 1);
    assert_eq!(harness.client.metrics().busy_captured, 1);

    harness.engine.engine_state(true);
    harness.wait_for_requests(MessageId::StopTracking, 2).await;

    let snap = harness
        .wait_until(|snap| !snap.subscription.contains(EventMask::ENGINE_STATE))
        .await;
    assert_eq!(snap.pending_resends, 0);
    assert_eq!(harness.client.metrics().resends, 1);

    // the replay carries the original payload
    let stops = harness.engine.requests_of(MessageId::StopTracking);
    assert_eq!(stops[0], stops[1]);
}

#[tokio::test]
async fn test_replay_preserves_capture_order() {
    let harness = start().await;
    tracking_session(&harness).await;
    harness.engine.set_busy(MessageId::StopTracking, 1);
    harness
        .engine
        .set_busy(MessageId::UpdateNetworkAvailability, 1);

    let (callback, rx) = reply();
    harness.client.stop_tracking(callback).unwrap();
    assert_eq!(answer(rx).await, LocationResponse::Busy);

    let (callback, rx) = reply();
    let callback: ResponseCallback = Box::new(callback);
    harness
        .client
        .update_network_availability(true, Some(callback))
        .unwrap();
    assert_eq!(answer(rx).await, LocationResponse::Busy);
    harness.wait_until(|snap| snap.pending_resends == 2).await;

    harness.engine.clear_requests();
    harness.engine.engine_state(true);
    harness
        .wait_for_requests(MessageId::UpdateNetworkAvailability, 1)
        .await;

    let replayed: Vec<MessageId> = harness
        .engine
        .requests()
        .iter()
        .map(Request::message_id)
        .filter(|id| {
            matches!(
                id,
                MessageId::StopTracking | MessageId::UpdateNetworkAvailability
            )
        })
        .collect();
    assert_eq!(
        replayed,
        vec![MessageId::StopTracking, MessageId::UpdateNetworkAvailability]
    );
}

#[tokio::test]
async fn test_engine_off_keeps_requests_queued() {
    let harness = start().await;
    tracking_session(&harness).await;
    harness.engine.set_busy(MessageId::StopTracking, 1);

    let (callback, rx) = reply();
    harness.client.stop_tracking(callback).unwrap();
    answer(rx).await;

    harness.engine.engine_state(false);
    let snap = harness.client.snapshot().await.unwrap();
    assert_eq!(snap.pending_resends, 1);
    assert_eq!(harness.engine.count(MessageId::StopTracking), 1);
}

#[tokio::test]
async fn test_busy_batch_read_is_not_replayed() {
    let harness = start().await;
    harness.engine.push_batch(common::fixes(1..=3));
    harness
        .engine
        .set_busy(MessageId::GetBatchedLocations, 1);

    let (callback, rx) = reply();
    harness.client.get_batched_locations(3, callback).unwrap();
    assert_eq!(answer(rx).await, Err(LocationResponse::Busy));

    let snap = harness.client.snapshot().await.unwrap();
    assert_eq!(snap.pending_resends, 0);
    assert_eq!(harness.client.metrics().busy_captured, 0);

    // a later read goes through normally
    let (callback, rx) = reply();
    harness.client.get_batched_locations(3, callback).unwrap();
    let fixes = answer(rx).await.unwrap();
    assert_eq!(common::timestamps(&fixes), vec![1, 2, 3]);
}
