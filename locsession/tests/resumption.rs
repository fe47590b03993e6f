//! Session resumption across engine restarts.
//!
//! Run with: `cargo test --test resumption`

mod common;

use std::time::Duration;

use common::{answer, reply, start, Harness, WAIT};
use locsession::protocol::{MessageId, Request};
use locsession::sim::DEFAULT_CAPABILITIES;
use locsession::{
    BatchingOptions, BreachType, ClientEvent, EventMask, GeofenceSpec, Location,
    LocationResponse, SessionState, TrackingOptions,
};
use tokio::time::{sleep, timeout};

async fn start_tracking(harness: &Harness, options: TrackingOptions) {
    let (callback, rx) = reply();
    harness.client.start_tracking(options, callback).unwrap();
    assert_eq!(answer(rx).await, LocationResponse::Success);
}

fn tracking_sessions(harness: &Harness) -> Vec<u32> {
    harness
        .engine
        .requests_of(MessageId::StartTracking)
        .iter()
        .map(|request| match request {
            Request::StartTracking { session, .. } => *session,
            other => panic!("unexpected {other:?}"),
        })
        .collect()
}

#[tokio::test]
async fn test_restart_resumes_tracking_under_a_new_session() {
    let harness = start().await;
    start_tracking(&harness, TrackingOptions::new(1000, 0)).await;

    harness.engine.restart();
    harness.wait_for_requests(MessageId::ClientRegister, 2).await;
    harness.wait_for_requests(MessageId::StartTracking, 2).await;

    let snap = harness
        .wait_until(|snap| snap.registered && snap.tracking == SessionState::Active)
        .await;
    assert_eq!(snap.tracking_options, Some(TrackingOptions::new(1000, 0)));

    // settled: exactly one resumed start, under a fresh session
    sleep(Duration::from_millis(50)).await;
    harness.client.snapshot().await.unwrap();
    let sessions = tracking_sessions(&harness);
    assert_eq!(sessions.len(), 2, "starts sent: {sessions:?}");
    assert_ne!(sessions[0], sessions[1]);
}

#[tokio::test]
async fn test_restart_reapplies_subscription() {
    let harness = start().await;
    start_tracking(&harness, TrackingOptions::new(1000, 0)).await;
    harness
        .wait_until(|snap| snap.subscription.contains(EventMask::POSITION))
        .await;
    let before = harness.engine.count(MessageId::UpdateCallbacks);

    harness.engine.restart();
    harness
        .wait_for_requests(MessageId::UpdateCallbacks, before + 1)
        .await;
    harness
        .wait_until(|snap| snap.registered && snap.subscription.contains(EventMask::POSITION))
        .await;
}

#[tokio::test]
async fn test_stopped_session_is_not_resumed() {
    let harness = start().await;
    start_tracking(&harness, TrackingOptions::new(1000, 0)).await;

    let (callback, rx) = reply();
    harness.client.stop_tracking(callback).unwrap();
    answer(rx).await;

    harness.engine.restart();
    harness.wait_for_requests(MessageId::ClientRegister, 2).await;
    harness.wait_until(|snap| snap.registered).await;
    assert_eq!(harness.engine.count(MessageId::StartTracking), 1);
}

#[tokio::test]
async fn test_restart_resumes_batching() {
    let harness = start().await;

    let (callback, rx) = reply();
    harness
        .client
        .start_batching(BatchingOptions::routine(1000, 0), callback)
        .unwrap();
    assert_eq!(answer(rx).await, LocationResponse::Success);

    harness.engine.restart();
    harness.wait_for_requests(MessageId::StartBatching, 2).await;
    let snap = harness
        .wait_until(|snap| snap.registered && snap.batching == SessionState::Active)
        .await;
    assert_eq!(snap.batching_options, Some(BatchingOptions::routine(1000, 0)));
}

#[tokio::test]
async fn test_restart_readds_geofences_under_the_same_client_ids() {
    let mut harness = start().await;

    let (callback, rx) = reply();
    let ids = harness
        .client
        .add_geofences(
            vec![
                GeofenceSpec::circle(52.0, 13.0, 100.0),
                GeofenceSpec::circle(48.0, 11.0, 250.0),
            ],
            callback,
        )
        .unwrap();
    let outcome = answer(rx).await;
    assert!(outcome.iter().all(|(_, response)| response.is_success()));
    let old_engine_id = harness.engine.engine_geofence_id(ids[0]).unwrap();

    harness.engine.restart();
    harness.wait_for_requests(MessageId::AddGeofences, 2).await;
    harness.wait_until(|snap| snap.geofences == ids).await;
    assert_eq!(harness.engine.geofence_count(), 2);

    let new_engine_id = harness.engine.engine_geofence_id(ids[0]).unwrap();
    assert_ne!(old_engine_id, new_engine_id);

    // breaches on the new engine ids still surface under the client ids
    harness
        .engine
        .breach(&[ids[0]], BreachType::Enter, Location::at(9, 52.0, 13.0));
    match harness.next_event().await {
        ClientEvent::GeofenceBreach(breach) => {
            assert_eq!(breach.ids, vec![ids[0]]);
            assert_eq!(breach.breach_type, BreachType::Enter);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_second_restart_during_readd_keeps_geofences() {
    let mut harness = start().await;

    let (callback, rx) = reply();
    let ids = harness
        .client
        .add_geofences(
            vec![
                GeofenceSpec::circle(52.0, 13.0, 100.0),
                GeofenceSpec::circle(48.0, 11.0, 250.0),
            ],
            callback,
        )
        .unwrap();
    answer(rx).await;

    // the engine restarts again before answering the first re-add
    harness.engine.set_silent(MessageId::AddGeofences, true);
    harness.engine.restart();
    harness.wait_for_requests(MessageId::AddGeofences, 2).await;
    harness.engine.set_silent(MessageId::AddGeofences, false);
    harness.engine.restart();
    harness.wait_for_requests(MessageId::AddGeofences, 3).await;

    harness
        .wait_until(|snap| snap.registered && snap.geofences == ids)
        .await;
    assert_eq!(harness.engine.geofence_count(), 2);

    // the abandoned re-add times out without erasing anything
    sleep(Duration::from_millis(1_200)).await;
    let snap = harness.client.snapshot().await.unwrap();
    assert_eq!(snap.geofences, ids);
    assert!(snap.subscription.contains(EventMask::GEOFENCE_BREACH));

    harness
        .engine
        .breach(&[ids[1]], BreachType::Exit, Location::at(11, 48.0, 11.0));
    match harness.next_event().await {
        ClientEvent::GeofenceBreach(breach) => assert_eq!(breach.ids, vec![ids[1]]),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_capabilities_reach_listener_on_every_registration() {
    let mut harness = start().await;
    let first = timeout(WAIT, harness.events.recv()).await.unwrap();
    assert_eq!(first, Some(ClientEvent::Capabilities(DEFAULT_CAPABILITIES)));

    harness.engine.set_capabilities(0x3);
    harness.engine.restart();
    let second = timeout(WAIT, harness.events.recv()).await.unwrap();
    assert_eq!(second, Some(ClientEvent::Capabilities(0x3)));
    harness
        .wait_until(|snap| snap.registered && snap.capabilities == 0x3)
        .await;
}
