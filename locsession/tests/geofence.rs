//! Geofence operations against the simulated engine.
//!
//! Run with: `cargo test --test geofence`

mod common;

use common::{answer, reply, start, start_with, Harness, SOCKET};
use locsession::protocol::{MessageId, Request};
use locsession::{
    BreachType, ClientConfig, ClientEvent, EventMask, GeofenceOptions, GeofenceSpec, Location,
    LocationResponse,
};

fn circles(count: usize) -> Vec<GeofenceSpec> {
    (0..count)
        .map(|i| GeofenceSpec::circle(52.0 + i as f64 * 0.01, 13.0, 150.0))
        .collect()
}

async fn add(harness: &Harness, count: usize) -> (Vec<u32>, Vec<(u32, LocationResponse)>) {
    let (callback, rx) = reply();
    let ids = harness.client.add_geofences(circles(count), callback).unwrap();
    (ids, answer(rx).await)
}

fn success(ids: &[u32]) -> Vec<(u32, LocationResponse)> {
    ids.iter().map(|id| (*id, LocationResponse::Success)).collect()
}

#[tokio::test]
async fn test_add_reports_per_entry_and_maps_successes() {
    let harness = start().await;
    // ids are handed out from 1 upwards
    harness.engine.fail_geofence(2);

    let (ids, outcome) = add(&harness, 3).await;
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(
        outcome,
        vec![
            (1, LocationResponse::Success),
            (2, LocationResponse::GeneralFailure),
            (3, LocationResponse::Success),
        ]
    );

    let snap = harness
        .wait_until(|snap| snap.subscription.contains(EventMask::GEOFENCE_BREACH))
        .await;
    assert_eq!(snap.geofences, vec![1, 3]);
}

#[tokio::test]
async fn test_large_add_is_split_into_chunks() {
    let config = ClientConfig::new(SOCKET).with_max_geofences_per_message(2);
    let harness = start_with(config, |_| {}).await;
    harness.wait_until(|snap| snap.registered).await;

    let (ids, outcome) = add(&harness, 5).await;
    assert_eq!(outcome, success(&ids));

    let chunk_sizes: Vec<usize> = harness
        .engine
        .requests_of(MessageId::AddGeofences)
        .iter()
        .map(|request| match request {
            Request::AddGeofences { entries } => entries.len(),
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    assert_eq!(chunk_sizes, vec![2, 2, 1]);
}

#[tokio::test]
async fn test_add_beyond_capacity_is_refused_whole() {
    let config = ClientConfig::new(SOCKET)
        .with_max_geofences(2)
        .with_max_geofences_per_message(2);
    let harness = start_with(config, |_| {}).await;
    harness.wait_until(|snap| snap.registered).await;

    let (ids, outcome) = add(&harness, 3).await;
    assert!(outcome
        .iter()
        .all(|(_, response)| *response == LocationResponse::CapacityExceeded));
    assert_eq!(outcome.len(), ids.len());
    assert_eq!(harness.engine.count(MessageId::AddGeofences), 0);
}

#[tokio::test]
async fn test_add_before_registration_is_not_ready() {
    let harness = start_with(ClientConfig::new(SOCKET), |engine| {
        engine.set_auto_register(false);
    })
    .await;

    let (_, outcome) = add(&harness, 1).await;
    assert_eq!(outcome[0].1, LocationResponse::SystemNotReady);
}

#[tokio::test]
async fn test_pause_and_resume() {
    let harness = start().await;
    let (ids, _) = add(&harness, 2).await;

    let (callback, rx) = reply();
    harness.client.pause_geofences(&ids[..1], callback).unwrap();
    assert_eq!(answer(rx).await, success(&ids[..1]));
    let snap = harness.client.snapshot().await.unwrap();
    assert_eq!(snap.paused_geofences, vec![ids[0]]);

    let (callback, rx) = reply();
    harness.client.resume_geofences(&ids[..1], callback).unwrap();
    assert_eq!(answer(rx).await, success(&ids[..1]));
    let snap = harness.client.snapshot().await.unwrap();
    assert!(snap.paused_geofences.is_empty());
    assert_eq!(snap.geofences, ids);
}

#[tokio::test]
async fn test_modify_sends_new_options() {
    let harness = start().await;
    let (ids, _) = add(&harness, 1).await;
    let options = GeofenceOptions {
        responsiveness_ms: 5_000,
        ..GeofenceOptions::default()
    };

    let (callback, rx) = reply();
    harness
        .client
        .modify_geofences(vec![(ids[0], options)], callback)
        .unwrap();
    assert_eq!(answer(rx).await, success(&ids));

    let engine_id = harness.engine.engine_geofence_id(ids[0]).unwrap();
    match &harness.engine.requests_of(MessageId::ModifyGeofences)[0] {
        Request::ModifyGeofences { entries } => {
            assert_eq!(entries[0].engine_id, engine_id);
            assert_eq!(entries[0].options, options);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_id_rejects_whole_batch() {
    let harness = start().await;
    let (ids, _) = add(&harness, 1).await;

    let (callback, rx) = reply();
    harness
        .client
        .remove_geofences(&[ids[0], 999], callback)
        .unwrap();
    assert_eq!(
        answer(rx).await,
        vec![
            (ids[0], LocationResponse::InvalidParameter),
            (999, LocationResponse::InvalidParameter),
        ]
    );
    assert_eq!(harness.engine.count(MessageId::RemoveGeofences), 0);
    assert_eq!(harness.client.snapshot().await.unwrap().geofences, ids);
}

#[tokio::test]
async fn test_remove_last_geofence_releases_breach_bit() {
    let harness = start().await;
    let (ids, _) = add(&harness, 2).await;
    harness
        .wait_until(|snap| snap.subscription.contains(EventMask::GEOFENCE_BREACH))
        .await;

    let (callback, rx) = reply();
    harness.client.remove_geofences(&ids, callback).unwrap();
    assert_eq!(answer(rx).await, success(&ids));

    let snap = harness
        .wait_until(|snap| !snap.subscription.contains(EventMask::GEOFENCE_BREACH))
        .await;
    assert!(snap.geofences.is_empty());
    assert_eq!(harness.engine.geofence_count(), 0);
}

#[tokio::test]
async fn test_breach_is_reported_under_client_ids() {
    let mut harness = start().await;
    let (ids, _) = add(&harness, 3).await;

    let fix = Location::at(42, 52.0, 13.0);
    harness
        .engine
        .breach(&[ids[2], ids[0]], BreachType::Exit, fix.clone());
    match harness.next_event().await {
        ClientEvent::GeofenceBreach(breach) => {
            assert_eq!(breach.ids, vec![ids[2], ids[0]]);
            assert_eq!(breach.breach_type, BreachType::Exit);
            assert_eq!(breach.location, fix);
            assert_eq!(breach.timestamp_ms, 42);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_breach_for_unknown_geofence_is_dropped() {
    let mut harness = start().await;
    add(&harness, 1).await;

    // 777 was never added, so the engine reports it under an id nobody maps
    harness
        .engine
        .breach(&[777], BreachType::Enter, Location::at(1, 0.0, 0.0));
    harness.assert_no_event().await;
    assert!(harness.client.metrics().indications_dropped >= 1);
}
