//! One-shot requests, engine controls and the system-info listener.
//!
//! Run with: `cargo test --test one_shots`

mod common;

use std::time::Duration;

use tokio::time::{sleep, timeout, Instant};

use common::{answer, reply, start, start_with, SOCKET};
use locsession::client::ResponseCallback;
use locsession::protocol::types::{EnergyConsumed, OperationMode, SystemInfo};
use locsession::protocol::MessageId;
use locsession::{ClientConfig, ClientEvent, EventMask, Location, LocationResponse};

fn boxed(callback: impl FnOnce(LocationResponse) + Send + 'static) -> Option<ResponseCallback> {
    Some(Box::new(callback))
}

#[tokio::test]
async fn test_ping_echoes_payload() {
    let harness = start().await;
    let (callback, rx) = reply();
    harness.client.ping(4242, callback).unwrap();
    assert_eq!(answer(rx).await, Ok(4242));
    assert!(harness.client.metrics().responses_matched >= 1);
}

#[tokio::test]
async fn test_energy_consumed() {
    let harness = start().await;
    harness.engine.set_energy(1_234);

    let (callback, rx) = reply();
    harness.client.get_gnss_energy_consumed(callback).unwrap();
    assert_eq!(
        answer(rx).await,
        Ok(EnergyConsumed {
            total_energy_consumed: 1_234
        })
    );
}

#[tokio::test]
async fn test_terrestrial_position_is_exclusive() {
    let harness = start_with(ClientConfig::new(SOCKET), |engine| {
        engine.set_silent(MessageId::GetSingleTerrestrialPosition, true);
    })
    .await;
    harness.wait_until(|snap| snap.registered).await;

    // a zero engine timeout still waits out the answer margin (1s)
    let (first, first_rx) = reply();
    harness
        .client
        .get_single_terrestrial_position(0, first)
        .unwrap();
    let (second, second_rx) = reply();
    harness
        .client
        .get_single_terrestrial_position(0, second)
        .unwrap();
    assert_eq!(answer(second_rx).await, Err(LocationResponse::AlreadyInProgress));
    assert_eq!(answer(first_rx).await, Err(LocationResponse::Timeout));

    let fix = Location::at(5, 40.0, -3.7);
    harness.engine.set_terrestrial_fix(fix.clone());
    harness
        .engine
        .set_silent(MessageId::GetSingleTerrestrialPosition, false);
    let (callback, rx) = reply();
    harness
        .client
        .get_single_terrestrial_position(1_000, callback)
        .unwrap();
    assert_eq!(answer(rx).await, Ok(fix));
}

#[tokio::test(start_paused = true)]
async fn test_terrestrial_wait_follows_caller_timeout() {
    let harness = start_with(ClientConfig::new(SOCKET), |engine| {
        engine.set_silent(MessageId::GetSingleTerrestrialPosition, true);
    })
    .await;
    harness.wait_until(|snap| snap.registered).await;

    let started = Instant::now();
    let (callback, mut rx) = reply();
    harness
        .client
        .get_single_terrestrial_position(8_000, callback)
        .unwrap();

    // past the 5s long timeout, the engine still has time to answer
    sleep(Duration::from_secs(6)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(harness.client.snapshot().await.unwrap().pending_requests, 1);

    let result = timeout(Duration::from_secs(10), rx)
        .await
        .expect("callback within the caller timeout")
        .unwrap();
    assert_eq!(result, Err(LocationResponse::Timeout));
    assert!(started.elapsed() >= Duration::from_secs(8));
}

#[tokio::test]
async fn test_operation_mode_timeout_is_tolerated() {
    let config = ClientConfig::new(SOCKET).with_request_timeout(Duration::from_millis(100));
    let harness = start_with(config, |engine| {
        engine.set_silent(MessageId::SetOperationMode, true);
    })
    .await;
    harness.wait_until(|snap| snap.registered).await;

    let (callback, rx) = reply();
    harness
        .client
        .set_operation_mode(OperationMode::MsBased, boxed(callback))
        .unwrap();
    assert_eq!(answer(rx).await, LocationResponse::Success);
    assert_eq!(harness.client.metrics().timeouts, 1);
}

#[tokio::test]
async fn test_server_url_waits_for_the_long_timeout() {
    let config = ClientConfig::new(SOCKET)
        .with_request_timeout(Duration::from_millis(50))
        .with_long_request_timeout(Duration::from_millis(300));
    let harness = start_with(config, |engine| {
        engine.set_silent(MessageId::SetServerUrl, true);
    })
    .await;
    harness.wait_until(|snap| snap.registered).await;

    let started = tokio::time::Instant::now();
    let (callback, rx) = reply();
    harness
        .client
        .set_server_url("https://supl.example.net:7275", boxed(callback))
        .unwrap();
    assert_eq!(answer(rx).await, LocationResponse::Timeout);
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[tokio::test]
async fn test_engine_rejection_reaches_callback() {
    let harness = start().await;
    harness
        .engine
        .set_failure(MessageId::UpdateNetworkAvailability, Some(LocationResponse::NotSupported));

    let (callback, rx) = reply();
    harness
        .client
        .update_network_availability(false, boxed(callback))
        .unwrap();
    assert_eq!(answer(rx).await, LocationResponse::NotSupported);
}

#[tokio::test]
async fn test_controls_before_registration_are_not_ready() {
    let harness = start_with(ClientConfig::new(SOCKET), |engine| {
        engine.set_auto_register(false);
    })
    .await;

    let (callback, rx) = reply();
    harness
        .client
        .update_network_availability(true, boxed(callback))
        .unwrap();
    assert_eq!(answer(rx).await, LocationResponse::SystemNotReady);

    let (callback, rx) = reply();
    harness.client.get_gnss_energy_consumed(callback).unwrap();
    assert_eq!(answer(rx).await, Err(LocationResponse::SystemNotReady));
    assert_eq!(harness.engine.count(MessageId::UpdateNetworkAvailability), 0);
}

#[tokio::test]
async fn test_system_info_only_while_listening() {
    let mut harness = start().await;
    let info = SystemInfo {
        current_leap_seconds: 18,
        leap_second_change_pending: true,
    };

    harness.engine.system_info(info);
    harness.assert_no_event().await;

    harness.client.set_system_info_listening(true).unwrap();
    harness
        .wait_until(|snap| snap.subscription.contains(EventMask::SYSTEM_INFO))
        .await;
    harness.engine.system_info(info);
    assert_eq!(harness.next_event().await, ClientEvent::SystemInfo(info));

    harness.client.set_system_info_listening(false).unwrap();
    harness
        .wait_until(|snap| !snap.subscription.contains(EventMask::SYSTEM_INFO))
        .await;
}
