//! Shared harness: a client wired to a simulated engine over loopback.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};

use locsession::protocol::MessageId;
use locsession::sim::{EngineHandle, SimulatedEngine};
use locsession::{
    loopback, ClientConfig, ClientEvent, ClientSnapshot, EventForwarder, Location, LocationClient,
};

pub const SOCKET: &str = "test-client";

/// Upper bound for anything the tests wait on.
pub const WAIT: Duration = Duration::from_secs(2);

pub struct Harness {
    pub client: LocationClient,
    pub engine: EngineHandle,
    pub events: mpsc::UnboundedReceiver<ClientEvent>,
    pub client_task: JoinHandle<()>,
    pub engine_task: JoinHandle<()>,
}

/// Starts a client with default config and waits for registration.
pub async fn start() -> Harness {
    let harness = start_with(ClientConfig::new(SOCKET), |_| {}).await;
    harness.wait_until(|snap| snap.registered).await;
    harness
}

/// Starts a client without waiting for anything. `script` runs on the
/// engine before the client sends its first request.
pub async fn start_with<F>(config: ClientConfig, script: F) -> Harness
where
    F: FnOnce(&EngineHandle),
{
    let (client_link, engine_link) = loopback();
    let (engine, engine_task) = SimulatedEngine::spawn(engine_link, config.socket_name.clone());
    script(&engine);

    let (listener, events) = EventForwarder::new();
    let (client, client_task) = LocationClient::builder(config)
        .with_listener(Arc::new(listener))
        .spawn(Arc::new(client_link.transport), client_link.inbound)
        .expect("client should build");

    Harness {
        client,
        engine,
        events,
        client_task,
        engine_task,
    }
}

impl Harness {
    /// Polls the loop until `done` holds for its snapshot.
    pub async fn wait_until<F>(&self, done: F) -> ClientSnapshot
    where
        F: Fn(&ClientSnapshot) -> bool,
    {
        let deadline = Instant::now() + WAIT;
        loop {
            let snap = self.client.snapshot().await.expect("loop should be running");
            if done(&snap) {
                return snap;
            }
            assert!(Instant::now() < deadline, "condition not reached, last snapshot: {snap:?}");
            sleep(Duration::from_millis(5)).await;
        }
    }

    /// Waits until the engine saw `count` requests of kind `id`.
    pub async fn wait_for_requests(&self, id: MessageId, count: usize) {
        assert!(
            self.engine.wait_for(id, count, WAIT).await,
            "expected {count} {id} requests, got {}",
            self.engine.count(id)
        );
    }

    /// Next listener event, skipping capability announcements.
    pub async fn next_event(&mut self) -> ClientEvent {
        loop {
            let event = timeout(WAIT, self.events.recv())
                .await
                .expect("timed out waiting for a listener event")
                .expect("listener channel closed");
            if !matches!(event, ClientEvent::Capabilities(_)) {
                return event;
            }
        }
    }

    /// Asserts that no listener event (other than capabilities) arrives
    /// within a short grace period.
    pub async fn assert_no_event(&mut self) {
        let grace = Duration::from_millis(50);
        let deadline = Instant::now() + grace;
        while let Ok(Some(event)) = timeout(deadline - Instant::now(), self.events.recv()).await {
            assert!(
                matches!(event, ClientEvent::Capabilities(_)),
                "unexpected event: {event:?}"
            );
        }
    }
}

/// A callback and the receiver its single invocation lands in.
pub fn reply<T: Send + 'static>() -> (impl FnOnce(T) + Send + 'static, oneshot::Receiver<T>) {
    let (tx, rx) = oneshot::channel();
    let callback = move |value: T| {
        let _ = tx.send(value);
    };
    (callback, rx)
}

/// Awaits a callback created by [`reply`].
pub async fn answer<T>(rx: oneshot::Receiver<T>) -> T {
    timeout(WAIT, rx)
        .await
        .expect("timed out waiting for callback")
        .expect("callback dropped without being called")
}

/// Fixes with the given timestamps.
pub fn fixes(timestamps: impl IntoIterator<Item = u64>) -> Vec<Location> {
    timestamps
        .into_iter()
        .map(|ts| Location::at(ts, 52.0, 13.0))
        .collect()
}

pub fn timestamps(fixes: &[Location]) -> Vec<u64> {
    fixes.iter().map(|fix| fix.timestamp_ms).collect()
}
