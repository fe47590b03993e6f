//! The location client.
//!
//! A [`LocationClient`] is a cheap, cloneable handle. Every method only
//! enqueues work for the [`ClientDaemon`], the single task that owns all
//! session state, and returns immediately. Outcomes arrive through the
//! callback passed to the method; unsolicited reports go to the
//! [`LocationListener`].
//!
//! ```text
//!  caller ──► LocationClient::start_tracking(options, cb)
//!                  │ enqueue
//!                  ▼
//!             ClientDaemon ──► session machine ──► CorrelatedRequester ──► transport
//!                  ▲                                        │
//!                  └──── continuation (on loop) ◄── worker waits for response
//!                                 │
//!                                 ▼
//!                               cb(result)
//! ```
//!
//! # Example
//!
//! ```ignore
//! let (client_link, engine_link) = locsession::protocol::loopback();
//! let (client, loop_task) = LocationClient::builder(ClientConfig::default())
//!     .with_listener(listener)
//!     .spawn(Arc::new(client_link.transport), client_link.inbound)?;
//!
//! client.start_tracking(TrackingOptions::new(1000, 0), |response| {
//!     println!("tracking: {response}");
//! })?;
//! ```

mod batching;
mod daemon;
mod geofence;
mod listener;
mod sessions;
mod state;
mod system;

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use self::state::{ClientCore, Command, Job};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult, LocationResponse};
use crate::ids::IdAllocator;
use crate::mask::EventMask;
use crate::protocol::types::{
    BatchingOptions, EnergyConsumed, GeofenceOptions, GeofenceSpec, Location, OperationMode,
    TrackingOptions,
};
use crate::protocol::{BincodeCodec, Codec, Transport};
use crate::session::{GeofenceOp, SessionState};
use crate::telemetry::{ClientMetrics, TelemetrySnapshot};

pub use daemon::ClientDaemon;
pub use listener::{
    ClientEvent, CollectiveCallback, EventForwarder, LocationListener, NoopListener,
    ResponseCallback, ValueCallback,
};

/// Point-in-time view of the loop's state.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientSnapshot {
    /// The engine has registered this client.
    pub registered: bool,
    pub capabilities: u64,
    pub tracking: SessionState,
    pub tracking_options: Option<TrackingOptions>,
    pub batching: SessionState,
    pub batching_options: Option<BatchingOptions>,
    /// Mapped geofence ids, ascending.
    pub geofences: Vec<u32>,
    pub paused_geofences: Vec<u32>,
    /// Mask the engine last acknowledged.
    pub subscription: EventMask,
    /// Busy requests waiting for the engine to resume.
    pub pending_resends: usize,
    /// Requests in flight or queued behind one of the same kind.
    pub pending_requests: usize,
}

// =============================================================================
// Builder
// =============================================================================

/// Assembles a client and its message loop.
pub struct ClientBuilder {
    config: ClientConfig,
    codec: Arc<dyn Codec>,
    listener: Arc<dyn LocationListener>,
    session_ids: Option<IdAllocator>,
    geofence_ids: Option<IdAllocator>,
}

impl ClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            codec: Arc::new(BincodeCodec::new()),
            listener: Arc::new(NoopListener),
            session_ids: None,
            geofence_ids: None,
        }
    }

    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn LocationListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Replaces the tracking/batching session id source.
    pub fn with_session_ids(mut self, ids: IdAllocator) -> Self {
        self.session_ids = Some(ids);
        self
    }

    /// Replaces the geofence id source.
    pub fn with_geofence_ids(mut self, ids: IdAllocator) -> Self {
        self.geofence_ids = Some(ids);
        self
    }

    /// Builds the loop and its handle without starting anything.
    pub fn build(
        self,
        transport: Arc<dyn Transport>,
        inbound: mpsc::UnboundedReceiver<Bytes>,
    ) -> ClientResult<(ClientDaemon, LocationClient)> {
        self.config.validate()?;

        let (api_tx, api_rx) = mpsc::channel(self.config.command_channel_capacity);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let metrics = Arc::new(ClientMetrics::new());
        let session_ids = Arc::new(
            self.session_ids
                .unwrap_or_else(|| IdAllocator::full_range("session")),
        );
        let geofence_ids = Arc::new(
            self.geofence_ids
                .unwrap_or_else(|| IdAllocator::full_range("geofence")),
        );

        let core = ClientCore::new(
            self.config,
            self.codec,
            transport,
            self.listener,
            Arc::clone(&metrics),
            session_ids,
            internal_tx.clone(),
        );
        let daemon = ClientDaemon::new(core, api_rx, internal_rx, internal_tx, inbound);
        let client = LocationClient {
            api_tx,
            geofence_ids,
            metrics,
            shutdown: CancellationToken::new(),
        };
        Ok((daemon, client))
    }

    /// Builds the client and spawns its loop on the current runtime.
    pub fn spawn(
        self,
        transport: Arc<dyn Transport>,
        inbound: mpsc::UnboundedReceiver<Bytes>,
    ) -> ClientResult<(LocationClient, JoinHandle<()>)> {
        let (daemon, client) = self.build(transport, inbound)?;
        let handle = tokio::spawn(daemon.run(client.shutdown_token()));
        Ok((client, handle))
    }
}

// =============================================================================
// Client handle
// =============================================================================

/// Handle on a running location client.
///
/// Methods return `Err` only when the operation could not be handed to the
/// loop; once accepted, the callback is invoked exactly once.
#[derive(Clone)]
pub struct LocationClient {
    api_tx: mpsc::Sender<Command>,
    geofence_ids: Arc<IdAllocator>,
    metrics: Arc<ClientMetrics>,
    shutdown: CancellationToken,
}

impl LocationClient {
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    fn enqueue(&self, job: Job) -> ClientResult<()> {
        self.api_tx.try_send(Command::Run(job)).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => ClientError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => ClientError::Shutdown,
        })
    }

    // -------------------------------------------------------------------------
    // Tracking
    // -------------------------------------------------------------------------

    /// Starts tracking, or moves the running session to `options`.
    pub fn start_tracking<F>(&self, options: TrackingOptions, callback: F) -> ClientResult<()>
    where
        F: FnOnce(LocationResponse) + Send + 'static,
    {
        let callback: ResponseCallback = Box::new(callback);
        self.enqueue(Box::new(move |core| core.start_session(options, callback)))
    }

    /// Changes the options of the running session; `InvalidParameter`
    /// without one.
    pub fn update_tracking_options<F>(&self, options: TrackingOptions, callback: F) -> ClientResult<()>
    where
        F: FnOnce(LocationResponse) + Send + 'static,
    {
        let callback: ResponseCallback = Box::new(callback);
        self.enqueue(Box::new(move |core| core.update_session(options, callback)))
    }

    pub fn stop_tracking<F>(&self, callback: F) -> ClientResult<()>
    where
        F: FnOnce(LocationResponse) + Send + 'static,
    {
        let callback: ResponseCallback = Box::new(callback);
        self.enqueue(Box::new(move |core| {
            core.stop_session::<TrackingOptions>(callback)
        }))
    }

    // -------------------------------------------------------------------------
    // Batching
    // -------------------------------------------------------------------------

    pub fn start_batching<F>(&self, options: BatchingOptions, callback: F) -> ClientResult<()>
    where
        F: FnOnce(LocationResponse) + Send + 'static,
    {
        let callback: ResponseCallback = Box::new(callback);
        self.enqueue(Box::new(move |core| core.start_batching(options, callback)))
    }

    pub fn update_batching_options<F>(&self, options: BatchingOptions, callback: F) -> ClientResult<()>
    where
        F: FnOnce(LocationResponse) + Send + 'static,
    {
        let callback: ResponseCallback = Box::new(callback);
        self.enqueue(Box::new(move |core| core.update_session(options, callback)))
    }

    pub fn stop_batching<F>(&self, callback: F) -> ClientResult<()>
    where
        F: FnOnce(LocationResponse) + Send + 'static,
    {
        let callback: ResponseCallback = Box::new(callback);
        self.enqueue(Box::new(move |core| {
            core.stop_session::<BatchingOptions>(callback)
        }))
    }

    /// Reads up to `count` buffered fixes, oldest first.
    pub fn get_batched_locations<F>(&self, count: usize, callback: F) -> ClientResult<()>
    where
        F: FnOnce(Result<Vec<Location>, LocationResponse>) + Send + 'static,
    {
        let callback: ValueCallback<Vec<Location>> = Box::new(callback);
        self.enqueue(Box::new(move |core| core.get_batched_locations(count, callback)))
    }

    // -------------------------------------------------------------------------
    // Geofencing
    // -------------------------------------------------------------------------

    /// Adds geofences. Returns the ids assigned to `specs`, in order; the
    /// callback reports the outcome per id.
    pub fn add_geofences<F>(&self, specs: Vec<GeofenceSpec>, callback: F) -> ClientResult<Vec<u32>>
    where
        F: FnOnce(Vec<(u32, LocationResponse)>) + Send + 'static,
    {
        let ids = self.geofence_ids.allocate_many(specs.len())?;
        let entries: Vec<(u32, GeofenceSpec)> = ids.iter().copied().zip(specs).collect();
        let callback: CollectiveCallback = Box::new(callback);
        self.enqueue(Box::new(move |core| core.add_geofences(entries, callback)))?;
        Ok(ids)
    }

    pub fn remove_geofences<F>(&self, ids: &[u32], callback: F) -> ClientResult<()>
    where
        F: FnOnce(Vec<(u32, LocationResponse)>) + Send + 'static,
    {
        self.geofence_op(GeofenceOp::Remove, ids, callback)
    }

    pub fn pause_geofences<F>(&self, ids: &[u32], callback: F) -> ClientResult<()>
    where
        F: FnOnce(Vec<(u32, LocationResponse)>) + Send + 'static,
    {
        self.geofence_op(GeofenceOp::Pause, ids, callback)
    }

    pub fn resume_geofences<F>(&self, ids: &[u32], callback: F) -> ClientResult<()>
    where
        F: FnOnce(Vec<(u32, LocationResponse)>) + Send + 'static,
    {
        self.geofence_op(GeofenceOp::Resume, ids, callback)
    }

    pub fn modify_geofences<F>(&self, changes: Vec<(u32, GeofenceOptions)>, callback: F) -> ClientResult<()>
    where
        F: FnOnce(Vec<(u32, LocationResponse)>) + Send + 'static,
    {
        let targets: Vec<(u32, Option<GeofenceOptions>)> = changes
            .into_iter()
            .map(|(id, options)| (id, Some(options)))
            .collect();
        let callback: CollectiveCallback = Box::new(callback);
        self.enqueue(Box::new(move |core| {
            core.geofence_targets(GeofenceOp::Modify, targets, callback)
        }))
    }

    fn geofence_op<F>(&self, op: GeofenceOp, ids: &[u32], callback: F) -> ClientResult<()>
    where
        F: FnOnce(Vec<(u32, LocationResponse)>) + Send + 'static,
    {
        let targets: Vec<(u32, Option<GeofenceOptions>)> = ids.iter().map(|id| (*id, None)).collect();
        let callback: CollectiveCallback = Box::new(callback);
        self.enqueue(Box::new(move |core| core.geofence_targets(op, targets, callback)))
    }

    // -------------------------------------------------------------------------
    // One-shots and controls
    // -------------------------------------------------------------------------

    /// Round trip through the engine; answers with the echoed payload.
    pub fn ping<F>(&self, payload: u32, callback: F) -> ClientResult<()>
    where
        F: FnOnce(Result<u32, LocationResponse>) + Send + 'static,
    {
        let callback: ValueCallback<u32> = Box::new(callback);
        self.enqueue(Box::new(move |core| core.ping(payload, callback)))
    }

    pub fn get_gnss_energy_consumed<F>(&self, callback: F) -> ClientResult<()>
    where
        F: FnOnce(Result<EnergyConsumed, LocationResponse>) + Send + 'static,
    {
        let callback: ValueCallback<EnergyConsumed> = Box::new(callback);
        self.enqueue(Box::new(move |core| core.get_gnss_energy_consumed(callback)))
    }

    pub fn get_single_terrestrial_position<F>(&self, timeout_ms: u32, callback: F) -> ClientResult<()>
    where
        F: FnOnce(Result<Location, LocationResponse>) + Send + 'static,
    {
        let callback: ValueCallback<Location> = Box::new(callback);
        self.enqueue(Box::new(move |core| {
            core.get_single_terrestrial_position(timeout_ms, callback)
        }))
    }

    pub fn update_network_availability(
        &self,
        available: bool,
        callback: Option<ResponseCallback>,
    ) -> ClientResult<()> {
        self.enqueue(Box::new(move |core| {
            core.update_network_availability(available, callback)
        }))
    }

    pub fn set_operation_mode(
        &self,
        mode: OperationMode,
        callback: Option<ResponseCallback>,
    ) -> ClientResult<()> {
        self.enqueue(Box::new(move |core| core.set_operation_mode(mode, callback)))
    }

    pub fn set_server_url(
        &self,
        url: impl Into<String>,
        callback: Option<ResponseCallback>,
    ) -> ClientResult<()> {
        let url = url.into();
        self.enqueue(Box::new(move |core| core.set_server_url(url, callback)))
    }

    pub fn set_system_info_listening(&self, listening: bool) -> ClientResult<()> {
        self.enqueue(Box::new(move |core| core.set_system_info_listening(listening)))
    }

    // -------------------------------------------------------------------------
    // Introspection and lifecycle
    // -------------------------------------------------------------------------

    /// Current loop state, taken on the loop after everything enqueued
    /// before this call has run.
    pub async fn snapshot(&self) -> ClientResult<ClientSnapshot> {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move |core| {
            let _ = tx.send(core.snapshot());
        });
        self.api_tx
            .send(Command::Run(job))
            .await
            .map_err(|_| ClientError::Shutdown)?;
        rx.await.map_err(|_| ClientError::Shutdown)
    }

    pub fn metrics(&self) -> TelemetrySnapshot {
        self.metrics.snapshot()
    }

    /// Token that stops the loop when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stops the loop. Deferred callbacks get `SystemNotReady`; the engine
    /// is told the client is going away.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
