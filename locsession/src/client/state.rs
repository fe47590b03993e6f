//! State owned by the message loop.
//!
//! Everything in [`ClientCore`] is touched only from the loop task, so none
//! of it needs locking. Engine round trips run on worker tasks; their
//! outcome comes back into the loop as a [`Command::Run`] continuation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use super::listener::{LocationListener, ResponseCallback};
use super::ClientSnapshot;
use crate::config::ClientConfig;
use crate::error::LocationResponse;
use crate::exchange::{
    BusyRetryQueue, Capture, CorrelatedRequester, PendingReply, RequestError, RequestResult,
    ResendEntry,
};
use crate::ids::IdAllocator;
use crate::mask::{EventMask, EventMaskNegotiator, MaskHolder};
use crate::protocol::types::{BatchingOptions, TrackingOptions};
use crate::protocol::{Codec, Indication, Request, Transport};
use crate::session::{Capability, GeofenceSession, OptionsSession, TripReport};
use crate::telemetry::ClientMetrics;

/// Work executed on the loop with exclusive access to the core.
pub(crate) type Job = Box<dyn FnOnce(&mut ClientCore) + Send>;

/// Message loop input.
pub(crate) enum Command {
    /// An API operation or a worker continuation.
    Run(Job),
    /// A raw message from the transport.
    Inbound(Bytes),
}

/// The message loop's state.
pub(crate) struct ClientCore {
    pub(super) config: ClientConfig,
    codec: Arc<dyn Codec>,
    pub(super) requester: Arc<CorrelatedRequester>,
    internal_tx: mpsc::UnboundedSender<Command>,
    /// Worker tasks whose continuation has not run yet.
    workers: usize,
    pub(super) listener: Arc<dyn LocationListener>,
    pub(super) metrics: Arc<ClientMetrics>,
    pub(super) session_ids: Arc<IdAllocator>,

    pub(super) registered: bool,
    capabilities: u64,
    negotiator: EventMaskNegotiator,
    retry: BusyRetryQueue,

    pub(super) tracking: OptionsSession<TrackingOptions>,
    pub(super) batching: OptionsSession<BatchingOptions>,
    pub(super) trip_report: TripReport,
    pub(super) geofences: GeofenceSession,

    /// Callbacks of starts issued before registration.
    pub(super) deferred_tracking: Option<ResponseCallback>,
    pub(super) deferred_batching: Option<ResponseCallback>,

    pub(super) batch_read_running: bool,
    pub(super) terrestrial_running: bool,
    pub(super) system_info_listening: bool,
}

impl ClientCore {
    pub(super) fn new(
        config: ClientConfig,
        codec: Arc<dyn Codec>,
        transport: Arc<dyn Transport>,
        listener: Arc<dyn LocationListener>,
        metrics: Arc<ClientMetrics>,
        session_ids: Arc<IdAllocator>,
        internal_tx: mpsc::UnboundedSender<Command>,
    ) -> Self {
        let requester = Arc::new(CorrelatedRequester::new(
            config.socket_name.clone(),
            Arc::clone(&codec),
            transport,
            config.timeout_policy.clone(),
            Arc::clone(&metrics),
        ));
        let geofences = GeofenceSession::new(config.max_geofences, config.max_geofences_per_message);

        Self {
            config,
            codec,
            requester,
            internal_tx,
            workers: 0,
            listener,
            metrics,
            session_ids,
            registered: false,
            capabilities: 0,
            negotiator: EventMaskNegotiator::new(),
            retry: BusyRetryQueue::new(),
            tracking: OptionsSession::new(Capability::Tracking),
            batching: OptionsSession::new(Capability::Batching),
            trip_report: TripReport::new(),
            geofences,
            deferred_tracking: None,
            deferred_batching: None,
            batch_read_running: false,
            terrestrial_running: false,
            system_info_listening: false,
        }
    }

    pub(super) fn handle(&mut self, command: Command) {
        match command {
            Command::Run(job) => job(self),
            Command::Inbound(payload) => self.on_payload(&payload),
        }
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Runs `work` on a worker task and hands its output back to the loop.
    pub(super) fn spawn_then<T, Fut, F>(&mut self, work: Fut, then: F)
    where
        T: Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        F: FnOnce(&mut ClientCore, T) + Send + 'static,
    {
        let tx = self.internal_tx.clone();
        self.workers += 1;
        tokio::spawn(async move {
            let output = work.await;
            let job: Job = Box::new(move |core| {
                core.workers -= 1;
                then(core, output);
            });
            if tx.send(Command::Run(job)).is_err() {
                debug!("Message loop gone, dropping continuation");
            }
        });
    }

    /// Sends `request` through the correlated request engine and runs `then`
    /// on the loop with the outcome.
    ///
    /// The request is handed to the engine before this returns, so requests
    /// leave in the order the loop issued them. A busy answer is captured
    /// for replay before `then` sees it.
    pub(super) fn issue<F>(&mut self, request: Request, then: F)
    where
        F: FnOnce(&mut ClientCore, RequestResult) + Send + 'static,
    {
        let reply = self.requester.submit(request);
        self.await_reply(reply, then);
    }

    /// [`issue`](Self::issue) for requests that carry their own engine-side
    /// timeout: the answer is awaited for at least `at_least`.
    pub(super) fn issue_waiting_at_least<F>(&mut self, request: Request, at_least: Duration, then: F)
    where
        F: FnOnce(&mut ClientCore, RequestResult) + Send + 'static,
    {
        let reply = self.requester.submit_waiting_at_least(request, at_least);
        self.await_reply(reply, then);
    }

    fn await_reply<F>(&mut self, reply: PendingReply, then: F)
    where
        F: FnOnce(&mut ClientCore, RequestResult) + Send + 'static,
    {
        self.spawn_then(reply.wait(), move |core, result| {
            if let Err(RequestError::Busy(entry)) = &result {
                core.capture_busy(entry.clone());
            }
            then(core, result);
        });
    }

    fn capture_busy(&mut self, entry: ResendEntry) {
        self.metrics.busy_captured();
        warn!(msg_id = %entry.message_id, "Engine busy, request queued for replay");
        if matches!(self.retry.capture(entry), Capture::First) {
            // wake-up signal comes through the engine-state indication
            self.negotiator
                .request_bits(MaskHolder::BusyRetry, EventMask::ENGINE_STATE);
            self.apply_mask();
        }
    }

    fn register(&self) {
        match self.requester.notify(Request::ClientRegister) {
            Ok(()) => debug!(socket = %self.config.socket_name, "Registration requested"),
            Err(err) => error!(error = %err, "Failed to request registration"),
        }
    }

    // =========================================================================
    // Subscription mask
    // =========================================================================

    /// Pushes every holder's current needs into the negotiator and applies
    /// the result.
    pub(super) fn sync_bits(&mut self) {
        self.negotiator
            .request_bits(MaskHolder::Tracking, self.tracking.required_bits());
        self.negotiator
            .request_bits(MaskHolder::Batching, self.batching.required_bits());
        self.negotiator
            .request_bits(MaskHolder::Geofencing, self.geofences.required_bits());
        let system_info = if self.system_info_listening {
            EventMask::SYSTEM_INFO
        } else {
            EventMask::EMPTY
        };
        self.negotiator
            .request_bits(MaskHolder::SystemInfo, system_info);
        self.apply_mask();
    }

    /// Sends a registration if the negotiated mask changed.
    fn apply_mask(&mut self) {
        if !self.registered {
            return;
        }
        let Some(registration) = self.negotiator.recompute() else {
            return;
        };
        let mask = registration.mask;
        self.issue(Request::UpdateCallbacks { mask }, move |core, result| match result {
            Ok(_) => {
                info!(mask = %mask, "Subscription applied");
                if let Some(aiding) = core.negotiator.on_applied(mask) {
                    debug!(mask = %aiding.mask, "Requesting aiding data");
                    core.issue(Request::RequestAidingData { mask: aiding.mask }, |_, result| {
                        if let Err(err) = result {
                            debug!(error = %err, "Aiding data request failed");
                        }
                    });
                }
            }
            Err(err) => {
                warn!(mask = %mask, error = %err, "Subscription update failed");
                core.negotiator.on_failed(mask);
            }
        });
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub(super) fn start(&mut self) {
        info!(socket = %self.config.socket_name, "Location client loop starting");
        self.register();
    }

    /// First half of shutdown: tells the engine goodbye and fails every
    /// request still waiting on it. Worker continuations keep arriving
    /// until [`has_workers`](Self::has_workers) turns false.
    pub(super) fn begin_shutdown(&mut self) {
        if self.registered {
            if let Err(err) = self.requester.notify(Request::ClientDeregister) {
                debug!(error = %err, "Deregistration not sent");
            }
        }
        self.registered = false;
        self.requester.close();
        self.answer_deferred();
        let dropped = self.retry.clear();
        if dropped > 0 {
            debug!(dropped, "Discarding busy requests awaiting replay");
        }
    }

    /// Second half of shutdown, once nothing is left to run.
    pub(super) fn finish_shutdown(&mut self) {
        // starts drained from the api queue after begin_shutdown are deferred
        self.answer_deferred();
        info!(socket = %self.config.socket_name, "Location client loop stopped");
    }

    pub(super) fn has_workers(&self) -> bool {
        self.workers > 0
    }

    fn answer_deferred(&mut self) {
        for callback in [self.deferred_tracking.take(), self.deferred_batching.take()]
            .into_iter()
            .flatten()
        {
            callback(LocationResponse::SystemNotReady);
        }
    }

    /// The engine registered this client: re-establish everything it
    /// should know about.
    fn on_registered(&mut self, capabilities: u64) {
        info!(capabilities, "Engine ready");
        self.registered = true;
        self.capabilities = capabilities;
        self.listener.on_capabilities(capabilities);

        self.sync_bits();
        self.resume_session::<TrackingOptions>();
        self.resume_session::<BatchingOptions>();
        if self.geofences.needs_readd() {
            self.readd_geofences();
        }
    }

    fn on_engine_restarted(&mut self) {
        warn!("Engine restarted, registering again");
        self.registered = false;
        self.negotiator.reset_applied();
        self.register();
    }

    fn on_engine_state(&mut self, on: bool) {
        info!(on, "Engine state changed");
        self.negotiator.set_engine_on(on);
        if on {
            let entries = self.retry.on_engine_resumed();
            for entry in entries {
                let id = entry.message_id;
                let reply = self.requester.resend(entry);
                // replays are not captured again
                tokio::spawn(async move {
                    if let Err(err) = reply.wait().await {
                        debug!(msg_id = %id, error = %err, "Replayed request failed");
                    }
                });
            }
            self.negotiator.release_bits(MaskHolder::BusyRetry);
        }
        self.apply_mask();
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    fn on_payload(&mut self, payload: &[u8]) {
        let inbound = match self.codec.decode(payload) {
            Ok(inbound) => inbound,
            Err(err) => {
                error!(error = %err, "Dropping undecodable message");
                self.metrics.indication_dropped();
                return;
            }
        };
        if inbound.socket_name != self.config.socket_name {
            debug!(to = %inbound.socket_name, "Dropping message addressed to another client");
            self.metrics.indication_dropped();
            return;
        }

        let indication = inbound.indication;
        if indication.correlation().is_some() {
            if !self.requester.complete(indication) {
                self.metrics.stale_response();
            }
            return;
        }
        self.on_indication(indication);
    }

    fn on_indication(&mut self, indication: Indication) {
        match indication {
            Indication::Capabilities { capabilities } => self.on_registered(capabilities),
            Indication::EngineRestarted => self.on_engine_restarted(),
            Indication::EngineState { on } => self.on_engine_state(on),
            Indication::Location(location) => self.route(
                EventMask::POSITION | EventMask::SIMPLE_LOCATION,
                "location",
                |listener| listener.on_location(&location),
            ),
            Indication::LocationInfo(location) => {
                self.route(EventMask::LOCATION_INFO, "location info", |listener| {
                    listener.on_location_info(&location)
                })
            }
            Indication::SatelliteVehicles(satellites) => {
                self.route(EventMask::SV, "satellites", |listener| {
                    listener.on_satellites(&satellites)
                })
            }
            Indication::Nmea { timestamp_ms, nmea } => {
                self.route(EventMask::NMEA, "nmea", |listener| {
                    for sentence in nmea.lines().map(str::trim).filter(|s| !s.is_empty()) {
                        listener.on_nmea(timestamp_ms, sentence);
                    }
                })
            }
            Indication::Data(data) => {
                self.route(EventMask::DATA, "data", |listener| listener.on_data(&data))
            }
            Indication::Measurements(measurements) => self.route(
                EventMask::MEASUREMENTS | EventMask::SV_POLYNOMIAL,
                "measurements",
                |listener| listener.on_measurements(&measurements),
            ),
            Indication::EngineLocations(locations) => {
                self.route(EventMask::ENGINE_LOCATIONS, "engine locations", |listener| {
                    listener.on_engine_locations(&locations)
                })
            }
            Indication::Batching { status, fixes } => self.on_batching_indication(status, fixes),
            Indication::GeofenceBreach {
                engine_ids,
                breach_type,
                location,
                timestamp_ms,
            } => self.on_breach(&engine_ids, breach_type, location, timestamp_ms),
            Indication::SystemInfo(info) => {
                if self.system_info_listening {
                    self.listener.on_system_info(&info);
                } else {
                    self.drop_indication("system info");
                }
            }
            Indication::Response { .. }
            | Indication::CollectiveResponse { .. }
            | Indication::BatchedLocations { .. }
            | Indication::EnergyConsumed(_)
            | Indication::SingleTerrestrialPosition { .. }
            | Indication::PingTest { .. } => {}
        }
    }

    /// Delivers a tracking report if the session subscribed to it.
    fn route<F>(&self, bits: EventMask, kind: &'static str, deliver: F)
    where
        F: FnOnce(&dyn LocationListener),
    {
        if self.tracking.is_active() && self.tracking.required_bits().intersects(bits) {
            deliver(self.listener.as_ref());
        } else {
            self.drop_indication(kind);
        }
    }

    pub(super) fn drop_indication(&self, kind: &'static str) {
        trace!(kind, "No subscriber, dropping indication");
        self.metrics.indication_dropped();
    }

    pub(super) fn snapshot(&self) -> ClientSnapshot {
        let mapping = self.geofences.mapping();
        let geofences = mapping.client_ids();
        let paused_geofences = geofences
            .iter()
            .copied()
            .filter(|id| mapping.get(*id).is_some_and(|entry| entry.paused))
            .collect();

        ClientSnapshot {
            registered: self.registered,
            capabilities: self.capabilities,
            tracking: self.tracking.state(),
            tracking_options: self.tracking.desired_options().copied(),
            batching: self.batching.state(),
            batching_options: self.batching.desired_options().copied(),
            geofences,
            paused_geofences,
            subscription: self.negotiator.last_applied(),
            pending_resends: self.retry.len(),
            pending_requests: self.requester.pending_count(),
        }
    }
}
