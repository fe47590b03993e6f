//! Callback types and the report listener.

use tokio::sync::mpsc;

use crate::error::LocationResponse;
use crate::protocol::types::{
    BatchingStatus, EngineLocation, GeofenceBreach, GnssData, Location, Measurements, SvInfo,
    SystemInfo,
};

/// Answer to a single-status operation.
pub type ResponseCallback = Box<dyn FnOnce(LocationResponse) + Send>;

/// Per-geofence answers to a geofence batch operation, in request order.
pub type CollectiveCallback = Box<dyn FnOnce(Vec<(u32, LocationResponse)>) + Send>;

/// Answer carrying a value.
pub type ValueCallback<T> = Box<dyn FnOnce(Result<T, LocationResponse>) + Send>;

/// Receives unsolicited reports.
///
/// Methods are called from the client's message loop; implementations must
/// return quickly and must not assume any particular thread.
pub trait LocationListener: Send + Sync + 'static {
    fn on_capabilities(&self, _capabilities: u64) {}
    fn on_location(&self, _location: &Location) {}
    fn on_location_info(&self, _location: &Location) {}
    fn on_satellites(&self, _satellites: &[SvInfo]) {}
    /// One call per NMEA sentence.
    fn on_nmea(&self, _timestamp_ms: u64, _sentence: &str) {}
    fn on_data(&self, _data: &GnssData) {}
    fn on_measurements(&self, _measurements: &Measurements) {}
    fn on_engine_locations(&self, _locations: &[EngineLocation]) {}
    fn on_batch(&self, _fixes: &[Location], _status: BatchingStatus) {}
    /// Trip batching covered its distance. Reported once per session.
    fn on_trip_distance_completed(&self, _distance_m: u32) {}
    fn on_geofence_breach(&self, _breach: &GeofenceBreach) {}
    fn on_system_info(&self, _info: &SystemInfo) {}
}

/// Listener that ignores everything.
#[derive(Debug, Default)]
pub struct NoopListener;

impl LocationListener for NoopListener {}

/// Owned copy of a listener call.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientEvent {
    Capabilities(u64),
    Location(Location),
    LocationInfo(Location),
    Satellites(Vec<SvInfo>),
    Nmea { timestamp_ms: u64, sentence: String },
    Data(GnssData),
    Measurements(Measurements),
    EngineLocations(Vec<EngineLocation>),
    Batch { fixes: Vec<Location>, status: BatchingStatus },
    TripDistanceCompleted(u32),
    GeofenceBreach(GeofenceBreach),
    SystemInfo(SystemInfo),
}

/// Listener that forwards every call as a [`ClientEvent`] over a channel.
#[derive(Debug, Clone)]
pub struct EventForwarder {
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl EventForwarder {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: ClientEvent) {
        // receiver gone: nobody is interested any more
        let _ = self.tx.send(event);
    }
}

impl LocationListener for EventForwarder {
    fn on_capabilities(&self, capabilities: u64) {
        self.forward(ClientEvent::Capabilities(capabilities));
    }

    fn on_location(&self, location: &Location) {
        self.forward(ClientEvent::Location(location.clone()));
    }

    fn on_location_info(&self, location: &Location) {
        self.forward(ClientEvent::LocationInfo(location.clone()));
    }

    fn on_satellites(&self, satellites: &[SvInfo]) {
        self.forward(ClientEvent::Satellites(satellites.to_vec()));
    }

    fn on_nmea(&self, timestamp_ms: u64, sentence: &str) {
        self.forward(ClientEvent::Nmea {
            timestamp_ms,
            sentence: sentence.to_string(),
        });
    }

    fn on_data(&self, data: &GnssData) {
        self.forward(ClientEvent::Data(data.clone()));
    }

    fn on_measurements(&self, measurements: &Measurements) {
        self.forward(ClientEvent::Measurements(measurements.clone()));
    }

    fn on_engine_locations(&self, locations: &[EngineLocation]) {
        self.forward(ClientEvent::EngineLocations(locations.to_vec()));
    }

    fn on_batch(&self, fixes: &[Location], status: BatchingStatus) {
        self.forward(ClientEvent::Batch {
            fixes: fixes.to_vec(),
            status,
        });
    }

    fn on_trip_distance_completed(&self, distance_m: u32) {
        self.forward(ClientEvent::TripDistanceCompleted(distance_m));
    }

    fn on_geofence_breach(&self, breach: &GeofenceBreach) {
        self.forward(ClientEvent::GeofenceBreach(breach.clone()));
    }

    fn on_system_info(&self, info: &SystemInfo) {
        self.forward(ClientEvent::SystemInfo(*info));
    }
}
