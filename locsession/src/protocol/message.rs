//! Typed requests, indications and their envelopes.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::types::{
    BatchingOptions, BatchingStatus, BreachType, EnergyConsumed, EngineLocation, GeofenceOptions,
    GeofenceSpec, GnssData, Location, Measurements, OperationMode, SvInfo, SystemInfo,
    TrackingOptions,
};
use crate::error::LocationResponse;
use crate::mask::EventMask;

/// Wire message identifiers.
///
/// Each request kind has its own id; the engine echoes it in the matching
/// response so the request engine can correlate the two.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u32)]
pub enum MessageId {
    ClientRegister = 1,
    ClientDeregister = 2,
    Capabilities = 3,
    EngineRestarted = 4,
    StartTracking = 5,
    StopTracking = 6,
    UpdateCallbacks = 7,
    UpdateTrackingOptions = 8,
    UpdateNetworkAvailability = 11,
    Location = 12,
    LocationInfo = 13,
    SatelliteVehicle = 14,
    Nmea = 15,
    Data = 16,
    GetGnssEnergyConsumed = 17,
    SystemInfo = 18,
    EngineLocations = 19,
    StartBatching = 20,
    StopBatching = 21,
    UpdateBatchingOptions = 22,
    Batching = 23,
    AddGeofences = 24,
    RemoveGeofences = 25,
    ModifyGeofences = 26,
    PauseGeofences = 27,
    ResumeGeofences = 28,
    GeofenceBreach = 29,
    Measurements = 30,
    GetSingleTerrestrialPosition = 31,
    SingleTerrestrialPosition = 32,
    GetBatchedLocations = 40,
    BatchedLocations = 41,
    RequestAidingData = 42,
    EngineState = 43,
    SetOperationMode = 44,
    SetServerUrl = 45,
    GenericResponse = 50,
    CollectiveResponse = 51,
    PingTest = 99,
}

impl MessageId {
    /// Numeric wire value.
    pub fn value(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.value())
    }
}

/// One geofence in an add request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeofenceAddEntry {
    pub client_id: u32,
    pub spec: GeofenceSpec,
}

/// One geofence in a modify request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeofenceModifyEntry {
    pub engine_id: u32,
    pub options: GeofenceOptions,
}

/// Requests sent from the client to the engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Request {
    ClientRegister,
    ClientDeregister,
    /// Replace the set of indications the engine sends to this client.
    UpdateCallbacks { mask: EventMask },
    /// Ask for a full snapshot of augmented reporting data.
    RequestAidingData { mask: EventMask },
    StartTracking { session: u32, options: TrackingOptions },
    StopTracking { session: u32 },
    UpdateTrackingOptions { session: u32, options: TrackingOptions },
    StartBatching { session: u32, options: BatchingOptions },
    StopBatching { session: u32 },
    UpdateBatchingOptions { session: u32, options: BatchingOptions },
    /// Read up to `max_entries` buffered fixes, oldest first.
    GetBatchedLocations { max_entries: u32 },
    AddGeofences { entries: Vec<GeofenceAddEntry> },
    RemoveGeofences { engine_ids: Vec<u32> },
    ModifyGeofences { entries: Vec<GeofenceModifyEntry> },
    PauseGeofences { engine_ids: Vec<u32> },
    ResumeGeofences { engine_ids: Vec<u32> },
    UpdateNetworkAvailability { available: bool },
    GetGnssEnergyConsumed,
    GetSingleTerrestrialPosition { timeout_ms: u32 },
    SetOperationMode { mode: OperationMode },
    SetServerUrl { url: String },
    PingTest { payload: u32 },
}

impl Request {
    /// The id this request travels under and is correlated by.
    pub fn message_id(&self) -> MessageId {
        match self {
            Request::ClientRegister => MessageId::ClientRegister,
            Request::ClientDeregister => MessageId::ClientDeregister,
            Request::UpdateCallbacks { .. } => MessageId::UpdateCallbacks,
            Request::RequestAidingData { .. } => MessageId::RequestAidingData,
            Request::StartTracking { .. } => MessageId::StartTracking,
            Request::StopTracking { .. } => MessageId::StopTracking,
            Request::UpdateTrackingOptions { .. } => MessageId::UpdateTrackingOptions,
            Request::StartBatching { .. } => MessageId::StartBatching,
            Request::StopBatching { .. } => MessageId::StopBatching,
            Request::UpdateBatchingOptions { .. } => MessageId::UpdateBatchingOptions,
            Request::GetBatchedLocations { .. } => MessageId::GetBatchedLocations,
            Request::AddGeofences { .. } => MessageId::AddGeofences,
            Request::RemoveGeofences { .. } => MessageId::RemoveGeofences,
            Request::ModifyGeofences { .. } => MessageId::ModifyGeofences,
            Request::PauseGeofences { .. } => MessageId::PauseGeofences,
            Request::ResumeGeofences { .. } => MessageId::ResumeGeofences,
            Request::UpdateNetworkAvailability { .. } => MessageId::UpdateNetworkAvailability,
            Request::GetGnssEnergyConsumed => MessageId::GetGnssEnergyConsumed,
            Request::GetSingleTerrestrialPosition { .. } => {
                MessageId::GetSingleTerrestrialPosition
            }
            Request::SetOperationMode { .. } => MessageId::SetOperationMode,
            Request::SetServerUrl { .. } => MessageId::SetServerUrl,
            Request::PingTest { .. } => MessageId::PingTest,
        }
    }
}

/// Per-entry outcome inside a collective geofence response.
///
/// `id` echoes the id the request carried at the same position: the client
/// id for adds, the engine id for every other operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryResult {
    pub id: u32,
    pub engine_id: u32,
    pub response: LocationResponse,
}

/// Messages from the engine, solicited or not.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Indication {
    /// Registration finished; the engine is ready to serve this client.
    Capabilities { capabilities: u64 },
    /// The engine restarted and forgot every client.
    EngineRestarted,
    /// Single-status response to `request`.
    Response {
        request: MessageId,
        response: LocationResponse,
    },
    /// Per-entry response to a geofence batch operation.
    CollectiveResponse {
        request: MessageId,
        results: Vec<EntryResult>,
    },
    /// Answer to [`Request::GetBatchedLocations`].
    BatchedLocations {
        fixes: Vec<Location>,
        /// Distance covered by the current trip, when trip batching.
        accumulated_distance_m: Option<u32>,
    },
    EnergyConsumed(EnergyConsumed),
    SingleTerrestrialPosition {
        response: LocationResponse,
        location: Option<Location>,
    },
    PingTest { payload: u32 },
    /// Engine power state. `on: true` also signals that a busy engine resumed.
    EngineState { on: bool },
    Location(Location),
    LocationInfo(Location),
    SatelliteVehicles(Vec<SvInfo>),
    Nmea { timestamp_ms: u64, nmea: String },
    Data(GnssData),
    Measurements(Measurements),
    EngineLocations(Vec<EngineLocation>),
    Batching {
        status: BatchingStatus,
        fixes: Vec<Location>,
    },
    GeofenceBreach {
        engine_ids: Vec<u32>,
        breach_type: BreachType,
        location: Location,
        timestamp_ms: u64,
    },
    SystemInfo(SystemInfo),
}

impl Indication {
    /// Message id the indication travels under.
    pub fn message_id(&self) -> MessageId {
        match self {
            Indication::Capabilities { .. } => MessageId::Capabilities,
            Indication::EngineRestarted => MessageId::EngineRestarted,
            Indication::Response { .. } => MessageId::GenericResponse,
            Indication::CollectiveResponse { .. } => MessageId::CollectiveResponse,
            Indication::BatchedLocations { .. } => MessageId::BatchedLocations,
            Indication::EnergyConsumed(_) => MessageId::GetGnssEnergyConsumed,
            Indication::SingleTerrestrialPosition { .. } => MessageId::SingleTerrestrialPosition,
            Indication::PingTest { .. } => MessageId::PingTest,
            Indication::EngineState { .. } => MessageId::EngineState,
            Indication::Location(_) => MessageId::Location,
            Indication::LocationInfo(_) => MessageId::LocationInfo,
            Indication::SatelliteVehicles(_) => MessageId::SatelliteVehicle,
            Indication::Nmea { .. } => MessageId::Nmea,
            Indication::Data(_) => MessageId::Data,
            Indication::Measurements(_) => MessageId::Measurements,
            Indication::EngineLocations(_) => MessageId::EngineLocations,
            Indication::Batching { .. } => MessageId::Batching,
            Indication::GeofenceBreach { .. } => MessageId::GeofenceBreach,
            Indication::SystemInfo(_) => MessageId::SystemInfo,
        }
    }

    /// The request kind this indication answers, if it is a response.
    pub fn correlation(&self) -> Option<MessageId> {
        match self {
            Indication::Response { request, .. } => Some(*request),
            Indication::CollectiveResponse { request, .. } => Some(*request),
            Indication::BatchedLocations { .. } => Some(MessageId::GetBatchedLocations),
            Indication::EnergyConsumed(_) => Some(MessageId::GetGnssEnergyConsumed),
            Indication::SingleTerrestrialPosition { .. } => {
                Some(MessageId::GetSingleTerrestrialPosition)
            }
            Indication::PingTest { .. } => Some(MessageId::PingTest),
            _ => None,
        }
    }

    /// Status carried by a response, if it carries a single one.
    pub fn status(&self) -> Option<LocationResponse> {
        match self {
            Indication::Response { response, .. } => Some(*response),
            Indication::SingleTerrestrialPosition { response, .. } => Some(*response),
            _ => None,
        }
    }
}

/// Client-to-engine envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Outbound {
    /// Channel the engine must address its indications to.
    pub socket_name: String,
    pub request: Request,
}

/// Engine-to-client envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Inbound {
    /// Channel this indication is addressed to.
    pub socket_name: String,
    pub indication: Indication,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_responses_correlate_to_request_kind() {
        let ind = Indication::Response {
            request: MessageId::StartTracking,
            response: LocationResponse::Success,
        };
        assert_eq!(ind.correlation(), Some(MessageId::StartTracking));

        let ind = Indication::BatchedLocations {
            fixes: vec![],
            accumulated_distance_m: None,
        };
        assert_eq!(ind.correlation(), Some(MessageId::GetBatchedLocations));
    }

    #[test]
    fn test_reports_do_not_correlate() {
        assert_eq!(Indication::Location(Location::default()).correlation(), None);
        assert_eq!(Indication::EngineState { on: true }.correlation(), None);
        assert_eq!(Indication::EngineRestarted.correlation(), None);
    }

    #[test]
    fn test_message_id_values_are_stable() {
        assert_eq!(MessageId::ClientRegister.value(), 1);
        assert_eq!(MessageId::StartTracking.value(), 5);
        assert_eq!(MessageId::UpdateCallbacks.value(), 7);
        assert_eq!(MessageId::AddGeofences.value(), 24);
        assert_eq!(MessageId::PingTest.value(), 99);
    }

    #[test]
    fn test_request_message_ids() {
        let req = Request::StopBatching { session: 3 };
        assert_eq!(req.message_id(), MessageId::StopBatching);
        let req = Request::PingTest { payload: 7 };
        assert_eq!(req.message_id(), MessageId::PingTest);
    }
}
