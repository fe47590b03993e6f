//! Payload types carried by requests and indications.

use serde::{Deserialize, Serialize};

use crate::mask::EventMask;

/// A single position fix.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// UTC timestamp in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    pub latitude: f64,
    pub longitude: f64,
    /// Altitude above the WGS-84 ellipsoid in meters.
    pub altitude: f64,
    /// Horizontal accuracy in meters.
    pub horizontal_accuracy: f32,
    /// Speed in meters per second.
    pub speed: f32,
    /// Bearing in degrees.
    pub bearing: f32,
}

impl Location {
    /// Creates a fix with only a timestamp and coordinates set.
    pub fn at(timestamp_ms: u64, latitude: f64, longitude: f64) -> Self {
        Self {
            timestamp_ms,
            latitude,
            longitude,
            ..Self::default()
        }
    }
}

/// Options for a tracking session.
///
/// A session with zero interval and zero distance is *passive*: the client
/// listens to reports produced for other clients without driving the
/// engine's fix cadence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackingOptions {
    /// Minimum time between reports, in milliseconds.
    pub min_interval_ms: u32,
    /// Minimum distance between reports, in meters.
    pub min_distance_m: u32,
    /// Report kinds delivered while the session is active.
    pub reports: EventMask,
}

impl TrackingOptions {
    /// Time-based tracking with position reports only.
    pub fn new(min_interval_ms: u32, min_distance_m: u32) -> Self {
        Self {
            min_interval_ms,
            min_distance_m,
            reports: EventMask::POSITION,
        }
    }

    /// Passive listening with position reports only.
    pub fn passive() -> Self {
        Self::new(0, 0)
    }

    /// Replaces the requested report kinds.
    pub fn with_reports(mut self, reports: EventMask) -> Self {
        self.reports = reports;
        self
    }

    /// True when neither interval nor distance drive the engine.
    pub fn is_passive(&self) -> bool {
        self.min_interval_ms == 0 && self.min_distance_m == 0
    }
}

impl Default for TrackingOptions {
    fn default() -> Self {
        Self::passive()
    }
}

/// Batching flavour.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BatchingMode {
    /// Buffer fixes until read back.
    Routine,
    /// Outdoor trip: buffer until the trip distance has been covered.
    Trip {
        /// Distance that completes the trip, in meters.
        trip_distance_m: u32,
    },
}

impl BatchingMode {
    /// True for the same variant, ignoring the trip distance.
    pub fn same_kind(&self, other: &BatchingMode) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

/// Options for a batching session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchingOptions {
    pub min_interval_ms: u32,
    pub min_distance_m: u32,
    pub mode: BatchingMode,
}

impl BatchingOptions {
    pub fn routine(min_interval_ms: u32, min_distance_m: u32) -> Self {
        Self {
            min_interval_ms,
            min_distance_m,
            mode: BatchingMode::Routine,
        }
    }

    pub fn trip(min_interval_ms: u32, trip_distance_m: u32) -> Self {
        Self {
            min_interval_ms,
            min_distance_m: 0,
            mode: BatchingMode::Trip { trip_distance_m },
        }
    }
}

/// Progress reported with batching indications.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchingStatus {
    /// Fixes are still being buffered.
    Active,
    /// The session finished.
    Done,
    /// The trip distance was reached; the engine stops buffering.
    TripCompleted,
}

/// Which transitions of a geofence raise breach events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BreachMask(pub u8);

impl BreachMask {
    pub const ENTER: BreachMask = BreachMask(1 << 0);
    pub const EXIT: BreachMask = BreachMask(1 << 1);
    pub const DWELL_IN: BreachMask = BreachMask(1 << 2);
    pub const DWELL_OUT: BreachMask = BreachMask(1 << 3);

    pub fn contains(self, other: BreachMask) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for BreachMask {
    type Output = BreachMask;

    fn bitor(self, rhs: BreachMask) -> BreachMask {
        BreachMask(self.0 | rhs.0)
    }
}

/// Behavioural options of a geofence. These can be changed with modify.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GeofenceOptions {
    pub breach_mask: BreachMask,
    /// How quickly the engine should detect breaches, in milliseconds.
    pub responsiveness_ms: u32,
    /// Dwell time for dwell breaches, in seconds.
    pub dwell_time_s: u32,
}

impl Default for GeofenceOptions {
    fn default() -> Self {
        Self {
            breach_mask: BreachMask::ENTER | BreachMask::EXIT,
            responsiveness_ms: 30_000,
            dwell_time_s: 0,
        }
    }
}

/// Circular region of a geofence. Fixed for the lifetime of the geofence.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeofenceArea {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_m: f64,
}

/// Everything needed to (re-)add a geofence.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeofenceSpec {
    pub options: GeofenceOptions,
    pub area: GeofenceArea,
}

impl GeofenceSpec {
    pub fn circle(latitude: f64, longitude: f64, radius_m: f64) -> Self {
        Self {
            options: GeofenceOptions::default(),
            area: GeofenceArea {
                latitude,
                longitude,
                radius_m,
            },
        }
    }
}

/// Geofence transition reported by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreachType {
    Enter,
    Exit,
    DwellIn,
    DwellOut,
}

/// Breach event as delivered to the listener, keyed by client-visible ids.
#[derive(Clone, Debug, PartialEq)]
pub struct GeofenceBreach {
    pub ids: Vec<u32>,
    pub breach_type: BreachType,
    pub location: Location,
    pub timestamp_ms: u64,
}

/// One satellite in view.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SvInfo {
    pub svid: u16,
    pub constellation: u8,
    pub cn0_dbhz: f32,
    pub used_in_fix: bool,
}

/// Jammer and AGC data.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GnssData {
    pub jammer_ind: Vec<f64>,
    pub agc: Vec<f64>,
}

/// Raw measurement snapshot.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Measurements {
    pub clock_ns: i64,
    pub pseudoranges_m: Vec<f64>,
}

/// A fix attributed to one of the engine's positioning sources.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineLocation {
    pub engine: u8,
    pub location: Location,
}

/// Location system information such as pending leap seconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub current_leap_seconds: u8,
    pub leap_second_change_pending: bool,
}

/// Cumulative GNSS energy consumption.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnergyConsumed {
    /// Energy in units of 0.1 milli-watt-second.
    pub total_energy_consumed: u64,
}

/// Positioning mode of the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationMode {
    Standalone,
    MsBased,
    MsAssisted,
}
