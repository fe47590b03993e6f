//! Event subscription mask and its negotiator.
//!
//! Every session (and a few non-session holders) asks for the indication
//! kinds it needs. The negotiator unions those requests, filters the result
//! through two global gates and decides whether the engine subscription has
//! to change.
//!
//! ```text
//!  holders ──► union ──► gate: no session active ──► gate: engine off ──► target
//!                                                                          │
//!                     target == last applied? ── yes ──► nothing to send   │
//!                                      │ no                                │
//!                                      ▼                                   │
//!                          UpdateCallbacks{target} ◄───────────────────────┘
//! ```
//!
//! `last_applied` only moves when the engine acknowledges a registration, so
//! a failed registration is retried by the next recompute.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};

use tracing::debug;

/// Set of indication kinds the engine should deliver.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventMask(pub u32);

impl EventMask {
    pub const EMPTY: EventMask = EventMask(0);
    /// Distance/time based position reports.
    pub const POSITION: EventMask = EventMask(1 << 0);
    /// Detailed GNSS location info.
    pub const LOCATION_INFO: EventMask = EventMask(1 << 1);
    pub const SV: EventMask = EventMask(1 << 2);
    pub const NMEA: EventMask = EventMask(1 << 3);
    pub const DATA: EventMask = EventMask(1 << 4);
    pub const SYSTEM_INFO: EventMask = EventMask(1 << 5);
    pub const BATCHING: EventMask = EventMask(1 << 6);
    pub const BATCHING_STATUS: EventMask = EventMask(1 << 7);
    pub const GEOFENCE_BREACH: EventMask = EventMask(1 << 8);
    pub const ENGINE_LOCATIONS: EventMask = EventMask(1 << 9);
    pub const SIMPLE_LOCATION: EventMask = EventMask(1 << 10);
    pub const MEASUREMENTS: EventMask = EventMask(1 << 11);
    pub const SV_POLYNOMIAL: EventMask = EventMask(1 << 12);
    /// Engine power transitions; also carries the busy-resume signal.
    pub const ENGINE_STATE: EventMask = EventMask(1 << 13);

    /// Bits that only make sense while a session is producing fixes.
    pub const SESSION_ONLY: EventMask = EventMask(
        Self::POSITION.0
            | Self::LOCATION_INFO.0
            | Self::SV.0
            | Self::NMEA.0
            | Self::DATA.0
            | Self::ENGINE_LOCATIONS.0
            | Self::SIMPLE_LOCATION.0
            | Self::MEASUREMENTS.0
            | Self::SV_POLYNOMIAL.0,
    );

    /// Bits that only make sense while the engine is powered.
    pub const ENGINE_ON_ONLY: EventMask = EventMask(
        Self::SV.0 | Self::NMEA.0 | Self::DATA.0 | Self::MEASUREMENTS.0 | Self::SV_POLYNOMIAL.0,
    );

    /// Augmented reporting that needs a full aiding snapshot when first enabled.
    pub const AUGMENTED: EventMask = EventMask(Self::MEASUREMENTS.0 | Self::SV_POLYNOMIAL.0);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: EventMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: EventMask) -> bool {
        self.0 & other.0 != 0
    }

    /// Bits set in `self` but not in `other`.
    pub fn difference(self, other: EventMask) -> EventMask {
        EventMask(self.0 & !other.0)
    }
}

impl BitOr for EventMask {
    type Output = EventMask;

    fn bitor(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for EventMask {
    fn bitor_assign(&mut self, rhs: EventMask) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for EventMask {
    type Output = EventMask;

    fn bitand(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 & rhs.0)
    }
}

impl Not for EventMask {
    type Output = EventMask;

    fn not(self) -> EventMask {
        EventMask(!self.0)
    }
}

impl fmt::Display for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Who holds bits in the negotiator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MaskHolder {
    Tracking,
    Batching,
    Geofencing,
    /// The system-info listener.
    SystemInfo,
    /// The busy-retry queue waiting for the engine-state resume signal.
    BusyRetry,
}

impl MaskHolder {
    /// Whether this holder counts as an active session for gating.
    pub fn is_session(self) -> bool {
        matches!(
            self,
            MaskHolder::Tracking | MaskHolder::Batching | MaskHolder::Geofencing
        )
    }
}

/// Registration the negotiator wants sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Registration {
    pub mask: EventMask,
}

/// Follow-up to an acknowledged registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AidingDataRequest {
    /// Augmented bits that were newly enabled.
    pub mask: EventMask,
}

/// Aggregates holder bits into the engine subscription.
#[derive(Debug, Default)]
pub struct EventMaskNegotiator {
    holders: BTreeMap<MaskHolder, EventMask>,
    engine_on: bool,
    last_applied: EventMask,
    in_flight: Option<EventMask>,
}

impl EventMaskNegotiator {
    pub fn new() -> Self {
        Self {
            holders: BTreeMap::new(),
            engine_on: true,
            last_applied: EventMask::EMPTY,
            in_flight: None,
        }
    }

    /// Sets (replaces) the bits a holder needs. Empty bits release the holder.
    pub fn request_bits(&mut self, holder: MaskHolder, bits: EventMask) {
        if bits.is_empty() {
            self.holders.remove(&holder);
        } else {
            self.holders.insert(holder, bits);
        }
    }

    pub fn release_bits(&mut self, holder: MaskHolder) {
        self.holders.remove(&holder);
    }

    pub fn holds(&self, holder: MaskHolder) -> bool {
        self.holders.contains_key(&holder)
    }

    /// Records the engine power state.
    pub fn set_engine_on(&mut self, on: bool) {
        self.engine_on = on;
    }

    pub fn engine_on(&self) -> bool {
        self.engine_on
    }

    /// Union of every holder with both gates applied.
    pub fn target(&self) -> EventMask {
        let mut mask = self
            .holders
            .values()
            .fold(EventMask::EMPTY, |acc, bits| acc | *bits);

        let session_active = self.holders.keys().any(|holder| holder.is_session());
        if !session_active {
            mask = mask & !EventMask::SESSION_ONLY;
        }
        if !self.engine_on {
            mask = mask & !EventMask::ENGINE_ON_ONLY;
        }
        mask
    }

    /// Returns the registration to send, if the target differs from what the
    /// engine has (or is about to have).
    pub fn recompute(&mut self) -> Option<Registration> {
        let target = self.target();
        let effective = self.in_flight.unwrap_or(self.last_applied);
        if target == effective {
            return None;
        }
        debug!(
            target = %target,
            last_applied = %self.last_applied,
            "Subscription mask changed"
        );
        self.in_flight = Some(target);
        Some(Registration { mask: target })
    }

    /// The engine acknowledged `mask`. Returns an aiding-data request when
    /// augmented bits were newly enabled.
    pub fn on_applied(&mut self, mask: EventMask) -> Option<AidingDataRequest> {
        if self.in_flight == Some(mask) {
            self.in_flight = None;
        }
        let newly_augmented = (mask & EventMask::AUGMENTED)
            .difference(self.last_applied & EventMask::AUGMENTED);
        self.last_applied = mask;
        if newly_augmented.is_empty() {
            None
        } else {
            Some(AidingDataRequest {
                mask: newly_augmented,
            })
        }
    }

    /// The registration for `mask` failed; `last_applied` stays put.
    pub fn on_failed(&mut self, mask: EventMask) {
        if self.in_flight == Some(mask) {
            self.in_flight = None;
        }
    }

    /// The engine lost every subscription (restart).
    pub fn reset_applied(&mut self) {
        self.last_applied = EventMask::EMPTY;
        self.in_flight = None;
    }

    pub fn last_applied(&self) -> EventMask {
        self.last_applied
    }
}
