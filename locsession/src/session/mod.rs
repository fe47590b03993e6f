//! Per-capability session state machines.
//!
//! Tracking and batching share one machine, [`OptionsSession`], which owns
//! the option diffing and decides which requests a start/update/stop needs.
//! Geofencing is a batch-of-ids machine of its own ([`GeofenceSession`]).
//!
//! ```text
//!            start (not registered)
//! INACTIVE ─────────────────────────────► PENDING
//!    │  start                               │ registration / start acked
//!    └────────────────► PENDING ──────────► ACTIVE ◄──────┐
//!                                             │ update    │ acked
//!                                             ▼           │
//!                                      ACTIVE_UPDATING ───┘
//!
//!  stop: any state ──► INACTIVE (best effort, never blocks)
//! ```
//!
//! The machines are pure: they return a [`Plan`] and the message loop
//! turns it into requests. None of them talk to the engine directly.

mod batching;
mod geofence;
mod options;
mod tracking;

pub use batching::TripReport;
pub use geofence::{GeofenceOp, GeofenceSession, GeofenceTarget};
pub use options::{OptionsSession, Plan, SessionOptions, Step, StepKind};

use std::fmt;

/// Capability a session belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    Tracking,
    Batching,
    Geofencing,
}

/// Lifecycle state of a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionState {
    /// No session.
    #[default]
    Inactive,
    /// Requested but not yet confirmed by the engine (engine not registered
    /// yet, or start in flight).
    Pending,
    /// Running with `active_options`.
    Active,
    /// Running; an option update is in flight.
    ActiveUpdating,
}

impl SessionState {
    /// Whether the caller sees the session as running.
    pub fn is_active(self) -> bool {
        !matches!(self, SessionState::Inactive)
    }
}

/// Identity of one incarnation of a session.
///
/// A fresh id is allocated whenever a session (re)starts, so responses to
/// requests issued for an earlier incarnation can be recognised as stale.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SessionId(u32);

impl SessionId {
    pub const INVALID: SessionId = SessionId(0);

    pub fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn value(self) -> u32 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
