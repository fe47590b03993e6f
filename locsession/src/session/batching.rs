//! Batching sessions.
//!
//! Routine and trip batching are different engine modes; switching between
//! them is a stop-then-start. Changing only intervals, distances or the trip
//! length is an update.

use tracing::info;

use super::options::SessionOptions;
use crate::mask::EventMask;
use crate::protocol::types::{BatchingMode, BatchingOptions};

impl SessionOptions for BatchingOptions {
    fn changes_kind(&self, other: &Self) -> bool {
        !self.mode.same_kind(&other.mode)
    }

    fn drives_engine(&self) -> bool {
        true
    }

    fn required_bits(&self) -> EventMask {
        EventMask::BATCHING | EventMask::BATCHING_STATUS
    }
}

/// Reports the completed distance of a trip exactly once per session.
#[derive(Debug, Default)]
pub struct TripReport {
    reported: bool,
}

impl TripReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-arms the report for a new session.
    pub fn reset(&mut self) {
        self.reported = false;
    }

    /// Returns the distance to report if the trip in `options` has now been
    /// covered and was not reported before.
    pub fn check(&mut self, options: Option<&BatchingOptions>, accumulated_m: Option<u32>) -> Option<u32> {
        if self.reported {
            return None;
        }
        let BatchingMode::Trip { trip_distance_m } = options?.mode else {
            return None;
        };
        let accumulated = accumulated_m?;
        if accumulated < trip_distance_m {
            return None;
        }
        self.reported = true;
        info!(accumulated_m = accumulated, trip_distance_m, "Trip distance completed");
        Some(accumulated)
    }
}
