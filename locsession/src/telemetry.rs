//! Client telemetry.
//!
//! Lock-free counters updated from the message loop and request workers,
//! read through point-in-time snapshots.
//!
//! ```text
//! CRE / loop / workers ─────► ClientMetrics ─────► TelemetrySnapshot ─────► CLI, tests
//!                             (atomic counters)    (plain copy)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Atomic counters shared by the client's components.
#[derive(Debug, Default)]
pub struct ClientMetrics {
    requests_sent: AtomicU64,
    responses_matched: AtomicU64,
    busy_captured: AtomicU64,
    resends: AtomicU64,
    timeouts: AtomicU64,
    stale_responses: AtomicU64,
    indications_dropped: AtomicU64,
}

impl ClientMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_sent(&self) {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn response_matched(&self) {
        self.responses_matched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn busy_captured(&self) {
        self.busy_captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn resent(&self) {
        self.resends.fetch_add(1, Ordering::Relaxed);
    }

    pub fn timed_out(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stale_response(&self) {
        self.stale_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn indication_dropped(&self) {
        self.indications_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            responses_matched: self.responses_matched.load(Ordering::Relaxed),
            busy_captured: self.busy_captured.load(Ordering::Relaxed),
            resends: self.resends.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            stale_responses: self.stale_responses.load(Ordering::Relaxed),
            indications_dropped: self.indications_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ClientMetrics`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TelemetrySnapshot {
    /// Payloads handed to the transport, resends included.
    pub requests_sent: u64,
    pub responses_matched: u64,
    pub busy_captured: u64,
    pub resends: u64,
    pub timeouts: u64,
    /// Responses for a session that had moved on.
    pub stale_responses: u64,
    pub indications_dropped: u64,
}
