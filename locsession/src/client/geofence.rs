//! Geofence operations on the loop.

use std::collections::VecDeque;

use tracing::{debug, warn};

use super::listener::CollectiveCallback;
use super::state::ClientCore;
use crate::error::LocationResponse;
use crate::exchange::RequestResult;
use crate::protocol::types::{BreachType, GeofenceBreach, GeofenceOptions, GeofenceSpec, Location};
use crate::protocol::{EntryResult, GeofenceAddEntry, GeofenceModifyEntry, Indication, Request};
use crate::session::{GeofenceOp, GeofenceTarget};

type Outcomes = Vec<(u32, LocationResponse)>;

/// Per-entry results of a collective request, or one code for all entries.
fn collective_results(result: RequestResult) -> Result<Vec<EntryResult>, LocationResponse> {
    match result {
        Ok(Indication::CollectiveResponse { results, .. }) => Ok(results),
        Ok(other) => Err(other
            .status()
            .filter(|status| !status.is_success())
            .unwrap_or(LocationResponse::GeneralFailure)),
        Err(err) => Err(err.response()),
    }
}

fn all(ids: impl IntoIterator<Item = u32>, response: LocationResponse) -> Outcomes {
    ids.into_iter().map(|id| (id, response)).collect()
}

fn target_request(op: GeofenceOp, chunk: &[GeofenceTarget]) -> Request {
    let engine_ids = || chunk.iter().map(|t| t.engine_id).collect();
    match op {
        GeofenceOp::Remove => Request::RemoveGeofences {
            engine_ids: engine_ids(),
        },
        GeofenceOp::Pause => Request::PauseGeofences {
            engine_ids: engine_ids(),
        },
        GeofenceOp::Resume => Request::ResumeGeofences {
            engine_ids: engine_ids(),
        },
        GeofenceOp::Modify => Request::ModifyGeofences {
            entries: chunk
                .iter()
                .map(|t| GeofenceModifyEntry {
                    engine_id: t.engine_id,
                    options: t.options.unwrap_or_default(),
                })
                .collect(),
        },
    }
}

impl ClientCore {
    pub(super) fn add_geofences(&mut self, entries: Vec<(u32, GeofenceSpec)>, callback: CollectiveCallback) {
        let ids: Vec<u32> = entries.iter().map(|(id, _)| *id).collect();
        if !self.registered {
            callback(all(ids, LocationResponse::SystemNotReady));
            return;
        }
        match self.geofences.plan_add(entries) {
            Ok(chunks) => {
                debug!(count = ids.len(), chunks = chunks.len(), "Adding geofences");
                self.sync_bits();
                self.send_add_chunks(chunks.into(), Vec::with_capacity(ids.len()), callback);
            }
            Err(response) => callback(all(ids, response)),
        }
    }

    /// Re-adds every known geofence after the engine restarted, including
    /// ones still pending from an earlier restart.
    pub(super) fn readd_geofences(&mut self) {
        let (generation, chunks) = self.geofences.plan_readd();
        debug!(generation, chunks = chunks.len(), "Re-adding geofences");
        self.send_readd_chunks(generation, chunks.into(), 0);
    }

    fn send_readd_chunks(
        &mut self,
        generation: u64,
        mut chunks: VecDeque<Vec<GeofenceAddEntry>>,
        lost: usize,
    ) {
        if !self.geofences.is_current_readd(generation) {
            debug!(generation, "Re-add superseded by a later restart");
            return;
        }
        let Some(chunk) = chunks.pop_front() else {
            self.sync_bits();
            if lost > 0 {
                warn!(lost, "Geofences lost while re-adding");
            }
            return;
        };

        let request = Request::AddGeofences {
            entries: chunk.clone(),
        };
        self.issue(request, move |core, result| {
            let outcomes = core
                .geofences
                .on_readd_response(generation, &chunk, collective_results(result));
            let lost = lost + outcomes.iter().filter(|(_, r)| !r.is_success()).count();
            core.send_readd_chunks(generation, chunks, lost);
        });
    }

    fn send_add_chunks(
        &mut self,
        mut chunks: VecDeque<Vec<GeofenceAddEntry>>,
        mut outcomes: Outcomes,
        callback: CollectiveCallback,
    ) {
        let Some(chunk) = chunks.pop_front() else {
            self.sync_bits();
            callback(outcomes);
            return;
        };

        let request = Request::AddGeofences {
            entries: chunk.clone(),
        };
        self.issue(request, move |core, result| {
            outcomes.extend(core.geofences.on_add_response(&chunk, collective_results(result)));
            core.send_add_chunks(chunks, outcomes, callback);
        });
    }

    pub(super) fn geofence_targets(
        &mut self,
        op: GeofenceOp,
        ids: Vec<(u32, Option<GeofenceOptions>)>,
        callback: CollectiveCallback,
    ) {
        if !self.registered {
            callback(all(ids.into_iter().map(|(id, _)| id), LocationResponse::SystemNotReady));
            return;
        }
        match self.geofences.plan_targets(&ids) {
            Ok(chunks) => {
                debug!(?op, count = ids.len(), "Geofence operation");
                self.send_target_chunks(op, chunks.into(), Vec::with_capacity(ids.len()), callback);
            }
            Err(response) => callback(all(ids.into_iter().map(|(id, _)| id), response)),
        }
    }

    fn send_target_chunks(
        &mut self,
        op: GeofenceOp,
        mut chunks: VecDeque<Vec<GeofenceTarget>>,
        mut outcomes: Outcomes,
        callback: CollectiveCallback,
    ) {
        let Some(chunk) = chunks.pop_front() else {
            self.sync_bits();
            callback(outcomes);
            return;
        };

        self.issue(target_request(op, &chunk), move |core, result| {
            outcomes.extend(core.geofences.on_targets_response(op, &chunk, collective_results(result)));
            core.send_target_chunks(op, chunks, outcomes, callback);
        });
    }

    pub(super) fn on_breach(
        &mut self,
        engine_ids: &[u32],
        breach_type: BreachType,
        location: Location,
        timestamp_ms: u64,
    ) {
        let ids = self.geofences.resolve_breach(engine_ids);
        if ids.is_empty() {
            self.drop_indication("geofence breach");
            return;
        }
        self.listener.on_geofence_breach(&GeofenceBreach {
            ids,
            breach_type,
            location,
            timestamp_ms,
        });
    }
}
