//! Geofencing session.
//!
//! Geofence operations work on batches of client ids. Adds reserve table
//! capacity up front; every other operation validates the whole batch
//! against the mapping before anything is sent, so a batch is either sent
//! in full or rejected in full. Collective responses are matched to the
//! request entries by position.
//!
//! After an engine restart every known geofence is re-added. Until the
//! engine answers, those geofences sit in a pending set tagged with a
//! generation; a second restart in the meantime re-adds the whole set again
//! under a new generation and answers to the older one are ignored.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::error::LocationResponse;
use crate::geofence_map::GeofenceMapping;
use crate::mask::EventMask;
use crate::protocol::types::{GeofenceOptions, GeofenceSpec};
use crate::protocol::{EntryResult, GeofenceAddEntry};

/// Operation on existing geofences.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeofenceOp {
    Remove,
    Pause,
    Resume,
    Modify,
}

/// One existing geofence targeted by an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GeofenceTarget {
    pub client_id: u32,
    pub engine_id: u32,
    /// New options, for modify.
    pub options: Option<GeofenceOptions>,
}

/// Geofence state owned by the message loop.
#[derive(Debug)]
pub struct GeofenceSession {
    mapping: GeofenceMapping,
    reserved: usize,
    /// Geofences being re-added after a restart, by client id.
    readding: BTreeMap<u32, GeofenceSpec>,
    readd_generation: u64,
    max_per_message: usize,
}

impl GeofenceSession {
    pub fn new(capacity: usize, max_per_message: usize) -> Self {
        Self {
            mapping: GeofenceMapping::new(capacity),
            reserved: 0,
            readding: BTreeMap::new(),
            readd_generation: 0,
            max_per_message: max_per_message.max(1),
        }
    }

    pub fn mapping(&self) -> &GeofenceMapping {
        &self.mapping
    }

    /// Whether any geofence exists or is being added.
    pub fn is_active(&self) -> bool {
        !self.mapping.is_empty() || self.reserved > 0 || !self.readding.is_empty()
    }

    /// Whether a restarted engine has geofences to be told about.
    pub fn needs_readd(&self) -> bool {
        !self.mapping.is_empty() || !self.readding.is_empty()
    }

    /// Number of geofences waiting for a re-add answer.
    pub fn pending_readds(&self) -> usize {
        self.readding.len()
    }

    pub fn is_current_readd(&self, generation: u64) -> bool {
        generation == self.readd_generation
    }

    pub fn required_bits(&self) -> EventMask {
        if self.is_active() {
            EventMask::GEOFENCE_BREACH
        } else {
            EventMask::EMPTY
        }
    }

    /// Reserves capacity for `entries` and splits them into request-sized
    /// chunks.
    ///
    /// The whole batch is refused with `CapacityExceeded` when the table
    /// cannot hold all of it.
    pub fn plan_add(
        &mut self,
        entries: Vec<(u32, GeofenceSpec)>,
    ) -> Result<Vec<Vec<GeofenceAddEntry>>, LocationResponse> {
        if entries.is_empty() {
            return Err(LocationResponse::InvalidParameter);
        }
        let used = self.mapping.len() + self.reserved + self.readding.len();
        if used + entries.len() > self.mapping.capacity() {
            warn!(
                requested = entries.len(),
                used,
                capacity = self.mapping.capacity(),
                "Geofence table full, rejecting add"
            );
            return Err(LocationResponse::CapacityExceeded);
        }
        self.reserved += entries.len();

        let entries: Vec<GeofenceAddEntry> = entries
            .into_iter()
            .map(|(client_id, spec)| GeofenceAddEntry { client_id, spec })
            .collect();
        Ok(entries
            .chunks(self.max_per_message)
            .map(<[GeofenceAddEntry]>::to_vec)
            .collect())
    }

    /// Moves every mapped geofence to the pending re-add set and plans
    /// re-adding the whole set, after an engine restart.
    ///
    /// Returns the generation the chunks belong to.
    pub fn plan_readd(&mut self) -> (u64, Vec<Vec<GeofenceAddEntry>>) {
        for (client_id, entry) in self.mapping.drain() {
            self.readding.insert(client_id, entry.spec);
        }
        self.readd_generation += 1;
        let entries: Vec<GeofenceAddEntry> = self
            .readding
            .iter()
            .map(|(client_id, spec)| GeofenceAddEntry {
                client_id: *client_id,
                spec: *spec,
            })
            .collect();
        let chunks = entries
            .chunks(self.max_per_message)
            .map(<[GeofenceAddEntry]>::to_vec)
            .collect();
        (self.readd_generation, chunks)
    }

    /// Applies the response to one re-add chunk. Answers for a superseded
    /// generation change nothing and yield no outcomes.
    pub fn on_readd_response(
        &mut self,
        generation: u64,
        sent: &[GeofenceAddEntry],
        result: Result<Vec<EntryResult>, LocationResponse>,
    ) -> Vec<(u32, LocationResponse)> {
        if !self.is_current_readd(generation) {
            debug!(generation, current = self.readd_generation, "Ignoring superseded re-add answer");
            return Vec::new();
        }
        for entry in sent {
            self.readding.remove(&entry.client_id);
        }
        self.apply_add_results(sent, result)
    }

    /// Applies the response to one add chunk. Returns the per-id outcome in
    /// request order.
    pub fn on_add_response(
        &mut self,
        sent: &[GeofenceAddEntry],
        result: Result<Vec<EntryResult>, LocationResponse>,
    ) -> Vec<(u32, LocationResponse)> {
        self.reserved = self.reserved.saturating_sub(sent.len());
        self.apply_add_results(sent, result)
    }

    fn apply_add_results(
        &mut self,
        sent: &[GeofenceAddEntry],
        result: Result<Vec<EntryResult>, LocationResponse>,
    ) -> Vec<(u32, LocationResponse)> {
        let results = match result {
            Ok(results) => results,
            Err(code) => return sent.iter().map(|e| (e.client_id, code)).collect(),
        };

        sent.iter()
            .enumerate()
            .map(|(pos, entry)| {
                let outcome = match results.get(pos) {
                    Some(r) if r.id != entry.client_id => {
                        warn!(position = pos, expected = entry.client_id, echoed = r.id, "Add response out of step with request");
                        LocationResponse::GeneralFailure
                    }
                    Some(r) if r.response.is_success() => {
                        match self.mapping.insert(entry.client_id, r.engine_id, entry.spec) {
                            Ok(()) => LocationResponse::Success,
                            Err(_) => LocationResponse::CapacityExceeded,
                        }
                    }
                    Some(r) => r.response,
                    None => LocationResponse::GeneralFailure,
                };
                (entry.client_id, outcome)
            })
            .collect()
    }

    /// Resolves `ids` to engine targets and splits them into request-sized
    /// chunks. Any unknown or repeated id rejects the whole batch.
    pub fn plan_targets(
        &self,
        ids: &[(u32, Option<GeofenceOptions>)],
    ) -> Result<Vec<Vec<GeofenceTarget>>, LocationResponse> {
        if ids.is_empty() {
            return Err(LocationResponse::InvalidParameter);
        }
        let mut targets = Vec::with_capacity(ids.len());
        for (pos, (client_id, options)) in ids.iter().enumerate() {
            let Some(engine_id) = self.mapping.engine_id(*client_id) else {
                debug!(client_id, "Unknown geofence id, rejecting batch");
                return Err(LocationResponse::InvalidParameter);
            };
            if ids[..pos].iter().any(|(earlier, _)| earlier == client_id) {
                debug!(client_id, "Repeated geofence id, rejecting batch");
                return Err(LocationResponse::InvalidParameter);
            }
            targets.push(GeofenceTarget {
                client_id: *client_id,
                engine_id,
                options: *options,
            });
        }
        Ok(targets
            .chunks(self.max_per_message)
            .map(<[GeofenceTarget]>::to_vec)
            .collect())
    }

    /// Applies the response to one remove/pause/resume/modify chunk.
    ///
    /// A failed entry is erased from the mapping, as is a removed one.
    pub fn on_targets_response(
        &mut self,
        op: GeofenceOp,
        sent: &[GeofenceTarget],
        result: Result<Vec<EntryResult>, LocationResponse>,
    ) -> Vec<(u32, LocationResponse)> {
        let results = match result {
            Ok(results) => results,
            Err(code) => {
                for target in sent {
                    self.mapping.remove(target.client_id);
                }
                return sent.iter().map(|t| (t.client_id, code)).collect();
            }
        };

        sent.iter()
            .enumerate()
            .map(|(pos, target)| {
                let outcome = match results.get(pos) {
                    Some(r) if r.id != target.engine_id => LocationResponse::GeneralFailure,
                    Some(r) => r.response,
                    None => LocationResponse::GeneralFailure,
                };

                if !outcome.is_success() || op == GeofenceOp::Remove {
                    self.mapping.remove(target.client_id);
                } else {
                    match op {
                        GeofenceOp::Pause => self.mapping.set_paused(target.client_id, true),
                        GeofenceOp::Resume => self.mapping.set_paused(target.client_id, false),
                        GeofenceOp::Modify => {
                            if let Some(options) = target.options {
                                self.mapping.set_options(target.client_id, options);
                            }
                        }
                        GeofenceOp::Remove => {}
                    }
                }
                (target.client_id, outcome)
            })
            .collect()
    }

    /// Client ids for the engine ids in a breach report. Unknown engine ids
    /// are dropped.
    pub fn resolve_breach(&self, engine_ids: &[u32]) -> Vec<u32> {
        engine_ids
            .iter()
            .filter_map(|engine_id| {
                let id = self.mapping.client_id(*engine_id);
                if id.is_none() {
                    warn!(engine_id, "Breach for unknown geofence");
                }
                id
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> GeofenceSpec {
        GeofenceSpec::circle(51.5, -0.12, 200.0)
    }

    fn result(id: u32, engine_id: u32, response: LocationResponse) -> EntryResult {
        EntryResult {
            id,
            engine_id,
            response,
        }
    }

    fn add_all(session: &mut GeofenceSession, ids: &[u32]) {
        let chunks = session
            .plan_add(ids.iter().map(|id| (*id, spec())).collect())
            .unwrap();
        for chunk in chunks {
            let results = chunk
                .iter()
                .map(|e| result(e.client_id, e.client_id + 100, LocationResponse::Success))
                .collect();
            session.on_add_response(&chunk, Ok(results));
        }
    }

    #[test]
    fn test_failed_entry_is_not_mapped() {
        let mut session = GeofenceSession::new(16, 20);
        let chunks = session
            .plan_add(vec![(1, spec()), (2, spec()), (3, spec())])
            .unwrap();
        assert_eq!(chunks.len(), 1);

        let outcome = session.on_add_response(
            &chunks[0],
            Ok(vec![
                result(1, 101, LocationResponse::Success),
                result(2, 0, LocationResponse::GeneralFailure),
                result(3, 103, LocationResponse::Success),
            ]),
        );
        assert_eq!(
            outcome,
            vec![
                (1, LocationResponse::Success),
                (2, LocationResponse::GeneralFailure),
                (3, LocationResponse::Success)
            ]
        );
        assert_eq!(session.mapping().client_ids(), vec![1, 3]);
        assert!(session.is_active());
    }

    #[test]
    fn test_add_is_split_by_message_limit() {
        let mut session = GeofenceSession::new(64, 20);
        let chunks = session
            .plan_add((1..=45).map(|id| (id, spec())).collect())
            .unwrap();
        let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![20, 20, 5]);
    }

    #[test]
    fn test_capacity_counts_in_flight_adds() {
        let mut session = GeofenceSession::new(4, 20);
        session.plan_add(vec![(1, spec()), (2, spec()), (3, spec())]).unwrap();
        assert_eq!(
            session.plan_add(vec![(4, spec()), (5, spec())]),
            Err(LocationResponse::CapacityExceeded)
        );
        assert!(session.plan_add(vec![(4, spec())]).is_ok());
    }

    #[test]
    fn test_missing_result_is_failure() {
        let mut session = GeofenceSession::new(8, 20);
        let chunks = session.plan_add(vec![(1, spec()), (2, spec())]).unwrap();
        let outcome = session.on_add_response(
            &chunks[0],
            Ok(vec![result(1, 101, LocationResponse::Success)]),
        );
        assert_eq!(outcome[1], (2, LocationResponse::GeneralFailure));
        assert_eq!(session.mapping().len(), 1);
    }

    #[test]
    fn test_request_failure_fails_every_entry() {
        let mut session = GeofenceSession::new(8, 20);
        let chunks = session.plan_add(vec![(1, spec()), (2, spec())]).unwrap();
        let outcome = session.on_add_response(&chunks[0], Err(LocationResponse::Timeout));
        assert!(outcome.iter().all(|(_, r)| *r == LocationResponse::Timeout));
        assert!(!session.is_active());
    }

    #[test]
    fn test_unknown_id_rejects_whole_batch() {
        let mut session = GeofenceSession::new(8, 20);
        add_all(&mut session, &[1, 2]);
        assert_eq!(
            session.plan_targets(&[(1, None), (9, None)]),
            Err(LocationResponse::InvalidParameter)
        );
        // nothing was touched
        assert_eq!(session.mapping().len(), 2);
    }

    #[test]
    fn test_repeated_id_rejects_batch() {
        let mut session = GeofenceSession::new(8, 20);
        add_all(&mut session, &[1]);
        assert!(session.plan_targets(&[(1, None), (1, None)]).is_err());
    }

    #[test]
    fn test_remove_erases_on_success() {
        let mut session = GeofenceSession::new(8, 20);
        add_all(&mut session, &[1, 2]);
        let chunks = session.plan_targets(&[(1, None)]).unwrap();
        assert_eq!(chunks[0][0].engine_id, 101);

        let outcome = session.on_targets_response(
            GeofenceOp::Remove,
            &chunks[0],
            Ok(vec![result(101, 101, LocationResponse::Success)]),
        );
        assert_eq!(outcome, vec![(1, LocationResponse::Success)]);
        assert_eq!(session.mapping().client_ids(), vec![2]);
    }

    #[test]
    fn test_failed_pause_erases_entry() {
        let mut session = GeofenceSession::new(8, 20);
        add_all(&mut session, &[1, 2]);
        let chunks = session.plan_targets(&[(1, None), (2, None)]).unwrap();
        session.on_targets_response(
            GeofenceOp::Pause,
            &chunks[0],
            Ok(vec![
                result(101, 101, LocationResponse::Success),
                result(102, 102, LocationResponse::GeneralFailure),
            ]),
        );
        assert_eq!(session.mapping().client_ids(), vec![1]);
        assert!(session.mapping().get(1).unwrap().paused);
    }

    #[test]
    fn test_modify_updates_stored_options() {
        let mut session = GeofenceSession::new(8, 20);
        add_all(&mut session, &[1]);
        let mut options = GeofenceOptions::default();
        options.responsiveness_ms = 5_000;
        let chunks = session.plan_targets(&[(1, Some(options))]).unwrap();
        session.on_targets_response(
            GeofenceOp::Modify,
            &chunks[0],
            Ok(vec![result(101, 101, LocationResponse::Success)]),
        );
        assert_eq!(
            session.mapping().get(1).unwrap().spec.options.responsiveness_ms,
            5_000
        );
    }

    #[test]
    fn test_breach_maps_engine_ids() {
        let mut session = GeofenceSession::new(8, 20);
        add_all(&mut session, &[1, 2]);
        assert_eq!(session.resolve_breach(&[102, 555, 101]), vec![2, 1]);
    }

    #[test]
    fn test_readd_keeps_client_ids() {
        let mut session = GeofenceSession::new(8, 20);
        add_all(&mut session, &[1, 2]);
        let (generation, chunks) = session.plan_readd();
        assert!(session.mapping().is_empty());
        assert!(session.is_active());
        assert_eq!(session.pending_readds(), 2);

        let ids: Vec<u32> = chunks[0].iter().map(|e| e.client_id).collect();
        assert_eq!(ids, vec![1, 2]);

        session.on_readd_response(
            generation,
            &chunks[0],
            Ok(vec![
                result(1, 501, LocationResponse::Success),
                result(2, 502, LocationResponse::Success),
            ]),
        );
        assert_eq!(session.mapping().engine_id(1), Some(501));
        assert_eq!(session.mapping().client_id(101), None);
        assert_eq!(session.pending_readds(), 0);
    }

    #[test]
    fn test_second_restart_readds_pending_geofences() {
        let mut session = GeofenceSession::new(8, 1);
        add_all(&mut session, &[1, 2]);
        let (first, first_chunks) = session.plan_readd();
        // first chunk answered, then the engine restarts again
        session.on_readd_response(
            first,
            &first_chunks[0],
            Ok(vec![result(1, 501, LocationResponse::Success)]),
        );

        let (second, chunks) = session.plan_readd();
        assert_ne!(first, second);
        let ids: Vec<u32> = chunks.iter().flatten().map(|e| e.client_id).collect();
        assert_eq!(ids, vec![1, 2]);

        // the older generation timing out loses nothing
        let stale = session.on_readd_response(first, &first_chunks[1], Err(LocationResponse::Timeout));
        assert!(stale.is_empty());
        assert_eq!(session.pending_readds(), 2);
        assert!(!session.is_current_readd(first));

        for (chunk, engine_id) in chunks.iter().zip([701, 702]) {
            let id = chunk[0].client_id;
            session.on_readd_response(second, chunk, Ok(vec![result(id, engine_id, LocationResponse::Success)]));
        }
        assert_eq!(session.mapping().client_ids(), vec![1, 2]);
        assert_eq!(session.pending_readds(), 0);
    }

    #[test]
    fn test_failed_readd_is_erased() {
        let mut session = GeofenceSession::new(8, 20);
        add_all(&mut session, &[1, 2]);
        let (generation, chunks) = session.plan_readd();
        let outcome = session.on_readd_response(
            generation,
            &chunks[0],
            Ok(vec![
                result(1, 501, LocationResponse::Success),
                result(2, 0, LocationResponse::GeneralFailure),
            ]),
        );
        assert_eq!(outcome[1], (2, LocationResponse::GeneralFailure));
        assert_eq!(session.mapping().client_ids(), vec![1]);
        assert_eq!(session.pending_readds(), 0);
    }

    #[test]
    fn test_pending_readds_count_against_capacity() {
        let mut session = GeofenceSession::new(3, 20);
        add_all(&mut session, &[1, 2]);
        session.plan_readd();
        assert_eq!(
            session.plan_add(vec![(3, spec()), (4, spec())]),
            Err(LocationResponse::CapacityExceeded)
        );
    }
}
