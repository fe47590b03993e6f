//! In-process simulated positioning engine.
//!
//! [`SimulatedEngine`] serves the engine end of a [`loopback`] link. It
//! records every request, answers with success by default and can be
//! scripted through its [`EngineHandle`]: busy answers, silence, failing
//! geofence entries, a buffer of batched fixes and unsolicited
//! indications.
//!
//! ```text
//!  LocationClient ──► loopback ──► SimulatedEngine task ──► SimState::answer
//!        ▲                                                     │
//!        └──────────── loopback ◄──── indications ◄────────────┘
//!                                          ▲
//!                      EngineHandle ───────┘ (restart, breach, reports)
//! ```
//!
//! [`loopback`]: crate::protocol::loopback

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::LocationResponse;
use crate::protocol::types::{
    BatchingStatus, BreachType, EnergyConsumed, Location, SystemInfo,
};
use crate::protocol::{BincodeCodec, EngineLink, EntryResult, Inbound, Indication, MessageId, Request};

/// Capabilities announced on registration.
pub const DEFAULT_CAPABILITIES: u64 = 0x1ff;

/// First engine-side geofence id.
const FIRST_ENGINE_GEOFENCE_ID: u32 = 1000;

/// Polling interval of the `wait_for_*` helpers.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug)]
struct SimState {
    client: String,
    requests: Vec<Request>,

    auto_register: bool,
    capabilities: u64,
    busy: HashMap<MessageId, usize>,
    silent: HashSet<MessageId>,
    failures: HashMap<MessageId, LocationResponse>,

    failing_geofences: HashSet<u32>,
    /// engine id -> client id
    geofences: BTreeMap<u32, u32>,
    next_geofence_id: u32,

    batch: VecDeque<Location>,
    racing_fix: Option<Location>,
    trip_distance_m: Option<u32>,
    energy: u64,
    terrestrial: Location,
}

impl SimState {
    fn new(client: String) -> Self {
        Self {
            client,
            requests: Vec::new(),
            auto_register: true,
            capabilities: DEFAULT_CAPABILITIES,
            busy: HashMap::new(),
            silent: HashSet::new(),
            failures: HashMap::new(),
            failing_geofences: HashSet::new(),
            geofences: BTreeMap::new(),
            next_geofence_id: FIRST_ENGINE_GEOFENCE_ID,
            batch: VecDeque::new(),
            racing_fix: None,
            trip_distance_m: None,
            energy: 0,
            terrestrial: Location::default(),
        }
    }

    /// Records `request` and returns the indications to answer with.
    fn answer(&mut self, request: Request) -> Vec<Indication> {
        let id = request.message_id();
        self.requests.push(request.clone());

        if self.silent.contains(&id) {
            return Vec::new();
        }
        if let Some(remaining) = self.busy.get_mut(&id) {
            if *remaining > 0 {
                *remaining -= 1;
                return vec![status(id, LocationResponse::Busy)];
            }
        }
        if let Some(code) = self.failures.get(&id) {
            return vec![status(id, *code)];
        }

        let indication = match request {
            Request::ClientRegister => {
                if !self.auto_register {
                    return Vec::new();
                }
                Indication::Capabilities {
                    capabilities: self.capabilities,
                }
            }
            Request::ClientDeregister => return Vec::new(),
            Request::AddGeofences { entries } => {
                let results = entries
                    .iter()
                    .map(|entry| {
                        if self.failing_geofences.contains(&entry.client_id) {
                            return EntryResult {
                                id: entry.client_id,
                                engine_id: 0,
                                response: LocationResponse::GeneralFailure,
                            };
                        }
                        let engine_id = self.next_geofence_id;
                        self.next_geofence_id += 1;
                        self.geofences.insert(engine_id, entry.client_id);
                        EntryResult {
                            id: entry.client_id,
                            engine_id,
                            response: LocationResponse::Success,
                        }
                    })
                    .collect();
                Indication::CollectiveResponse {
                    request: id,
                    results,
                }
            }
            Request::RemoveGeofences { engine_ids } => {
                let results = engine_ids
                    .iter()
                    .map(|engine_id| {
                        let known = self.geofences.remove(engine_id).is_some();
                        entry_result(*engine_id, known)
                    })
                    .collect();
                Indication::CollectiveResponse {
                    request: id,
                    results,
                }
            }
            Request::PauseGeofences { engine_ids } | Request::ResumeGeofences { engine_ids } => {
                let results = engine_ids
                    .iter()
                    .map(|engine_id| entry_result(*engine_id, self.geofences.contains_key(engine_id)))
                    .collect();
                Indication::CollectiveResponse {
                    request: id,
                    results,
                }
            }
            Request::ModifyGeofences { entries } => {
                let results = entries
                    .iter()
                    .map(|entry| {
                        entry_result(entry.engine_id, self.geofences.contains_key(&entry.engine_id))
                    })
                    .collect();
                Indication::CollectiveResponse {
                    request: id,
                    results,
                }
            }
            Request::GetBatchedLocations { max_entries } => {
                let take = (max_entries as usize).min(self.batch.len());
                let fixes: Vec<Location> = self.batch.drain(..take).collect();
                // the racing fix lands ahead of the remaining buffer
                if let Some(fix) = self.racing_fix.take() {
                    self.batch.push_front(fix);
                }
                Indication::BatchedLocations {
                    fixes,
                    accumulated_distance_m: self.trip_distance_m,
                }
            }
            Request::GetGnssEnergyConsumed => Indication::EnergyConsumed(EnergyConsumed {
                total_energy_consumed: self.energy,
            }),
            Request::GetSingleTerrestrialPosition { .. } => Indication::SingleTerrestrialPosition {
                response: LocationResponse::Success,
                location: Some(self.terrestrial.clone()),
            },
            Request::PingTest { payload } => Indication::PingTest { payload },
            _ => status(id, LocationResponse::Success),
        };
        vec![indication]
    }
}

fn status(request: MessageId, response: LocationResponse) -> Indication {
    Indication::Response { request, response }
}

fn entry_result(engine_id: u32, known: bool) -> EntryResult {
    EntryResult {
        id: engine_id,
        engine_id,
        response: if known {
            LocationResponse::Success
        } else {
            LocationResponse::InvalidParameter
        },
    }
}

/// The engine task.
pub struct SimulatedEngine;

impl SimulatedEngine {
    /// Starts serving `link`. Indications are addressed to `client` until a
    /// request reveals the client's actual channel name.
    pub fn spawn(link: EngineLink, client: impl Into<String>) -> (EngineHandle, JoinHandle<()>) {
        let EngineLink {
            mut requests,
            indications,
        } = link;
        let state = Arc::new(Mutex::new(SimState::new(client.into())));
        let handle = EngineHandle {
            state: Arc::clone(&state),
            indications,
            codec: BincodeCodec::new(),
        };

        let engine = handle.clone();
        let task = tokio::spawn(async move {
            while let Some(payload) = requests.recv().await {
                let outbound = match engine.codec.decode_request(&payload) {
                    Ok(outbound) => outbound,
                    Err(err) => {
                        error!(error = %err, "Simulated engine got an undecodable request");
                        continue;
                    }
                };
                debug!(request = ?outbound.request.message_id(), "Simulated engine request");
                let replies = {
                    let mut state = engine.state.lock();
                    state.client = outbound.socket_name;
                    state.answer(outbound.request)
                };
                for indication in replies {
                    engine.send(indication);
                }
            }
            debug!("Simulated engine stopped");
        });

        (handle, task)
    }
}

/// Scripting and inspection handle on a [`SimulatedEngine`].
#[derive(Clone)]
pub struct EngineHandle {
    state: Arc<Mutex<SimState>>,
    indications: mpsc::UnboundedSender<Bytes>,
    codec: BincodeCodec,
}

impl EngineHandle {
    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<Request> {
        self.state.lock().requests.clone()
    }

    pub fn requests_of(&self, id: MessageId) -> Vec<Request> {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.message_id() == id)
            .cloned()
            .collect()
    }

    pub fn count(&self, id: MessageId) -> usize {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.message_id() == id)
            .count()
    }

    pub fn clear_requests(&self) {
        self.state.lock().requests.clear();
    }

    /// Engine id currently assigned to a client geofence id.
    pub fn engine_geofence_id(&self, client_id: u32) -> Option<u32> {
        self.state
            .lock()
            .geofences
            .iter()
            .find(|(_, client)| **client == client_id)
            .map(|(engine_id, _)| *engine_id)
    }

    pub fn geofence_count(&self) -> usize {
        self.state.lock().geofences.len()
    }

    /// Waits until at least `count` requests of kind `id` arrived.
    pub async fn wait_for(&self, id: MessageId, count: usize, within: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            if self.count(id) >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    // -------------------------------------------------------------------------
    // Scripting
    // -------------------------------------------------------------------------

    /// Answers the next `times` requests of kind `id` with busy.
    pub fn set_busy(&self, id: MessageId, times: usize) {
        self.state.lock().busy.insert(id, times);
    }

    /// Stops (or resumes) answering requests of kind `id`.
    pub fn set_silent(&self, id: MessageId, silent: bool) {
        let mut state = self.state.lock();
        if silent {
            state.silent.insert(id);
        } else {
            state.silent.remove(&id);
        }
    }

    /// Answers requests of kind `id` with `response`, or normally for `None`.
    pub fn set_failure(&self, id: MessageId, response: Option<LocationResponse>) {
        let mut state = self.state.lock();
        match response {
            Some(response) => state.failures.insert(id, response),
            None => state.failures.remove(&id),
        };
    }

    /// Fails the add of this client geofence id.
    pub fn fail_geofence(&self, client_id: u32) {
        self.state.lock().failing_geofences.insert(client_id);
    }

    /// Whether registration requests are answered right away.
    pub fn set_auto_register(&self, auto_register: bool) {
        self.state.lock().auto_register = auto_register;
    }

    pub fn set_capabilities(&self, capabilities: u64) {
        self.state.lock().capabilities = capabilities;
    }

    /// Appends fixes to the batch buffer, oldest first.
    pub fn push_batch(&self, fixes: impl IntoIterator<Item = Location>) {
        self.state.lock().batch.extend(fixes);
    }

    pub fn batch_len(&self) -> usize {
        self.state.lock().batch.len()
    }

    /// Makes `fix` appear in the buffer right after the next read, ahead of
    /// everything still buffered.
    pub fn inject_racing_fix(&self, fix: Location) {
        self.state.lock().racing_fix = Some(fix);
    }

    /// Trip distance reported with batched reads.
    pub fn set_trip_distance(&self, distance_m: Option<u32>) {
        self.state.lock().trip_distance_m = distance_m;
    }

    pub fn set_energy(&self, total_energy_consumed: u64) {
        self.state.lock().energy = total_energy_consumed;
    }

    pub fn set_terrestrial_fix(&self, fix: Location) {
        self.state.lock().terrestrial = fix;
    }

    // -------------------------------------------------------------------------
    // Indications
    // -------------------------------------------------------------------------

    /// Sends an indication to the current client.
    pub fn send(&self, indication: Indication) {
        let socket_name = self.state.lock().client.clone();
        self.send_to(socket_name, indication);
    }

    /// Sends an indication addressed to `socket_name`.
    pub fn send_to(&self, socket_name: impl Into<String>, indication: Indication) {
        let inbound = Inbound {
            socket_name: socket_name.into(),
            indication,
        };
        match self.codec.encode_indication(&inbound) {
            Ok(payload) => {
                if self.indications.send(payload).is_err() {
                    debug!("Client gone, indication dropped");
                }
            }
            Err(err) => error!(error = %err, "Simulated engine failed to encode indication"),
        }
    }

    /// Unsolicited registration, as after the engine comes up.
    pub fn announce(&self) {
        let capabilities = self.state.lock().capabilities;
        self.send(Indication::Capabilities { capabilities });
    }

    /// Forgets every geofence and buffered fix and tells the client.
    pub fn restart(&self) {
        {
            let mut state = self.state.lock();
            state.geofences.clear();
            state.batch.clear();
            state.racing_fix = None;
        }
        self.send(Indication::EngineRestarted);
    }

    pub fn engine_state(&self, on: bool) {
        self.send(Indication::EngineState { on });
    }

    pub fn location(&self, fix: Location) {
        self.send(Indication::Location(fix));
    }

    pub fn nmea(&self, timestamp_ms: u64, sentences: &str) {
        self.send(Indication::Nmea {
            timestamp_ms,
            nmea: sentences.to_string(),
        });
    }

    pub fn batching(&self, status: BatchingStatus, fixes: Vec<Location>) {
        self.send(Indication::Batching { status, fixes });
    }

    pub fn system_info(&self, info: SystemInfo) {
        self.send(Indication::SystemInfo(info));
    }

    /// Reports a breach of the given client geofence ids. Ids unknown to
    /// the engine are reported under a made-up engine id.
    pub fn breach(&self, client_ids: &[u32], breach_type: BreachType, location: Location) {
        let engine_ids = {
            let state = self.state.lock();
            client_ids
                .iter()
                .map(|client_id| {
                    state
                        .geofences
                        .iter()
                        .find(|(_, client)| *client == client_id)
                        .map(|(engine_id, _)| *engine_id)
                        .unwrap_or(u32::MAX)
                })
                .collect()
        };
        let timestamp_ms = location.timestamp_ms;
        self.send(Indication::GeofenceBreach {
            engine_ids,
            breach_type,
            location,
            timestamp_ms,
        });
    }
}
