//! One-shot requests and engine controls.

use std::time::Duration;

use tracing::debug;

use super::listener::{ResponseCallback, ValueCallback};
use super::state::ClientCore;
use crate::error::LocationResponse;
use crate::exchange::response_of;
use crate::protocol::types::{EnergyConsumed, Location, OperationMode};
use crate::protocol::{Indication, Request};

/// Slack on top of the caller's terrestrial timeout, so the engine's own
/// timeout answer still reaches the client.
const TERRESTRIAL_ANSWER_MARGIN: Duration = Duration::from_secs(1);

impl ClientCore {
    pub(super) fn ping(&mut self, payload: u32, callback: ValueCallback<u32>) {
        self.issue(Request::PingTest { payload }, move |_, result| {
            callback(match result {
                Ok(Indication::PingTest { payload }) => Ok(payload),
                Ok(_) => Err(LocationResponse::GeneralFailure),
                Err(err) => Err(err.response()),
            })
        });
    }

    pub(super) fn get_gnss_energy_consumed(&mut self, callback: ValueCallback<EnergyConsumed>) {
        if !self.registered {
            callback(Err(LocationResponse::SystemNotReady));
            return;
        }
        self.issue(Request::GetGnssEnergyConsumed, move |_, result| {
            callback(match result {
                Ok(Indication::EnergyConsumed(energy)) => Ok(energy),
                Ok(_) => Err(LocationResponse::GeneralFailure),
                Err(err) => Err(err.response()),
            })
        });
    }

    /// One terrestrial fix. Only one request runs at a time.
    pub(super) fn get_single_terrestrial_position(&mut self, timeout_ms: u32, callback: ValueCallback<Location>) {
        if !self.registered {
            callback(Err(LocationResponse::SystemNotReady));
            return;
        }
        if self.terrestrial_running {
            callback(Err(LocationResponse::AlreadyInProgress));
            return;
        }
        self.terrestrial_running = true;
        let at_least = Duration::from_millis(u64::from(timeout_ms)) + TERRESTRIAL_ANSWER_MARGIN;
        let request = Request::GetSingleTerrestrialPosition { timeout_ms };
        self.issue_waiting_at_least(request, at_least, move |core, result| {
            core.terrestrial_running = false;
            callback(match result {
                Ok(Indication::SingleTerrestrialPosition {
                    location: Some(location),
                    ..
                }) => Ok(location),
                Ok(_) => Err(LocationResponse::GeneralFailure),
                Err(err) => Err(err.response()),
            })
        });
    }

    pub(super) fn update_network_availability(&mut self, available: bool, callback: Option<ResponseCallback>) {
        self.control(Request::UpdateNetworkAvailability { available }, callback);
    }

    pub(super) fn set_operation_mode(&mut self, mode: OperationMode, callback: Option<ResponseCallback>) {
        self.control(Request::SetOperationMode { mode }, callback);
    }

    pub(super) fn set_server_url(&mut self, url: String, callback: Option<ResponseCallback>) {
        self.control(Request::SetServerUrl { url }, callback);
    }

    pub(super) fn set_system_info_listening(&mut self, listening: bool) {
        debug!(listening, "System info listening");
        self.system_info_listening = listening;
        self.sync_bits();
    }

    fn control(&mut self, request: Request, callback: Option<ResponseCallback>) {
        if !self.registered {
            if let Some(callback) = callback {
                callback(LocationResponse::SystemNotReady);
            }
            return;
        }
        let id = request.message_id();
        self.issue(request, move |_, result| {
            let response = response_of(&result);
            debug!(msg_id = %id, %response, "Control request answered");
            if let Some(callback) = callback {
                callback(response);
            }
        });
    }
}
