//! Driving option sessions (tracking, batching) from the loop.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, warn};

use super::listener::ResponseCallback;
use super::state::ClientCore;
use crate::error::LocationResponse;
use crate::exchange::response_of;
use crate::protocol::types::{BatchingOptions, TrackingOptions};
use crate::protocol::Request;
use crate::session::{OptionsSession, Plan, SessionId, SessionOptions, Step, StepKind};

/// Ties an options type to its session slot and wire requests.
pub(super) trait DrivenOptions: SessionOptions {
    const NAME: &'static str;

    fn to_request(session: SessionId, step: Step<Self>) -> Request;

    fn session(core: &mut ClientCore) -> &mut OptionsSession<Self>;

    fn deferred(core: &mut ClientCore) -> &mut Option<ResponseCallback>;
}

impl DrivenOptions for TrackingOptions {
    const NAME: &'static str = "tracking";

    fn to_request(session: SessionId, step: Step<Self>) -> Request {
        let session = session.value();
        match step {
            Step::Start(options) => Request::StartTracking { session, options },
            Step::Update(options) => Request::UpdateTrackingOptions { session, options },
            Step::Stop => Request::StopTracking { session },
        }
    }

    fn session(core: &mut ClientCore) -> &mut OptionsSession<Self> {
        &mut core.tracking
    }

    fn deferred(core: &mut ClientCore) -> &mut Option<ResponseCallback> {
        &mut core.deferred_tracking
    }
}

impl DrivenOptions for BatchingOptions {
    const NAME: &'static str = "batching";

    fn to_request(session: SessionId, step: Step<Self>) -> Request {
        let session = session.value();
        match step {
            Step::Start(options) => Request::StartBatching { session, options },
            Step::Update(options) => Request::UpdateBatchingOptions { session, options },
            Step::Stop => Request::StopBatching { session },
        }
    }

    fn session(core: &mut ClientCore) -> &mut OptionsSession<Self> {
        &mut core.batching
    }

    fn deferred(core: &mut ClientCore) -> &mut Option<ResponseCallback> {
        &mut core.deferred_batching
    }
}

fn ignore_response(_: LocationResponse) {}

impl ClientCore {
    pub(super) fn start_session<O: DrivenOptions>(&mut self, options: O, callback: ResponseCallback) {
        let registered = self.registered;
        let ids = Arc::clone(&self.session_ids);
        match O::session(self).start(options, registered, &ids) {
            Ok(plan) => {
                self.sync_bits();
                self.run_plan(plan, callback);
            }
            Err(err) => {
                warn!(session = O::NAME, error = %err, "Cannot start session");
                callback(LocationResponse::GeneralFailure);
            }
        }
    }

    pub(super) fn update_session<O: DrivenOptions>(&mut self, options: O, callback: ResponseCallback) {
        let registered = self.registered;
        let ids = Arc::clone(&self.session_ids);
        match O::session(self).update(options, registered, &ids) {
            Ok(plan) => {
                self.sync_bits();
                self.run_plan(plan, callback);
            }
            Err(err) => {
                warn!(session = O::NAME, error = %err, "Cannot update session");
                callback(LocationResponse::GeneralFailure);
            }
        }
    }

    pub(super) fn stop_session<O: DrivenOptions>(&mut self, callback: ResponseCallback) {
        let registered = self.registered;
        let plan = O::session(self).stop(registered);
        self.sync_bits();
        self.run_plan(plan, callback);
    }

    /// Restarts the session after (re)registration. A start deferred before
    /// registration gets its answer from the resumed start.
    pub(super) fn resume_session<O: DrivenOptions>(&mut self) {
        let ids = Arc::clone(&self.session_ids);
        match O::session(self).resume(&ids) {
            Ok(Some(plan)) => {
                debug!(session = O::NAME, "Resuming session");
                let callback = O::deferred(self)
                    .take()
                    .unwrap_or_else(|| Box::new(ignore_response));
                self.sync_bits();
                self.run_plan(plan, callback);
            }
            Ok(None) => {}
            Err(err) => {
                warn!(session = O::NAME, error = %err, "Cannot resume session");
                if let Some(callback) = O::deferred(self).take() {
                    callback(LocationResponse::GeneralFailure);
                }
            }
        }
    }

    fn run_plan<O: DrivenOptions>(&mut self, plan: Plan<O>, callback: ResponseCallback) {
        match plan {
            Plan::Deferred => {
                if let Some(superseded) = O::deferred(self).replace(callback) {
                    superseded(LocationResponse::SystemNotReady);
                }
            }
            Plan::Respond(response) => {
                if let Some(superseded) = O::deferred(self).take() {
                    superseded(LocationResponse::SystemNotReady);
                }
                callback(response);
            }
            Plan::Send { session, steps } => {
                if let Some(superseded) = O::deferred(self).take() {
                    superseded(LocationResponse::SystemNotReady);
                }
                self.send_steps::<O>(session, steps.into(), callback);
            }
        }
    }

    /// Sends `steps` one after another. The callback gets the outcome of the
    /// last one sent.
    fn send_steps<O: DrivenOptions>(
        &mut self,
        session: SessionId,
        mut steps: VecDeque<Step<O>>,
        callback: ResponseCallback,
    ) {
        let Some(step) = steps.pop_front() else {
            callback(LocationResponse::Success);
            return;
        };
        let kind = step.kind();
        self.issue(O::to_request(session, step), move |core, result| {
            let response = response_of(&result);
            debug!(session = O::NAME, id = %session, step = ?kind, %response, "Session step answered");

            if kind != StepKind::Stop && !O::session(core).on_step_complete(session, kind) {
                core.metrics.stale_response();
            }
            if steps.is_empty() || O::session(core).session_id() != session {
                callback(response);
            } else {
                core.send_steps(session, steps, callback);
            }
        });
    }
}
