//! Option-driven session machine shared by tracking and batching.

use tracing::debug;

use super::{Capability, SessionId, SessionState};
use crate::error::LocationResponse;
use crate::ids::{IdAllocator, IdError};
use crate::mask::EventMask;

/// Capability-specific behaviour of session options.
pub trait SessionOptions: Copy + PartialEq + std::fmt::Debug + Send + 'static {
    /// Whether a change from `self` to `other` needs a stop-then-start
    /// instead of an update.
    fn changes_kind(&self, other: &Self) -> bool;

    /// Whether the engine has to run a session for these options. Options
    /// that do not (passive tracking) are satisfied locally.
    fn drives_engine(&self) -> bool;

    /// Indications a session with these options needs.
    fn required_bits(&self) -> EventMask;
}

/// Kind of request a step sends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepKind {
    Start,
    Update,
    Stop,
}

/// One request the loop must send for a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step<O> {
    Start(O),
    Update(O),
    Stop,
}

impl<O> Step<O> {
    pub fn kind(&self) -> StepKind {
        match self {
            Step::Start(_) => StepKind::Start,
            Step::Update(_) => StepKind::Update,
            Step::Stop => StepKind::Stop,
        }
    }
}

/// What the loop has to do for an operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Plan<O> {
    /// Nothing to send; answer the caller now.
    Respond(LocationResponse),
    /// Nothing to send until the engine registers this client.
    Deferred,
    /// Send `steps` in order for `session`; the caller's answer is the
    /// outcome of the last one.
    Send { session: SessionId, steps: Vec<Step<O>> },
}

/// Session whose engine-side state is a set of options.
#[derive(Debug)]
pub struct OptionsSession<O> {
    capability: Capability,
    state: SessionState,
    session_id: SessionId,
    active: Option<O>,
    desired: Option<O>,
}

impl<O: SessionOptions> OptionsSession<O> {
    pub fn new(capability: Capability) -> Self {
        Self {
            capability,
            state: SessionState::Inactive,
            session_id: SessionId::INVALID,
            active: None,
            desired: None,
        }
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn active_options(&self) -> Option<&O> {
        self.active.as_ref()
    }

    pub fn desired_options(&self) -> Option<&O> {
        self.desired.as_ref()
    }

    /// A session exists (running, pending or deferred).
    pub fn is_active(&self) -> bool {
        self.session_id.is_valid()
    }

    /// Indications this session currently needs.
    pub fn required_bits(&self) -> EventMask {
        match (self.session_id.is_valid(), self.desired.as_ref()) {
            (true, Some(options)) => options.required_bits(),
            _ => EventMask::EMPTY,
        }
    }

    /// Starts the session, or moves a running one to `options`.
    ///
    /// Options are recorded before anything is sent and are not rolled
    /// back if the request fails.
    pub fn start(
        &mut self,
        options: O,
        registered: bool,
        ids: &IdAllocator,
    ) -> Result<Plan<O>, IdError> {
        self.desired = Some(options);

        if !registered {
            if !self.session_id.is_valid() {
                self.session_id = SessionId::new(ids.allocate()?);
            }
            self.active = Some(options);
            self.state = SessionState::Pending;
            debug!(capability = ?self.capability, session = %self.session_id, "Start deferred until engine registers");
            return Ok(Plan::Deferred);
        }

        if !self.session_id.is_valid() {
            self.session_id = SessionId::new(ids.allocate()?);
            self.active = Some(options);
            if !options.drives_engine() {
                self.state = SessionState::Active;
                return Ok(Plan::Respond(LocationResponse::Success));
            }
            self.state = SessionState::Pending;
            return Ok(Plan::Send {
                session: self.session_id,
                steps: vec![Step::Start(options)],
            });
        }

        let previous = self.active.replace(options);
        let Some(previous) = previous else {
            // session id without options: treat as a fresh start
            self.state = SessionState::Pending;
            return Ok(Plan::Send {
                session: self.session_id,
                steps: vec![Step::Start(options)],
            });
        };

        if previous == options {
            return Ok(Plan::Respond(LocationResponse::Success));
        }

        let steps = if previous.changes_kind(&options) {
            let mut steps = Vec::with_capacity(2);
            // mode switch: always a stop, then a start if the new mode runs
            steps.push(Step::Stop);
            if options.drives_engine() {
                self.state = SessionState::Pending;
                steps.push(Step::Start(options));
            } else {
                self.state = SessionState::Active;
            }
            steps
        } else if options.drives_engine() {
            self.state = SessionState::ActiveUpdating;
            vec![Step::Update(options)]
        } else {
            // both non-driving: nothing to tell the engine
            return Ok(Plan::Respond(LocationResponse::Success));
        };

        Ok(Plan::Send {
            session: self.session_id,
            steps,
        })
    }

    /// Changes the options of an existing session.
    pub fn update(
        &mut self,
        options: O,
        registered: bool,
        ids: &IdAllocator,
    ) -> Result<Plan<O>, IdError> {
        if !self.session_id.is_valid() {
            return Ok(Plan::Respond(LocationResponse::InvalidParameter));
        }
        self.start(options, registered, ids)
    }

    /// Stops the session. Always ends INACTIVE.
    pub fn stop(&mut self, registered: bool) -> Plan<O> {
        if !self.session_id.is_valid() {
            return Plan::Respond(LocationResponse::Success);
        }

        let session = self.session_id;
        let send_stop =
            registered && self.active.as_ref().is_some_and(|options| options.drives_engine());

        self.active = None;
        self.desired = None;
        self.session_id = SessionId::INVALID;
        self.state = SessionState::Inactive;

        if send_stop {
            Plan::Send {
                session,
                steps: vec![Step::Stop],
            }
        } else {
            Plan::Respond(LocationResponse::Success)
        }
    }

    /// Re-runs start with the last desired options after the engine
    /// (re)registered this client. Returns `None` when there is no session.
    pub fn resume(&mut self, ids: &IdAllocator) -> Result<Option<Plan<O>>, IdError> {
        if !self.session_id.is_valid() {
            return Ok(None);
        }
        let Some(desired) = self.desired else {
            return Ok(None);
        };
        self.session_id = SessionId::INVALID;
        self.active = None;
        self.start(desired, true, ids).map(Some)
    }

    /// Records the engine's answer to a step sent for `session`.
    ///
    /// Returns false when the answer belongs to an earlier incarnation and
    /// was ignored.
    pub fn on_step_complete(&mut self, session: SessionId, step: StepKind) -> bool {
        if session != self.session_id {
            debug!(
                capability = ?self.capability,
                session = %session,
                current = %self.session_id,
                "Ignoring response for stale session"
            );
            return false;
        }
        match step {
            StepKind::Start | StepKind::Update => self.state = SessionState::Active,
            StepKind::Stop => {}
        }
        true
    }
}
