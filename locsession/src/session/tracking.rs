//! Tracking sessions.
//!
//! Passive options (zero interval and zero distance) listen to reports
//! without running an engine session, so switching between passive and
//! active is a stop-then-start rather than an update.

use super::options::SessionOptions;
use crate::mask::EventMask;
use crate::protocol::types::TrackingOptions;

impl SessionOptions for TrackingOptions {
    fn changes_kind(&self, other: &Self) -> bool {
        self.is_passive() != other.is_passive()
    }

    fn drives_engine(&self) -> bool {
        !self.is_passive()
    }

    fn required_bits(&self) -> EventMask {
        self.reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LocationResponse;
    use crate::ids::IdAllocator;
    use crate::session::{Capability, OptionsSession, Plan, SessionId, SessionState, Step, StepKind};
    use proptest::prelude::*;

    type TrackingSession = OptionsSession<TrackingOptions>;

    fn session() -> (TrackingSession, IdAllocator) {
        (
            OptionsSession::new(Capability::Tracking),
            IdAllocator::new("session", 1, 1000),
        )
    }

    fn steps(plan: &Plan<TrackingOptions>) -> Vec<StepKind> {
        match plan {
            Plan::Send { steps, .. } => steps.iter().map(Step::kind).collect(),
            _ => vec![],
        }
    }

    #[test]
    fn test_start_sends_start_and_goes_pending() {
        let (mut s, ids) = session();
        let opts = TrackingOptions::new(1000, 0);
        let plan = s.start(opts, true, &ids).unwrap();
        assert_eq!(steps(&plan), vec![StepKind::Start]);
        assert_eq!(s.state(), SessionState::Pending);

        let Plan::Send { session, .. } = plan else {
            unreachable!()
        };
        assert!(s.on_step_complete(session, StepKind::Start));
        assert_eq!(s.state(), SessionState::Active);
        assert_eq!(s.active_options(), Some(&opts));
    }

    #[test]
    fn test_passive_start_is_local() {
        let (mut s, ids) = session();
        let plan = s.start(TrackingOptions::passive(), true, &ids).unwrap();
        assert_eq!(plan, Plan::Respond(LocationResponse::Success));
        assert_eq!(s.state(), SessionState::Active);
        assert!(s.is_active());
    }

    #[test]
    fn test_passive_to_active_is_stop_then_start() {
        let (mut s, ids) = session();
        s.start(TrackingOptions::passive(), true, &ids).unwrap();
        let plan = s.start(TrackingOptions::new(1000, 0), true, &ids).unwrap();
        assert_eq!(steps(&plan), vec![StepKind::Stop, StepKind::Start]);
    }

    #[test]
    fn test_active_to_passive_is_stop_only() {
        let (mut s, ids) = session();
        s.start(TrackingOptions::new(1000, 0), true, &ids).unwrap();
        let plan = s.start(TrackingOptions::passive(), true, &ids).unwrap();
        assert_eq!(steps(&plan), vec![StepKind::Stop]);
        assert!(s.is_active());
    }

    #[test]
    fn test_value_change_is_update() {
        let (mut s, ids) = session();
        s.start(TrackingOptions::new(1000, 0), true, &ids).unwrap();
        let plan = s.update(TrackingOptions::new(2000, 0), true, &ids).unwrap();
        assert_eq!(steps(&plan), vec![StepKind::Update]);
        assert_eq!(s.state(), SessionState::ActiveUpdating);
    }

    #[test]
    fn test_identical_update_sends_nothing() {
        let (mut s, ids) = session();
        s.start(TrackingOptions::new(1000, 0), true, &ids).unwrap();
        s.update(TrackingOptions::new(500, 0), true, &ids).unwrap();
        let plan = s.update(TrackingOptions::new(500, 0), true, &ids).unwrap();
        assert_eq!(plan, Plan::Respond(LocationResponse::Success));
    }

    #[test]
    fn test_update_without_session_is_invalid() {
        let (mut s, ids) = session();
        let plan = s.update(TrackingOptions::new(500, 0), true, &ids).unwrap();
        assert_eq!(plan, Plan::Respond(LocationResponse::InvalidParameter));
        assert!(!s.is_active());
    }

    #[test]
    fn test_stop_twice_sends_one_stop() {
        let (mut s, ids) = session();
        s.start(TrackingOptions::new(1000, 0), true, &ids).unwrap();
        assert_eq!(steps(&s.stop(true)), vec![StepKind::Stop]);
        assert_eq!(s.stop(true), Plan::Respond(LocationResponse::Success));
        assert_eq!(s.state(), SessionState::Inactive);
        assert_eq!(s.session_id(), SessionId::INVALID);
        assert_eq!(s.active_options(), None);
    }

    #[test]
    fn test_stop_passive_sends_nothing() {
        let (mut s, ids) = session();
        s.start(TrackingOptions::passive(), true, &ids).unwrap();
        assert_eq!(s.stop(true), Plan::Respond(LocationResponse::Success));
        assert!(!s.is_active());
    }

    #[test]
    fn test_unregistered_start_defers_and_records_options() {
        let (mut s, ids) = session();
        let opts = TrackingOptions::new(1000, 10);
        assert_eq!(s.start(opts, false, &ids).unwrap(), Plan::Deferred);
        assert_eq!(s.state(), SessionState::Pending);
        assert_eq!(s.desired_options(), Some(&opts));
        assert!(s.session_id().is_valid());
    }

    #[test]
    fn test_unregistered_stop_sends_nothing() {
        let (mut s, ids) = session();
        s.start(TrackingOptions::new(1000, 0), false, &ids).unwrap();
        assert_eq!(s.stop(false), Plan::Respond(LocationResponse::Success));
        assert!(!s.is_active());
    }

    #[test]
    fn test_resume_restarts_with_new_identity() {
        let (mut s, ids) = session();
        let opts = TrackingOptions::new(1000, 0);
        s.start(opts, true, &ids).unwrap();
        let before = s.session_id();

        let plan = s.resume(&ids).unwrap().unwrap();
        match plan {
            Plan::Send { session, steps } => {
                assert_ne!(session, before);
                assert_eq!(steps, vec![Step::Start(opts)]);
            }
            other => panic!("unexpected plan {other:?}"),
        }
        // old incarnation's answers are stale
        assert!(!s.on_step_complete(before, StepKind::Start));
        assert!(s.is_active());
    }

    #[test]
    fn test_resume_without_session_is_noop() {
        let (mut s, ids) = session();
        assert_eq!(s.resume(&ids).unwrap(), None);
    }

    #[test]
    fn test_failed_start_keeps_optimistic_options() {
        let (mut s, ids) = session();
        let opts = TrackingOptions::new(1000, 0);
        let Plan::Send { session, .. } = s.start(opts, true, &ids).unwrap() else {
            unreachable!()
        };
        // response (failed or not) completes the step
        s.on_step_complete(session, StepKind::Start);
        assert_eq!(s.active_options(), Some(&opts));
        // same options again: no request
        assert_eq!(
            s.start(opts, true, &ids).unwrap(),
            Plan::Respond(LocationResponse::Success)
        );
    }

    #[test]
    fn test_id_exhaustion_fails_closed() {
        let mut s: TrackingSession = OptionsSession::new(Capability::Tracking);
        let ids = IdAllocator::new("session", 1, 1);
        s.start(TrackingOptions::new(1000, 0), true, &ids).unwrap();
        s.stop(true);
        assert!(s.start(TrackingOptions::new(1000, 0), true, &ids).is_err());
    }

    #[test]
    fn test_required_bits_follow_reports() {
        let (mut s, ids) = session();
        assert_eq!(s.required_bits(), EventMask::EMPTY);
        let opts = TrackingOptions::new(1000, 0).with_reports(EventMask::POSITION | EventMask::NMEA);
        s.start(opts, true, &ids).unwrap();
        assert_eq!(s.required_bits(), EventMask::POSITION | EventMask::NMEA);
        s.stop(true);
        assert_eq!(s.required_bits(), EventMask::EMPTY);
    }

    #[derive(Clone, Copy, Debug)]
    enum Op {
        Start(u32),
        Update(u32),
        Stop,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        // interval 0 is passive, so the strategy covers mode switches too
        prop_oneof![
            (0u32..3).prop_map(|i| Op::Start(i * 1000)),
            (0u32..3).prop_map(|i| Op::Update(i * 1000)),
            Just(Op::Stop),
        ]
    }

    proptest! {
        #[test]
        fn prop_requests_match_effective_transitions(ops in prop::collection::vec(op_strategy(), 1..40)) {
            let (mut s, ids) = session();
            // engine-side view: None when no engine session runs
            let mut engine: Option<u32> = None;
            let mut local: Option<u32> = None;

            for op in ops {
                let (plan, target) = match op {
                    Op::Start(i) => (s.start(TrackingOptions::new(i, 0), true, &ids).unwrap(), Some(i)),
                    Op::Update(i) => {
                        let plan = s.update(TrackingOptions::new(i, 0), true, &ids).unwrap();
                        (plan, if local.is_some() { Some(i) } else { None })
                    }
                    Op::Stop => (s.stop(true), None),
                };

                let expected = match (local, target) {
                    (None, None) => 0,
                    (None, Some(0)) => 0,
                    (None, Some(_)) => 1,
                    (Some(prev), None) => usize::from(prev != 0),
                    (Some(prev), Some(next)) if prev == next => 0,
                    (Some(prev), Some(next)) if (prev == 0) != (next == 0) => {
                        if next == 0 { 1 } else { 2 }
                    }
                    (Some(_), Some(_)) => 1,
                };
                prop_assert_eq!(steps(&plan).len(), expected);

                local = target;
                engine = target.filter(|i| *i != 0);
            }
            prop_assert_eq!(s.active_options().map(|o| o.min_interval_ms).filter(|i| *i != 0), engine);
        }
    }
}
