use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::routing::states::{
    Capability, DispatchEvent, DispatchState, RouteDecision, RouteProposal, RoutingState,
};

/// Maximum number of dispatches a single capability gets per conversation.
pub const CAPABILITY_CAP: u8 = 3;

/// Upper bound on `decide` calls before a conversation must terminate.
pub const MAX_DECISIONS: usize = 2 * CAPABILITY_CAP as usize + 1;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RoutingError {
    #[error("unknown route proposal `{0}` (expected context|gen|FINISH)")]
    UnknownProposal(String),
    #[error("routing counters out of range: context={context_count}, gen={gen_count}")]
    CounterOutOfRange { context_count: u8, gen_count: u8 },
    #[error("invalid dispatch transition from {state:?} on {event:?}")]
    InvalidTransition { state: DispatchState, event: DispatchEvent },
}

/// Bounded, fair dispatcher between the `context` and `gen` capabilities.
///
/// The supervisor itself holds no counters. Every conversation owns its own
/// `RoutingState` and lends it to `decide`, so one supervisor can serve any
/// number of concurrent conversations.
#[derive(Clone, Copy, Debug, Default)]
pub struct RoutingSupervisor;

impl RoutingSupervisor {
    pub fn new() -> Self {
        Self
    }

    pub fn initial_state(&self) -> DispatchState {
        DispatchState::Supervisor
    }

    pub fn decide(&self, state: &mut RoutingState, proposal: RouteProposal) -> RouteDecision {
        match proposal {
            RouteProposal::Context => dispatch_with_cap(state, Capability::Context),
            RouteProposal::Gen => dispatch_with_cap(state, Capability::Gen),
            RouteProposal::Finish => {
                // Both capabilities must contribute before FINISH is honoured.
                if state.context_count() == 0 {
                    state.record_dispatch(Capability::Context);
                    RouteDecision::Dispatch(Capability::Context)
                } else if state.gen_count() == 0 {
                    state.record_dispatch(Capability::Gen);
                    RouteDecision::Dispatch(Capability::Gen)
                } else {
                    RouteDecision::Terminate
                }
            }
        }
    }

    pub fn decide_with_audit<S>(
        &self,
        state: &mut RoutingState,
        proposal: RouteProposal,
        sink: &S,
        audit: &AuditContext,
    ) -> RouteDecision
    where
        S: AuditSink + ?Sized,
    {
        let decision = self.decide(state, proposal);
        let (event_type, outcome) = match decision {
            RouteDecision::Dispatch(capability) if proposal.as_str() != capability.as_str() => {
                ("routing.dispatch_substituted", AuditOutcome::Rejected)
            }
            RouteDecision::Dispatch(_) => ("routing.dispatch_decided", AuditOutcome::Success),
            RouteDecision::Terminate => ("routing.terminated", AuditOutcome::Success),
        };

        sink.emit(
            AuditEvent::new(
                audit.subject.clone(),
                audit.correlation_id.clone(),
                event_type,
                AuditCategory::Routing,
                audit.actor.clone(),
                outcome,
            )
            .with_metadata("proposal", proposal.as_str())
            .with_metadata("decision", format!("{decision:?}"))
            .with_metadata("context_count", state.context_count().to_string())
            .with_metadata("gen_count", state.gen_count().to_string()),
        );

        decision
    }

    pub fn transition(
        &self,
        current: DispatchState,
        event: DispatchEvent,
    ) -> Result<DispatchState, RoutingError> {
        use DispatchState::{Context, Gen, Supervisor, Terminate};

        match (current, event) {
            (Supervisor, DispatchEvent::Decided(RouteDecision::Dispatch(capability))) => {
                Ok(DispatchState::from(capability))
            }
            (Supervisor, DispatchEvent::Decided(RouteDecision::Terminate)) => Ok(Terminate),
            (Context, DispatchEvent::CapabilityCompleted)
            | (Gen, DispatchEvent::CapabilityCompleted) => Ok(Supervisor),
            _ => Err(RoutingError::InvalidTransition { state: current, event }),
        }
    }
}

fn dispatch_with_cap(state: &mut RoutingState, preferred: Capability) -> RouteDecision {
    let target = if state.is_saturated(preferred) { preferred.other() } else { preferred };
    if state.is_saturated(target) {
        return RouteDecision::Terminate;
    }
    state.record_dispatch(target);
    RouteDecision::Dispatch(target)
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditContext, AuditOutcome, InMemoryAuditSink};
    use crate::routing::engine::{RoutingError, RoutingSupervisor, CAPABILITY_CAP, MAX_DECISIONS};
    use crate::routing::states::{
        Capability, DispatchEvent, DispatchState, RouteDecision, RouteProposal, RoutingState,
    };

    const PROPOSALS: [RouteProposal; 3] =
        [RouteProposal::Context, RouteProposal::Gen, RouteProposal::Finish];

    fn counts(context_count: u8, gen_count: u8) -> RoutingState {
        RoutingState::from_counts(context_count, gen_count).expect("counts within cap")
    }

    fn snapshot(state: &RoutingState) -> (u8, u8) {
        (state.context_count(), state.gen_count())
    }

    #[test]
    fn fresh_state_context_proposal_dispatches_context() {
        let mut state = RoutingState::new();
        let decision = RoutingSupervisor::new().decide(&mut state, RouteProposal::Context);
        assert_eq!(decision, RouteDecision::Dispatch(Capability::Context));
        assert_eq!(snapshot(&state), (1, 0));
    }

    #[test]
    fn finish_with_unused_context_forces_context() {
        let mut state = counts(0, 3);
        let decision = RoutingSupervisor::new().decide(&mut state, RouteProposal::Finish);
        assert_eq!(decision, RouteDecision::Dispatch(Capability::Context));
        assert_eq!(snapshot(&state), (1, 3));
    }

    #[test]
    fn finish_with_unused_gen_forces_gen() {
        let mut state = counts(3, 0);
        let decision = RoutingSupervisor::new().decide(&mut state, RouteProposal::Finish);
        assert_eq!(decision, RouteDecision::Dispatch(Capability::Gen));
        assert_eq!(snapshot(&state), (3, 1));
    }

    #[test]
    fn finish_after_both_contributed_terminates_without_mutation() {
        let mut state = counts(1, 1);
        let decision = RoutingSupervisor::new().decide(&mut state, RouteProposal::Finish);
        assert_eq!(decision, RouteDecision::Terminate);
        assert_eq!(snapshot(&state), (1, 1));
    }

    #[test]
    fn saturated_context_is_substituted_with_gen() {
        let mut state = counts(3, 0);
        let decision = RoutingSupervisor::new().decide(&mut state, RouteProposal::Context);
        assert_eq!(decision, RouteDecision::Dispatch(Capability::Gen));
        assert_eq!(snapshot(&state), (3, 1));
    }

    #[test]
    fn saturated_gen_is_substituted_with_context() {
        let mut state = counts(0, 3);
        let decision = RoutingSupervisor::new().decide(&mut state, RouteProposal::Gen);
        assert_eq!(decision, RouteDecision::Dispatch(Capability::Context));
        assert_eq!(snapshot(&state), (1, 3));
    }

    #[test]
    fn both_saturated_terminates_instead_of_overflowing() {
        let supervisor = RoutingSupervisor::new();
        for proposal in PROPOSALS {
            let mut state = counts(3, 3);
            assert_eq!(supervisor.decide(&mut state, proposal), RouteDecision::Terminate);
            assert_eq!(snapshot(&state), (3, 3));
        }
    }

    #[test]
    fn invariants_hold_for_every_proposal_sequence() {
        let supervisor = RoutingSupervisor::new();
        let depth = MAX_DECISIONS + 1;
        let total = PROPOSALS.len().pow(depth as u32);

        for mut code in 0..total {
            let mut state = RoutingState::new();
            for _ in 0..depth {
                let proposal = PROPOSALS[code % PROPOSALS.len()];
                code /= PROPOSALS.len();
                let before = state;
                let decision = supervisor.decide(&mut state, proposal);

                assert!(state.context_count() <= CAPABILITY_CAP);
                assert!(state.gen_count() <= CAPABILITY_CAP);

                match decision {
                    RouteDecision::Terminate => {
                        assert!(before.context_count() > 0 && before.gen_count() > 0);
                        assert_eq!(before, state);
                        break;
                    }
                    RouteDecision::Dispatch(capability) => {
                        assert!(!before.is_saturated(capability));
                        assert_eq!(state.count(capability), before.count(capability) + 1);
                    }
                }
            }
        }
    }

    #[test]
    fn finish_never_terminates_before_both_capabilities_ran() {
        let supervisor = RoutingSupervisor::new();
        for context_count in 0..=CAPABILITY_CAP {
            for gen_count in 0..=CAPABILITY_CAP {
                if context_count > 0 && gen_count > 0 {
                    continue;
                }
                let mut state = counts(context_count, gen_count);
                let decision = supervisor.decide(&mut state, RouteProposal::Finish);
                assert_ne!(decision, RouteDecision::Terminate);
            }
        }
    }

    #[test]
    fn any_proposal_stream_terminates_within_bound() {
        let supervisor = RoutingSupervisor::new();
        for proposal in PROPOSALS {
            let mut state = RoutingState::new();
            let mut decisions = 0;
            loop {
                decisions += 1;
                assert!(decisions <= MAX_DECISIONS, "{proposal:?} exceeded decision bound");
                if supervisor.decide(&mut state, proposal) == RouteDecision::Terminate {
                    break;
                }
            }
        }
    }

    #[test]
    fn out_of_range_counts_are_rejected() {
        assert_eq!(
            RoutingState::from_counts(4, 0),
            Err(RoutingError::CounterOutOfRange { context_count: 4, gen_count: 0 })
        );
    }

    #[test]
    fn proposals_parse_from_classifier_labels() {
        assert_eq!("context".parse::<RouteProposal>(), Ok(RouteProposal::Context));
        assert_eq!(" Gen ".parse::<RouteProposal>(), Ok(RouteProposal::Gen));
        assert_eq!("FINISH".parse::<RouteProposal>(), Ok(RouteProposal::Finish));
        assert!(matches!(
            "search".parse::<RouteProposal>(),
            Err(RoutingError::UnknownProposal(ref label)) if label == "search"
        ));
    }

    #[test]
    fn dispatch_graph_follows_transition_table() {
        let supervisor = RoutingSupervisor::new();
        let start = supervisor.initial_state();
        assert_eq!(start, DispatchState::Supervisor);

        let context = supervisor
            .transition(
                start,
                DispatchEvent::Decided(RouteDecision::Dispatch(Capability::Context)),
            )
            .expect("supervisor -> context");
        assert_eq!(context, DispatchState::Context);

        let back = supervisor
            .transition(context, DispatchEvent::CapabilityCompleted)
            .expect("context -> supervisor");
        assert_eq!(back, DispatchState::Supervisor);

        let done = supervisor
            .transition(back, DispatchEvent::Decided(RouteDecision::Terminate))
            .expect("supervisor -> terminate");
        assert_eq!(done, DispatchState::Terminate);

        let error = supervisor
            .transition(done, DispatchEvent::CapabilityCompleted)
            .expect_err("terminate is final");
        assert!(matches!(error, RoutingError::InvalidTransition { .. }));
    }

    #[test]
    fn substitution_is_audited_as_rejected_proposal() {
        let sink = InMemoryAuditSink::default();
        let mut state = counts(3, 0);
        let decision = RoutingSupervisor::new().decide_with_audit(
            &mut state,
            RouteProposal::Context,
            &sink,
            &AuditContext::new(Some("conv-7".to_owned()), "req-7", "routing-supervisor"),
        );

        assert_eq!(decision, RouteDecision::Dispatch(Capability::Gen));
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "routing.dispatch_substituted");
        assert_eq!(events[0].outcome, AuditOutcome::Rejected);
        assert_eq!(events[0].metadata.get("gen_count").map(String::as_str), Some("1"));
    }
}
