pub mod engine;
pub mod states;

pub use engine::{RoutingError, RoutingSupervisor, CAPABILITY_CAP, MAX_DECISIONS};
pub use states::{
    Capability, DispatchEvent, DispatchState, RouteDecision, RouteProposal, RoutingState,
};
