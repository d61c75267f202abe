use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::routing::engine::{RoutingError, CAPABILITY_CAP};

/// One of the two answering units the supervisor can dispatch to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Context,
    Gen,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Context => "context",
            Self::Gen => "gen",
        }
    }

    pub fn other(self) -> Self {
        match self {
            Self::Context => Self::Gen,
            Self::Gen => Self::Context,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the external classifier asks for next.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteProposal {
    #[serde(rename = "context")]
    Context,
    #[serde(rename = "gen")]
    Gen,
    #[serde(rename = "FINISH")]
    Finish,
}

impl RouteProposal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Context => "context",
            Self::Gen => "gen",
            Self::Finish => "FINISH",
        }
    }
}

impl FromStr for RouteProposal {
    type Err = RoutingError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "context" => Ok(Self::Context),
            "gen" => Ok(Self::Gen),
            "finish" | "end" | "__end__" => Ok(Self::Finish),
            other => Err(RoutingError::UnknownProposal(other.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteDecision {
    Dispatch(Capability),
    Terminate,
}

/// Per-conversation dispatch counters. Only `RoutingSupervisor::decide`
/// increments them, and neither ever exceeds `CAPABILITY_CAP`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingState {
    context_count: u8,
    gen_count: u8,
}

impl RoutingState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_counts(context_count: u8, gen_count: u8) -> Result<Self, RoutingError> {
        if context_count > CAPABILITY_CAP || gen_count > CAPABILITY_CAP {
            return Err(RoutingError::CounterOutOfRange { context_count, gen_count });
        }
        Ok(Self { context_count, gen_count })
    }

    pub fn context_count(&self) -> u8 {
        self.context_count
    }

    pub fn gen_count(&self) -> u8 {
        self.gen_count
    }

    pub fn count(&self, capability: Capability) -> u8 {
        match capability {
            Capability::Context => self.context_count,
            Capability::Gen => self.gen_count,
        }
    }

    pub fn is_saturated(&self, capability: Capability) -> bool {
        self.count(capability) >= CAPABILITY_CAP
    }

    pub(crate) fn record_dispatch(&mut self, capability: Capability) {
        match capability {
            Capability::Context => self.context_count += 1,
            Capability::Gen => self.gen_count += 1,
        }
    }
}

/// Nodes of the conversation dispatch graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchState {
    Supervisor,
    Context,
    Gen,
    Terminate,
}

impl From<Capability> for DispatchState {
    fn from(value: Capability) -> Self {
        match value {
            Capability::Context => Self::Context,
            Capability::Gen => Self::Gen,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchEvent {
    Decided(RouteDecision),
    CapabilityCompleted,
}
