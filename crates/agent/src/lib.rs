//! Conversation side of docgenie: answers one user question by routing the
//! conversation between the `context` and `gen` capabilities.
//!
//! The loop per question is:
//! 1. **Access gate** (`guardrails`) - an empty permission set ends the call with no answer
//! 2. **Classification** (`classifier`) - the LLM proposes `context`, `gen` or `FINISH`
//! 3. **Dispatch** - `RoutingSupervisor` turns the proposal into a bounded decision
//! 4. **Capability call** (`capability`) - the chosen capability appends one tagged message
//!
//! The LLM only proposes. Counters, caps and termination are decided by the
//! supervisor in `docgenie-core`.

pub mod capability;
pub mod classifier;
pub mod guardrails;
pub mod llm;
pub mod orchestrator;

pub use capability::{AnswerCapability, ContextCapability, GenCapability};
pub use classifier::{LlmRouteClassifier, RouteClassifier};
pub use guardrails::{AccessDecision, AccessPolicy, PermissionScope};
pub use llm::{HttpLlmClient, LlmClient};
pub use orchestrator::ConversationOrchestrator;
