pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod knowledge;
pub mod routing;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
pub use domain::connector::{ConnectorDescriptor, ConnectorKind, SourceDescriptor};
pub use domain::message::{ConversationState, Message, OriginTag, Role};
pub use domain::record::IngestionRecord;
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use knowledge::{InMemoryKnowledgeStore, KnowledgeStore, KnowledgeStoreError};
pub use routing::{
    Capability, DispatchState, RouteDecision, RouteProposal, RoutingState, RoutingSupervisor,
};
