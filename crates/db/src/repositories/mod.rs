use async_trait::async_trait;
use thiserror::Error;

use docgenie_core::domain::connector::ConnectorDescriptor;

pub mod connector;
pub mod memory;

pub use connector::SqlConnectorRepository;
pub use memory::InMemoryConnectorRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Durable connector registry. The `active` flag is runtime state and is not
/// persisted; loaded descriptors always start inactive.
#[async_trait]
pub trait ConnectorRepository: Send + Sync {
    async fn list_all(&self) -> Result<Vec<ConnectorDescriptor>, RepositoryError>;
    async fn find_by_name(&self, name: &str)
        -> Result<Option<ConnectorDescriptor>, RepositoryError>;
    /// Inserts or replaces the registration with the same name.
    async fn save(&self, connector: ConnectorDescriptor) -> Result<(), RepositoryError>;
}
