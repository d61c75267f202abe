use std::collections::BTreeMap;

use tokio::sync::RwLock;

use docgenie_core::domain::connector::ConnectorDescriptor;

use super::{ConnectorRepository, RepositoryError};

#[derive(Default)]
pub struct InMemoryConnectorRepository {
    connectors: RwLock<BTreeMap<String, (u64, ConnectorDescriptor)>>,
}

impl InMemoryConnectorRepository {
    pub fn with_connectors(connectors: impl IntoIterator<Item = ConnectorDescriptor>) -> Self {
        let connectors = connectors
            .into_iter()
            .enumerate()
            .map(|(order, connector)| (connector.name.clone(), (order as u64, connector)))
            .collect();
        Self { connectors: RwLock::new(connectors) }
    }
}

#[async_trait::async_trait]
impl ConnectorRepository for InMemoryConnectorRepository {
    async fn list_all(&self) -> Result<Vec<ConnectorDescriptor>, RepositoryError> {
        let connectors = self.connectors.read().await;
        let mut ordered: Vec<_> = connectors.values().cloned().collect();
        ordered.sort_by_key(|(order, _)| *order);
        Ok(ordered.into_iter().map(|(_, connector)| connector).collect())
    }

    async fn find_by_name(
        &self,
        name: &str,
    ) -> Result<Option<ConnectorDescriptor>, RepositoryError> {
        let connectors = self.connectors.read().await;
        Ok(connectors.get(name).map(|(_, connector)| connector.clone()))
    }

    async fn save(&self, mut connector: ConnectorDescriptor) -> Result<(), RepositoryError> {
        connector.active = false;
        let mut connectors = self.connectors.write().await;
        let next_order = connectors.len() as u64;
        let order = connectors.get(&connector.name).map_or(next_order, |(order, _)| *order);
        connectors.insert(connector.name.clone(), (order, connector));
        Ok(())
    }
}
