use crate::service::ClientPool;
use async_trait::async_trait;
use registry::{AliasCatalogue, AliasSet, CatalogueError, TableInfo};

/// Bridges the reload coordinator's alias-catalogue refresh onto the search
/// backend each table's endpoint points at. The listing is requested for the
/// table's whole index family; the client parses out the alias names.
pub struct SearchAliasCatalogue {
    clients: ClientPool,
}

impl SearchAliasCatalogue {
    pub fn new(clients: ClientPool) -> Self {
        SearchAliasCatalogue { clients }
    }
}

#[async_trait]
impl AliasCatalogue for SearchAliasCatalogue {
    async fn aliases_for_table(&self, table: &TableInfo) -> Result<AliasSet, CatalogueError> {
        let client = self
            .clients
            .client_for(&table.storage_id)
            .map_err(|err| CatalogueError(err.to_string()))?;
        let pattern = format!("{}_*", table.index_name());
        client
            .aliases_for_index(&pattern)
            .await
            .map_err(|err| CatalogueError(err.to_string()))
    }
}
