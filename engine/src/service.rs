use crate::errors::QueryError;
use crate::metrics_defs::{FEDERATED_QUERIES, FEDERATED_QUERY_ERRORS};
use backends::SearchClient;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use registry::{AliasResolver, RegistryStore, StorageEndpoint};
use shared::counter;
use std::collections::HashMap;
use std::sync::Arc;

struct CachedClient {
    endpoint: StorageEndpoint,
    client: Arc<SearchClient>,
}

/// Per-endpoint search-client cache.
///
/// One `SearchClient` is shared by every request against a storage id, so the
/// endpoint's concurrency semaphore bounds the process-wide in-flight count.
/// The cached client is rebuilt when the registry's endpoint definition
/// changes.
#[derive(Clone)]
pub struct ClientPool {
    store: Arc<RegistryStore>,
    clients: Arc<RwLock<HashMap<String, CachedClient>>>,
}

impl ClientPool {
    pub fn new(store: Arc<RegistryStore>) -> Self {
        ClientPool {
            store,
            clients: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn client_for(&self, storage_id: &str) -> Result<Arc<SearchClient>, QueryError> {
        let endpoint = self
            .store
            .storage(storage_id)
            .ok_or_else(|| QueryError::StorageNotFound(storage_id.to_string()))?;

        if let Some(cached) = self.clients.read().get(storage_id)
            && cached.endpoint == endpoint
        {
            return Ok(cached.client.clone());
        }

        let client = Arc::new(SearchClient::new(
            endpoint.id.clone(),
            endpoint.host.clone(),
            endpoint.username.clone(),
            endpoint.password.clone(),
            endpoint.max_concurrency,
        ));
        self.clients.write().insert(
            storage_id.to_string(),
            CachedClient {
                endpoint,
                client: client.clone(),
            },
        );
        Ok(client)
    }
}

/// The federated query entrypoint the rest of the platform calls into:
/// registry lookup, alias resolution, search dispatch, raw payload out.
#[derive(Clone)]
pub struct QueryService {
    store: Arc<RegistryStore>,
    resolver: AliasResolver,
    clients: ClientPool,
}

impl QueryService {
    pub fn new(store: Arc<RegistryStore>, clients: ClientPool) -> Self {
        QueryService {
            resolver: AliasResolver::new(store.clone()),
            store,
            clients,
        }
    }

    /// Executes a search against the aliases resolved for `[start, end)` and
    /// returns the backend payload unchanged.
    pub async fn query(
        &self,
        table_id: &str,
        body: &serde_json::Value,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        fuzzy: bool,
    ) -> Result<String, QueryError> {
        counter!(FEDERATED_QUERIES).increment(1);
        let result = self.dispatch(table_id, body, start, end, fuzzy).await;
        if result.is_err() {
            counter!(FEDERATED_QUERY_ERRORS).increment(1);
        }
        result
    }

    async fn dispatch(
        &self,
        table_id: &str,
        body: &serde_json::Value,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        fuzzy: bool,
    ) -> Result<String, QueryError> {
        let aliases = self.resolver.resolve(table_id, start, end, fuzzy)?;
        // resolve() succeeded, so the table is known.
        let table = self
            .store
            .table(table_id)
            .ok_or_else(|| QueryError::StorageNotFound(table_id.to_string()))?;
        let client = self.clients.client_for(&table.storage_id)?;

        tracing::debug!(
            table = table_id,
            storage = table.storage_id.as_str(),
            aliases = aliases.len(),
            "dispatching federated search"
        );
        Ok(client.search(body, &aliases).await?)
    }
}
