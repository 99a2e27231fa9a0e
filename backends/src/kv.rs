use crate::decoder::DecodeError;
use crate::errors::BackendError;
use crate::metrics_defs::KV_CLUSTER_MISSES;
use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use shared::counter;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Hash field under the data key, one entry per metric/cluster pair.
pub const CLUSTER_FIELD_PATTERN: &str = "{metric_name}|{cluster_id}";
const META_KEY: &str = "metric_meta";
const DATA_KEY: &str = "metric_data";

/// Narrow read contract over the key-value backend. Production uses redis;
/// tests use the in-memory store.
#[async_trait]
pub trait HashStore: Send + Sync {
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, BackendError>;
}

pub struct RedisHashStore {
    manager: redis::aio::ConnectionManager,
}

impl RedisHashStore {
    pub async fn connect(url: &str) -> Result<Self, BackendError> {
        let client = redis::Client::open(url)?;
        let manager = client.get_connection_manager().await?;
        Ok(RedisHashStore { manager })
    }
}

#[async_trait]
impl HashStore for RedisHashStore {
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, BackendError> {
        let mut conn = self.manager.clone();
        Ok(conn.hget(key, field).await?)
    }
}

/// In-memory `HashStore` used by tests and local development.
#[derive(Default)]
pub struct MemoryHashStore {
    entries: HashMap<(String, String), String>,
}

impl MemoryHashStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, field: &str, value: impl Into<String>) {
        self.entries
            .insert((key.to_string(), field.to_string()), value.into());
    }
}

#[async_trait]
impl HashStore for MemoryHashStore {
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, BackendError> {
        Ok(self
            .entries
            .get(&(key.to_string(), field.to_string()))
            .cloned())
    }
}

/// Schema of a pre-aggregated metric: the dimension columns its rows carry
/// in addition to the fixed value/time columns.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricMeta {
    pub metric_name: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// One raw tabular row, column name to JSON value.
pub type RawRow = BTreeMap<String, serde_json::Value>;

/// Two-stage reader for pre-aggregated cluster metrics: the metric's schema
/// first, then each cluster's raw rows under a templated hash field.
pub struct MetricStore {
    store: Arc<dyn HashStore>,
    prefix: String,
}

impl MetricStore {
    pub fn new(store: Arc<dyn HashStore>, prefix: impl Into<String>) -> Self {
        MetricStore {
            store,
            prefix: prefix.into(),
        }
    }

    pub fn meta_key(&self) -> String {
        format!("{}:{}", self.prefix, META_KEY)
    }

    pub fn data_key(&self) -> String {
        format!("{}:{}", self.prefix, DATA_KEY)
    }

    pub fn cluster_field(metric_name: &str, cluster_id: &str) -> String {
        CLUSTER_FIELD_PATTERN
            .replace("{metric_name}", metric_name)
            .replace("{cluster_id}", cluster_id)
    }

    pub async fn metric_meta(&self, metric_name: &str) -> Result<MetricMeta, BackendError> {
        let raw = self
            .store
            .hget(&self.meta_key(), metric_name)
            .await?
            .ok_or_else(|| {
                BackendError::Internal(format!("no metric meta for {metric_name:?}"))
            })?;
        serde_json::from_str(&raw).map_err(|err| {
            DecodeError::Malformed {
                size: raw.len(),
                message: format!("metric meta: {err}"),
            }
            .into()
        })
    }

    /// Raw rows for one cluster, or `None` when the backend holds no data
    /// for it. Callers treat missing clusters as best-effort degradation,
    /// not failure.
    pub async fn cluster_rows(
        &self,
        metric_name: &str,
        cluster_id: &str,
    ) -> Result<Option<Vec<RawRow>>, BackendError> {
        let field = Self::cluster_field(metric_name, cluster_id);
        let raw = match self.store.hget(&self.data_key(), &field).await? {
            Some(raw) => raw,
            None => {
                counter!(KV_CLUSTER_MISSES).increment(1);
                return Ok(None);
            }
        };
        let rows: Vec<RawRow> = serde_json::from_str(&raw).map_err(|err| {
            DecodeError::Malformed {
                size: raw.len(),
                message: format!("cluster rows for {field}: {err}"),
            }
        })?;
        Ok(Some(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(entries: &[(&str, &str, &str)]) -> MetricStore {
        let mut memory = MemoryHashStore::new();
        for (key, field, value) in entries {
            memory.insert(key, field, *value);
        }
        MetricStore::new(Arc::new(memory), "plexus")
    }

    #[tokio::test]
    async fn meta_and_rows_round_trip() {
        let store = store_with(&[
            (
                "plexus:metric_meta",
                "node_cpu_usage",
                r#"{"metric_name": "node_cpu_usage", "tags": ["node"]}"#,
            ),
            (
                "plexus:metric_data",
                "node_cpu_usage|cls-1",
                r#"[{"node": "n1", "value": 0.5, "time": 1700000000}]"#,
            ),
        ]);

        let meta = store.metric_meta("node_cpu_usage").await.unwrap();
        assert_eq!(meta.tags, vec!["node".to_string()]);

        let rows = store
            .cluster_rows("node_cpu_usage", "cls-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["node"], "n1");
    }

    #[tokio::test]
    async fn missing_cluster_is_none_not_error() {
        let store = store_with(&[]);
        assert!(store
            .cluster_rows("node_cpu_usage", "cls-404")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn missing_meta_is_an_error() {
        let store = store_with(&[]);
        assert!(store.metric_meta("absent").await.is_err());
    }

    #[tokio::test]
    async fn malformed_rows_report_size() {
        let store = store_with(&[("plexus:metric_data", "m|c", "not json")]);
        let err = store.cluster_rows("m", "c").await.unwrap_err();
        assert!(matches!(
            err,
            BackendError::Decode(DecodeError::Malformed { size: 8, .. })
        ));
    }

    #[test]
    fn cluster_field_substitutes_both_tokens() {
        assert_eq!(
            MetricStore::cluster_field("node_cpu_usage", "cls-1"),
            "node_cpu_usage|cls-1"
        );
    }
}
