use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use url::Url;

pub type StorageId = String;

/// One physical backend instance. Owned by the registry store and replaced
/// wholesale on reload, never mutated in place.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StorageEndpoint {
    pub id: StorageId,
    /// Base URL of the backend, e.g. "http://search-0.internal:9200".
    pub host: Url,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Per-endpoint bound on in-flight search calls. `None` uses the
    /// client's default.
    #[serde(default)]
    pub max_concurrency: Option<u32>,
}

/// Maps a logical table to a storage endpoint and to the template used to
/// derive index aliases from date tokens.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub logical_name: String,
    pub storage_id: StorageId,
    /// Alias template with `{index}` and `{time}` placeholders,
    /// e.g. "{index}_{time}_read".
    pub alias_format: String,
    /// strftime pattern used to render date tokens, e.g. "%Y%m%d".
    pub date_format: String,
    pub date_step_hours: u32,
}

impl TableInfo {
    /// The physical index token for this table: logical name with the
    /// namespace separator flattened, e.g. "svc.logs" -> "svc_logs".
    pub fn index_name(&self) -> String {
        self.logical_name.replace('.', "_")
    }
}

/// Alias strings known to exist on the physical backend for one table.
pub type AliasSet = HashSet<String>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RegistryKind {
    Storage,
    Table,
    Alias,
}

impl RegistryKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            RegistryKind::Storage => "storage",
            RegistryKind::Table => "table",
            RegistryKind::Alias => "alias",
        }
    }
}
