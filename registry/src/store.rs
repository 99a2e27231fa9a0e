use crate::types::{AliasSet, StorageEndpoint, TableInfo};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Concurrently-read registry of storage endpoints, table info, and alias
/// sets.
///
/// Each map is held as an `Arc` snapshot behind a read/write lock and is only
/// ever replaced wholesale: an in-flight reader holds either the old or the
/// new snapshot, never a mix. A miss is not an error at this layer; callers
/// interpret `None` at query time.
#[derive(Default)]
pub struct RegistryStore {
    storages: RwLock<Arc<HashMap<String, StorageEndpoint>>>,
    tables: RwLock<Arc<HashMap<String, TableInfo>>>,
    aliases: RwLock<Arc<HashMap<String, AliasSet>>>,
    // Used by the readiness probe. Initially false and set to true once a
    // table snapshot has been applied.
    ready: AtomicBool,
}

impl RegistryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn storage(&self, id: &str) -> Option<StorageEndpoint> {
        self.storages.read().get(id).cloned()
    }

    pub fn table(&self, logical_name: &str) -> Option<TableInfo> {
        self.tables.read().get(logical_name).cloned()
    }

    pub fn aliases(&self, logical_name: &str) -> Option<AliasSet> {
        self.aliases.read().get(logical_name).cloned()
    }

    pub fn replace_storages(&self, next: HashMap<String, StorageEndpoint>) {
        *self.storages.write() = Arc::new(next);
    }

    pub fn replace_tables(&self, next: HashMap<String, TableInfo>) {
        *self.tables.write() = Arc::new(next);
        self.ready.store(true, Ordering::Relaxed);
    }

    pub fn replace_aliases(&self, next: HashMap<String, AliasSet>) {
        *self.aliases.write() = Arc::new(next);
    }

    /// Handle to the current storage snapshot. Pointer identity changes
    /// exactly when a replacement was applied.
    pub fn storages_snapshot(&self) -> Arc<HashMap<String, StorageEndpoint>> {
        self.storages.read().clone()
    }

    pub fn tables_snapshot(&self) -> Arc<HashMap<String, TableInfo>> {
        self.tables.read().clone()
    }

    pub fn aliases_snapshot(&self) -> Arc<HashMap<String, AliasSet>> {
        self.aliases.read().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }
}
