use crate::metrics_defs::{RELOAD_APPLIED, RELOAD_FAILED, RELOAD_SKIPPED};
use crate::source::{ConfigSource, SourceError};
use crate::store::RegistryStore;
use crate::types::{AliasSet, RegistryKind, TableInfo};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use shared::counter;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_ALIAS_REFRESH: Duration = Duration::from_secs(60);

#[derive(thiserror::Error, Debug)]
#[error("alias catalogue lookup failed: {0}")]
pub struct CatalogueError(pub String);

/// Lists the alias catalogue the physical search backend actually serves for
/// one table. Implemented over the search client; kept as a trait here so the
/// coordinator does not depend on a concrete backend.
#[async_trait]
pub trait AliasCatalogue: Send + Sync {
    async fn aliases_for_table(&self, table: &TableInfo) -> Result<AliasSet, CatalogueError>;
}

struct Generation {
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

/// Keeps the registry store consistent with the external configuration store
/// without blocking query traffic.
///
/// Each registry kind is refreshed by its own cancellable background task:
/// storage and table snapshots re-pull on watch notifications, the alias
/// catalogue re-pulls on a fixed timer. A snapshot is applied only when its
/// content hash differs from the last applied one, so an unchanged pull never
/// swaps the store's snapshot reference. Reload failures are logged and the
/// previous snapshot stays authoritative.
pub struct ReloadCoordinator {
    store: Arc<RegistryStore>,
    source: Arc<dyn ConfigSource>,
    catalogue: Arc<dyn AliasCatalogue>,
    alias_refresh: Duration,
    applied: Mutex<HashMap<RegistryKind, [u8; 32]>>,
    generation: AsyncMutex<Option<Generation>>,
}

impl ReloadCoordinator {
    pub fn new(
        store: Arc<RegistryStore>,
        source: Arc<dyn ConfigSource>,
        catalogue: Arc<dyn AliasCatalogue>,
        alias_refresh: Duration,
    ) -> Self {
        ReloadCoordinator {
            store,
            source,
            catalogue,
            alias_refresh,
            applied: Mutex::new(HashMap::new()),
            generation: AsyncMutex::new(None),
        }
    }

    /// Performs the initial pulls, then spawns the watch loops. Stops a
    /// previous generation first and waits for its tasks to exit, so two
    /// watch loops for the same kind can never overlap.
    pub async fn start(self: &Arc<Self>) -> Result<(), SourceError> {
        self.stop().await;

        self.reload(RegistryKind::Storage).await?;
        self.reload(RegistryKind::Table).await?;
        // The alias catalogue needs the search backend; a failed first pull
        // is retried on the timer rather than failing startup.
        self.refresh_aliases().await;

        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();

        for kind in [RegistryKind::Storage, RegistryKind::Table] {
            let rx = self.source.watch(kind, cancel.child_token());
            tasks.spawn(Self::watch_loop(self.clone(), kind, rx, cancel.clone()));
        }
        tasks.spawn(Self::alias_loop(self.clone(), cancel.clone()));

        *self.generation.lock().await = Some(Generation { cancel, tasks });
        Ok(())
    }

    /// Cancels the shared token and blocks until every background task has
    /// exited.
    pub async fn stop(&self) {
        let mut guard = self.generation.lock().await;
        if let Some(mut generation) = guard.take() {
            generation.cancel.cancel();
            while generation.tasks.join_next().await.is_some() {}
        }
    }

    async fn watch_loop(
        coordinator: Arc<Self>,
        kind: RegistryKind,
        mut rx: tokio::sync::mpsc::Receiver<()>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                notification = rx.recv() => match notification {
                    Some(()) => {
                        if let Err(err) = coordinator.reload(kind).await {
                            counter!(RELOAD_FAILED).increment(1);
                            tracing::warn!(
                                kind = kind.as_str(),
                                error = %err,
                                "registry reload failed, keeping previous snapshot"
                            );
                        }
                    }
                    None => break,
                },
            }
        }
    }

    async fn alias_loop(coordinator: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(coordinator.alias_refresh);
        // The start() path already did the first refresh.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => coordinator.refresh_aliases().await,
            }
        }
    }

    /// Pulls one registry kind and applies it if its content changed.
    pub async fn reload(&self, kind: RegistryKind) -> Result<(), SourceError> {
        match kind {
            RegistryKind::Storage => {
                let snapshot = self.source.storage_snapshot().await?;
                if self.should_apply(kind, &snapshot) {
                    self.store.replace_storages(snapshot.into_iter().collect());
                }
            }
            RegistryKind::Table => {
                let snapshot = self.source.table_snapshot().await?;
                if self.should_apply(kind, &snapshot) {
                    self.store.replace_tables(snapshot.into_iter().collect());
                }
            }
            RegistryKind::Alias => self.refresh_aliases().await,
        }
        Ok(())
    }

    /// Rebuilds the alias catalogue from the live backend, one table at a
    /// time. A per-table failure keeps that table's previous set; the new
    /// map is applied wholesale only when its content changed.
    async fn refresh_aliases(&self) {
        let tables = self.store.tables_snapshot();
        let previous = self.store.aliases_snapshot();

        let mut next: HashMap<String, AliasSet> = HashMap::with_capacity(tables.len());
        for (name, table) in tables.iter() {
            match self.catalogue.aliases_for_table(table).await {
                Ok(set) => {
                    next.insert(name.clone(), set);
                }
                Err(err) => {
                    tracing::warn!(
                        table = name.as_str(),
                        error = %err,
                        "alias catalogue refresh failed, keeping previous set"
                    );
                    if let Some(old) = previous.get(name) {
                        next.insert(name.clone(), old.clone());
                    }
                }
            }
        }

        // Hash over sorted entries so the skip check is order-independent.
        let canonical: BTreeMap<&String, BTreeSet<&String>> = next
            .iter()
            .map(|(name, set)| (name, set.iter().collect()))
            .collect();
        if self.should_apply(RegistryKind::Alias, &canonical) {
            self.store.replace_aliases(next);
        }
    }

    /// Content-hash comparison for one kind. Returns true (and records the
    /// hash) when the snapshot differs from the last applied one.
    fn should_apply<T: Serialize>(&self, kind: RegistryKind, snapshot: &T) -> bool {
        let hash = match snapshot_hash(snapshot) {
            Some(hash) => hash,
            // Unhashable snapshots are applied unconditionally.
            None => {
                counter!(RELOAD_APPLIED).increment(1);
                return true;
            }
        };

        let mut applied = self.applied.lock();
        if applied.get(&kind) == Some(&hash) {
            counter!(RELOAD_SKIPPED).increment(1);
            tracing::debug!(kind = kind.as_str(), "registry snapshot unchanged, skipping");
            return false;
        }
        applied.insert(kind, hash);
        counter!(RELOAD_APPLIED).increment(1);
        tracing::info!(kind = kind.as_str(), "registry snapshot applied");
        true
    }
}

fn snapshot_hash<T: Serialize>(snapshot: &T) -> Option<[u8; 32]> {
    let bytes = serde_json::to_vec(snapshot).ok()?;
    Some(Sha256::digest(&bytes).into())
}
