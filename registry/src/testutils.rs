//! In-memory fakes and a mock configuration-store server shared by the
//! registry tests.

use crate::reloader::{AliasCatalogue, CatalogueError};
use crate::source::{ConfigSource, SourceError};
use crate::types::{AliasSet, RegistryKind, StorageEndpoint, TableInfo};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

pub fn endpoint(id: &str, max_concurrency: u32) -> StorageEndpoint {
    StorageEndpoint {
        id: id.to_string(),
        host: Url::parse("http://127.0.0.1:9200").unwrap(),
        username: String::new(),
        password: String::new(),
        max_concurrency: Some(max_concurrency),
    }
}

pub fn table(logical_name: &str, storage_id: &str) -> TableInfo {
    TableInfo {
        logical_name: logical_name.to_string(),
        storage_id: storage_id.to_string(),
        alias_format: "{index}_{time}_read".to_string(),
        date_format: "%Y%m%d".to_string(),
        date_step_hours: 2,
    }
}

/// ConfigSource fake with mutable snapshots and hand-driven notifications.
pub struct StaticSource {
    storages: Mutex<BTreeMap<String, StorageEndpoint>>,
    tables: Mutex<BTreeMap<String, TableInfo>>,
    fail_next: AtomicBool,
    watchers: Mutex<HashMap<RegistryKind, Vec<mpsc::Sender<()>>>>,
}

impl StaticSource {
    pub fn new(
        storages: BTreeMap<String, StorageEndpoint>,
        tables: BTreeMap<String, TableInfo>,
    ) -> Self {
        StaticSource {
            storages: Mutex::new(storages),
            tables: Mutex::new(tables),
            fail_next: AtomicBool::new(false),
            watchers: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_storages(&self, next: BTreeMap<String, StorageEndpoint>) {
        *self.storages.lock() = next;
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::Relaxed);
    }

    pub async fn notify(&self, kind: RegistryKind) {
        let senders = self.watchers.lock().get(&kind).cloned().unwrap_or_default();
        for tx in senders {
            let _ = tx.send(()).await;
        }
    }

    fn check_failure(&self) -> Result<(), SourceError> {
        if self.fail_next.swap(false, Ordering::Relaxed) {
            return Err(SourceError::RetriesExceeded("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ConfigSource for StaticSource {
    async fn storage_snapshot(&self) -> Result<BTreeMap<String, StorageEndpoint>, SourceError> {
        self.check_failure()?;
        Ok(self.storages.lock().clone())
    }

    async fn table_snapshot(&self) -> Result<BTreeMap<String, TableInfo>, SourceError> {
        self.check_failure()?;
        Ok(self.tables.lock().clone())
    }

    fn watch(&self, kind: RegistryKind, _cancel: CancellationToken) -> mpsc::Receiver<()> {
        let (tx, rx) = mpsc::channel(4);
        self.watchers.lock().entry(kind).or_default().push(tx);
        rx
    }
}

/// AliasCatalogue fake; `fail_all` makes every lookup error.
pub struct StaticCatalogue {
    sets: Mutex<HashMap<String, AliasSet>>,
    failing: AtomicBool,
}

impl StaticCatalogue {
    pub fn new(sets: HashMap<String, AliasSet>) -> Self {
        StaticCatalogue {
            sets: Mutex::new(sets),
            failing: AtomicBool::new(false),
        }
    }

    pub fn empty() -> Self {
        Self::new(HashMap::new())
    }

    pub fn fail_all(&self) {
        self.failing.store(true, Ordering::Relaxed);
    }
}

#[async_trait]
impl AliasCatalogue for StaticCatalogue {
    async fn aliases_for_table(&self, table: &TableInfo) -> Result<AliasSet, CatalogueError> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(CatalogueError("catalogue offline".into()));
        }
        Ok(self
            .sets
            .lock()
            .get(&table.logical_name)
            .cloned()
            .unwrap_or_default())
    }
}

struct ServerState {
    storages: BTreeMap<String, StorageEndpoint>,
    tables: BTreeMap<String, TableInfo>,
    index: AtomicU64,
    failing: bool,
}

/// Mock configuration-store HTTP server for `HttpConfigStore` tests.
pub struct TestConfigStoreServer {
    addr: std::net::SocketAddr,
    state: Arc<ServerState>,
}

impl TestConfigStoreServer {
    pub async fn spawn() -> Self {
        Self::spawn_inner(false).await
    }

    /// Every endpoint answers 500, for retry-exhaustion tests.
    pub async fn spawn_failing() -> Self {
        Self::spawn_inner(true).await
    }

    async fn spawn_inner(failing: bool) -> Self {
        use axum::extract::{Path, Query, State};
        use axum::http::StatusCode;
        use axum::response::IntoResponse;
        use axum::routing::get;
        use axum::{Json, Router};
        use serde::Deserialize;

        let state = Arc::new(ServerState {
            storages: BTreeMap::from([("s1".to_string(), endpoint("s1", 10))]),
            tables: BTreeMap::from([("svc.logs".to_string(), table("svc.logs", "s1"))]),
            index: AtomicU64::new(0),
            failing,
        });

        #[derive(Deserialize)]
        struct NotifyParams {
            #[serde(default)]
            index: u64,
        }

        async fn storages(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
            if state.failing {
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
            Json(state.storages.clone()).into_response()
        }

        async fn tables(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
            if state.failing {
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
            Json(state.tables.clone()).into_response()
        }

        async fn notify(
            State(state): State<Arc<ServerState>>,
            Path(_kind): Path<String>,
            Query(params): Query<NotifyParams>,
        ) -> impl IntoResponse {
            let current = state.index.load(Ordering::Relaxed);
            if current > params.index {
                return Json(serde_json::json!({ "index": current })).into_response();
            }
            // Short poll window; the client loops on 204.
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            StatusCode::NO_CONTENT.into_response()
        }

        let app = Router::new()
            .route("/registry/storages", get(storages))
            .route("/registry/tables", get(tables))
            .route("/registry/notify/{kind}", get(notify))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        TestConfigStoreServer { addr, state }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn bump_index(&self) {
        self.state.index.fetch_add(1, Ordering::Relaxed);
    }
}
