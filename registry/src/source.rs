use crate::types::{RegistryKind, StorageEndpoint, TableInfo};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tokio::time::{Duration, sleep};
use tokio_util::sync::CancellationToken;

const BASE_DELAY_MILLIS: u64 = 500;
const MAX_RETRIES: u32 = 3;

#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    #[error("could not load registry snapshot: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid configuration store URL: {0}")]
    InvalidUrl(String),

    #[error("configuration store unavailable after {MAX_RETRIES} retries: {0}")]
    RetriesExceeded(String),
}

/// Pull + notify contract of the external configuration store.
///
/// Snapshots come back as `BTreeMap` so the coordinator's content hash is
/// deterministic regardless of the store's own ordering.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn storage_snapshot(&self) -> Result<BTreeMap<String, StorageEndpoint>, SourceError>;

    async fn table_snapshot(&self) -> Result<BTreeMap<String, TableInfo>, SourceError>;

    /// Change-notification stream for one registry kind. One unit is
    /// delivered per detected change; the channel closes when `cancel` fires
    /// or the source shuts down.
    fn watch(&self, kind: RegistryKind, cancel: CancellationToken) -> mpsc::Receiver<()>;
}

#[derive(Deserialize)]
struct NotifyResponse {
    index: u64,
}

/// HTTP implementation of the configuration-store contract.
///
/// Snapshots are plain GETs with bounded retry on retriable statuses; the
/// watch stream long-polls the store's notify endpoint with the last seen
/// change index.
#[derive(Clone)]
pub struct HttpConfigStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpConfigStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        HttpConfigStore {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    async fn get_snapshot<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<T, SourceError> {
        const RETRIABLE_STATUS_CODES: &[StatusCode] = &[
            StatusCode::TOO_MANY_REQUESTS,     // 429
            StatusCode::INTERNAL_SERVER_ERROR, // 500
            StatusCode::BAD_GATEWAY,           // 502
            StatusCode::SERVICE_UNAVAILABLE,   // 503
            StatusCode::GATEWAY_TIMEOUT,       // 504
        ];

        let url = format!("{}/{}", self.base_url, path);
        let mut retries = 0;

        loop {
            let response = self.client.get(&url).send().await?;

            if !response.status().is_success() {
                if RETRIABLE_STATUS_CODES.contains(&response.status()) && retries < MAX_RETRIES {
                    // Backoff between retries
                    let retry_millis = BASE_DELAY_MILLIS * 2_u64.pow(retries);
                    sleep(Duration::from_millis(retry_millis)).await;
                    retries += 1;
                    continue;
                }
                return Err(SourceError::RetriesExceeded(format!(
                    "{} returned {}",
                    url,
                    response.status()
                )));
            }

            return Ok(response.json::<T>().await?);
        }
    }
}

#[async_trait]
impl ConfigSource for HttpConfigStore {
    async fn storage_snapshot(&self) -> Result<BTreeMap<String, StorageEndpoint>, SourceError> {
        self.get_snapshot("registry/storages").await
    }

    async fn table_snapshot(&self) -> Result<BTreeMap<String, TableInfo>, SourceError> {
        self.get_snapshot("registry/tables").await
    }

    fn watch(&self, kind: RegistryKind, cancel: CancellationToken) -> mpsc::Receiver<()> {
        let (tx, rx) = mpsc::channel(1);
        let client = self.client.clone();
        let base_url = self.base_url.clone();

        tokio::spawn(async move {
            let mut index: u64 = 0;
            loop {
                let url = format!(
                    "{}/registry/notify/{}?index={}",
                    base_url,
                    kind.as_str(),
                    index
                );

                let poll = tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = client.get(&url).send() => result,
                };

                match poll {
                    Ok(response) if response.status() == StatusCode::OK => {
                        match response.json::<NotifyResponse>().await {
                            Ok(notify) => {
                                index = notify.index;
                                if tx.send(()).await.is_err() {
                                    // Receiver dropped, the watcher is gone.
                                    break;
                                }
                            }
                            Err(err) => {
                                tracing::warn!(
                                    kind = kind.as_str(),
                                    error = %err,
                                    "malformed notify payload from configuration store"
                                );
                                sleep(Duration::from_millis(BASE_DELAY_MILLIS)).await;
                            }
                        }
                    }
                    // 204: poll window elapsed without a change.
                    Ok(response) if response.status() == StatusCode::NO_CONTENT => continue,
                    Ok(response) => {
                        tracing::warn!(
                            kind = kind.as_str(),
                            status = %response.status(),
                            "unexpected notify status from configuration store"
                        );
                        sleep(Duration::from_millis(BASE_DELAY_MILLIS)).await;
                    }
                    Err(err) => {
                        tracing::warn!(
                            kind = kind.as_str(),
                            error = %err,
                            "notify poll failed, backing off"
                        );
                        sleep(Duration::from_millis(BASE_DELAY_MILLIS)).await;
                    }
                }
            }
        });

        rx
    }
}
