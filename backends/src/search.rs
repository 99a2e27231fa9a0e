use crate::decoder::DecodeError;
use crate::errors::BackendError;
use crate::metrics_defs::{SEARCH_INFLIGHT, SEARCH_REQUESTS};
use async_trait::async_trait;
use shared::{counter, gauge};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};
use url::Url;

/// Bound on in-flight calls per endpoint when the registry does not set one.
pub const DEFAULT_MAX_CONCURRENCY: u32 = 200;

/// Transport seam for the search-engine client. The production transport is
/// HTTP; tests substitute an instrumented one to observe concurrency.
#[async_trait]
pub trait SearchTransport: Send + Sync {
    async fn search(
        &self,
        aliases: &[String],
        body: &serde_json::Value,
    ) -> Result<String, BackendError>;

    /// Raw alias-listing payload for an index pattern.
    async fn alias_listing(&self, pattern: &str) -> Result<String, BackendError>;
}

struct HttpSearchTransport {
    client: reqwest::Client,
    endpoint_id: String,
    host: Url,
    username: String,
    password: String,
}

impl HttpSearchTransport {
    fn request(&self, url: Url) -> reqwest::RequestBuilder {
        let builder = self.client.post(url);
        if self.username.is_empty() {
            builder
        } else {
            builder.basic_auth(&self.username, Some(&self.password))
        }
    }

    fn url_for(&self, path: &str) -> Url {
        let mut url = self.host.clone();
        url.set_path(path);
        url
    }

    async fn check(&self, response: reqwest::Response) -> Result<String, BackendError> {
        let status = response.status();
        if !status.is_success() {
            // Status line only; the body may be an unparsed backend payload.
            return Err(BackendError::Status {
                endpoint: self.endpoint_id.clone(),
                status: status.to_string(),
            });
        }
        response.text().await.map_err(|err| BackendError::Request {
            endpoint: self.endpoint_id.clone(),
            source: err,
        })
    }
}

#[async_trait]
impl SearchTransport for HttpSearchTransport {
    async fn search(
        &self,
        aliases: &[String],
        body: &serde_json::Value,
    ) -> Result<String, BackendError> {
        let target = if aliases.is_empty() {
            "_all".to_string()
        } else {
            aliases.join(",")
        };
        let url = self.url_for(&format!("{target}/_search"));

        let response = self
            .request(url)
            .json(body)
            .send()
            .await
            .map_err(|err| BackendError::Request {
                endpoint: self.endpoint_id.clone(),
                source: err,
            })?;
        self.check(response).await
    }

    async fn alias_listing(&self, pattern: &str) -> Result<String, BackendError> {
        let url = self.url_for(&format!("{pattern}/_alias"));
        let mut builder = self.client.get(url);
        if !self.username.is_empty() {
            builder = builder.basic_auth(&self.username, Some(&self.password));
        }
        let response = builder.send().await.map_err(|err| BackendError::Request {
            endpoint: self.endpoint_id.clone(),
            source: err,
        })?;
        self.check(response).await
    }
}

/// Search-engine client with a fixed-size concurrency bound per endpoint.
///
/// Every call holds a semaphore permit across the transport call, including
/// error returns, so outbound concurrency stays bounded independently of
/// caller concurrency.
pub struct SearchClient {
    endpoint_id: String,
    transport: Arc<dyn SearchTransport>,
    limiter: Semaphore,
}

impl SearchClient {
    pub fn new(
        endpoint_id: impl Into<String>,
        host: Url,
        username: impl Into<String>,
        password: impl Into<String>,
        max_concurrency: Option<u32>,
    ) -> Self {
        let endpoint_id = endpoint_id.into();
        let transport = Arc::new(HttpSearchTransport {
            client: reqwest::Client::new(),
            endpoint_id: endpoint_id.clone(),
            host,
            username: username.into(),
            password: password.into(),
        });
        Self::with_transport(endpoint_id, transport, max_concurrency)
    }

    pub fn with_transport(
        endpoint_id: impl Into<String>,
        transport: Arc<dyn SearchTransport>,
        max_concurrency: Option<u32>,
    ) -> Self {
        let bound = max_concurrency.unwrap_or(DEFAULT_MAX_CONCURRENCY).max(1);
        SearchClient {
            endpoint_id: endpoint_id.into(),
            transport,
            limiter: Semaphore::new(bound as usize),
        }
    }

    pub fn endpoint_id(&self) -> &str {
        &self.endpoint_id
    }

    /// Issues a search against the given aliases and returns the raw backend
    /// payload unchanged.
    pub async fn search(
        &self,
        body: &serde_json::Value,
        aliases: &[String],
    ) -> Result<String, BackendError> {
        let _permit = self.permit().await?;
        counter!(SEARCH_REQUESTS).increment(1);
        gauge!(SEARCH_INFLIGHT).increment(1.0);
        let result = self.transport.search(aliases, body).await;
        gauge!(SEARCH_INFLIGHT).decrement(1.0);
        result
    }

    /// Lists the aliases the backend serves for an index pattern, parsing
    /// only the `aliases` key set of the listing payload.
    pub async fn aliases_for_index(&self, pattern: &str) -> Result<HashSet<String>, BackendError> {
        let raw = {
            let _permit = self.permit().await?;
            self.transport.alias_listing(pattern).await?
        };

        let listing: serde_json::Value =
            serde_json::from_str(&raw).map_err(|err| DecodeError::Malformed {
                size: raw.len(),
                message: err.to_string(),
            })?;

        let mut aliases = HashSet::new();
        if let Some(indices) = listing.as_object() {
            for index_meta in indices.values() {
                if let Some(names) = index_meta.get("aliases").and_then(|a| a.as_object()) {
                    aliases.extend(names.keys().cloned());
                }
            }
        }
        Ok(aliases)
    }

    async fn permit(&self) -> Result<SemaphorePermit<'_>, BackendError> {
        self.limiter
            .acquire()
            .await
            .map_err(|_| BackendError::Internal("concurrency limiter closed".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::task::JoinSet;
    use tokio::time::Duration;

    struct CountingTransport {
        current: AtomicUsize,
        peak: AtomicUsize,
        fail: bool,
    }

    impl CountingTransport {
        fn new(fail: bool) -> Self {
            CountingTransport {
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                fail,
            }
        }
    }

    #[async_trait]
    impl SearchTransport for CountingTransport {
        async fn search(
            &self,
            _aliases: &[String],
            _body: &serde_json::Value,
        ) -> Result<String, BackendError> {
            let inflight = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(inflight, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            if self.fail {
                return Err(BackendError::Status {
                    endpoint: "test".into(),
                    status: "500 Internal Server Error".into(),
                });
            }
            Ok("{}".to_string())
        }

        async fn alias_listing(&self, _pattern: &str) -> Result<String, BackendError> {
            Ok("{}".to_string())
        }
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_bound() {
        let transport = Arc::new(CountingTransport::new(false));
        let client = Arc::new(SearchClient::with_transport(
            "s1",
            transport.clone(),
            Some(5),
        ));

        let mut calls = JoinSet::new();
        for _ in 0..25 {
            let client = client.clone();
            calls.spawn(async move { client.search(&serde_json::json!({}), &[]).await });
        }
        while let Some(result) = calls.join_next().await {
            result.unwrap().unwrap();
        }

        assert!(transport.peak.load(Ordering::SeqCst) <= 5);
        assert!(transport.peak.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn permit_released_on_error() {
        let transport = Arc::new(CountingTransport::new(true));
        let client = SearchClient::with_transport("s1", transport, Some(1));

        for _ in 0..3 {
            assert!(client.search(&serde_json::json!({}), &[]).await.is_err());
        }
        // All permits back after errored calls.
        assert_eq!(client.limiter.available_permits(), 1);
    }

    #[tokio::test]
    async fn alias_listing_parses_only_alias_names() {
        struct StaticTransport;

        #[async_trait]
        impl SearchTransport for StaticTransport {
            async fn search(
                &self,
                _aliases: &[String],
                _body: &serde_json::Value,
            ) -> Result<String, BackendError> {
                unreachable!()
            }

            async fn alias_listing(&self, _pattern: &str) -> Result<String, BackendError> {
                Ok(r#"{
                    "svc_logs_20210407": {
                        "aliases": {"svc_logs_20210407_read": {}},
                        "settings": {"number_of_shards": 3}
                    },
                    "svc_logs_20210408": {
                        "aliases": {"svc_logs_20210408_read": {}, "svc_logs_write": {}}
                    }
                }"#
                .to_string())
            }
        }

        let client = SearchClient::with_transport("s1", Arc::new(StaticTransport), None);
        let aliases = client.aliases_for_index("svc_logs_*").await.unwrap();
        assert_eq!(
            aliases,
            HashSet::from([
                "svc_logs_20210407_read".to_string(),
                "svc_logs_20210408_read".to_string(),
                "svc_logs_write".to_string(),
            ])
        );
    }
}
