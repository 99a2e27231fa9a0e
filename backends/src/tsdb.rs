use crate::decoder::{Decoders, Response};
use crate::errors::BackendError;
use futures::TryStreamExt;
use std::sync::Arc;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use url::Url;

/// HTTP client for the time-series database.
///
/// One query is one GET against `/query`; the response may be a single
/// message or a chunked sequence, and the decoder is selected purely by the
/// response content type.
pub struct TsdbClient {
    client: reqwest::Client,
    address: Url,
    username: String,
    password: String,
    /// Preferred response encoding, sent as the Accept header.
    content_type: String,
    chunk_size: u32,
    decoders: Arc<Decoders>,
}

impl TsdbClient {
    pub fn new(
        address: Url,
        username: impl Into<String>,
        password: impl Into<String>,
        content_type: impl Into<String>,
        chunk_size: u32,
    ) -> Self {
        TsdbClient {
            client: reqwest::Client::new(),
            address,
            username: username.into(),
            password: password.into(),
            content_type: content_type.into(),
            chunk_size,
            decoders: Arc::new(Decoders::with_defaults()),
        }
    }

    /// Replaces the decoder registry, for deployments adding encodings.
    pub fn with_decoders(mut self, decoders: Decoders) -> Self {
        self.decoders = Arc::new(decoders);
        self
    }

    fn endpoint(&self) -> String {
        self.address
            .host_str()
            .map(str::to_string)
            .unwrap_or_else(|| self.address.to_string())
    }

    /// Runs one statement and decodes the (possibly chunked) result stream
    /// into a single accumulated response. `cancel` is checked inside the
    /// decode loop so a stalled stream honors the caller's deadline.
    pub async fn query(
        &self,
        db: &str,
        statement: &str,
        precision: &str,
        chunked: bool,
        cancel: &CancellationToken,
    ) -> Result<Response, BackendError> {
        let mut url = self.address.clone();
        url.set_path("query");
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("db", db);
            pairs.append_pair("q", statement);
            if !precision.is_empty() {
                pairs.append_pair("precision", precision);
            }
            if chunked {
                pairs.append_pair("chunked", "true");
                if self.chunk_size > 0 {
                    pairs.append_pair("chunk_size", &self.chunk_size.to_string());
                }
            }
        }

        let mut request = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, &self.content_type);
        if !self.username.is_empty() {
            request = request.basic_auth(&self.username, Some(&self.password));
        }

        let response = request.send().await.map_err(|err| BackendError::Request {
            endpoint: self.endpoint(),
            source: err,
        })?;

        let status = response.status();
        if !status.is_success() {
            // The error is built from the status line, never from the body.
            return Err(BackendError::Status {
                endpoint: self.endpoint(),
                status: status.to_string(),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or(&self.content_type)
            .to_string();
        let decoder = self.decoders.get(&content_type)?;

        let stream = response.bytes_stream().map_err(std::io::Error::other);
        let reader = tokio::io::BufReader::new(StreamReader::new(stream));
        let decoded = decoder.decode(Box::pin(reader), cancel).await?;
        tracing::debug!(
            db,
            results = decoded.results.len(),
            chunked,
            "time-series query decoded"
        );
        Ok(decoded)
    }
}
