//! Wire result model and the pluggable response decoders.
//!
//! The time-series backend may deliver one logical result as a single message
//! or as an ordered sequence of chunks, each chunk a complete `Response`
//! carrying one result/row group with its own `partial` flag. Decoders turn
//! the byte stream into one accumulated `Response`; they never merge rows.
//! Merging is `stitch::merge_partials`, a pure function over the accumulator.

mod json_lines;
mod packed;
pub mod stitch;

pub use json_lines::JsonLinesDecoder;
pub use packed::PackedDecoder;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::AsyncBufRead;
use tokio_util::sync::CancellationToken;

/// One series row group as it appears on the wire.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub values: Vec<Vec<serde_json::Value>>,
    /// More data for the same `name`+`tags` group follows in a later chunk.
    #[serde(default)]
    pub partial: bool,
}

impl Row {
    /// Identity of the logical group this row belongs to.
    pub fn group_key(&self) -> String {
        let mut key = self.name.clone();
        for (tag, value) in &self.tags {
            key.push('\u{1f}');
            key.push_str(tag);
            key.push('=');
            key.push_str(value);
        }
        key
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    #[serde(default)]
    pub statement_id: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub series: Vec<Row>,
    #[serde(default)]
    pub partial: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<QueryResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("no decoder registered for content type {0:?}")]
    UnknownContentType(String),

    #[error("malformed payload ({size} bytes): {message}")]
    Malformed { size: usize, message: String },

    /// The stream failed after some chunks were decoded. The accumulated
    /// response is carried for diagnostics but must not be served: `partial`
    /// flags past the abort point are unresolved.
    #[error("stream error at byte {offset} after {} results: {message}", .partial.results.len())]
    Stream {
        partial: Box<Response>,
        offset: u64,
        message: String,
    },

    #[error("decode timed out: cancelled by caller deadline")]
    Cancelled,
}

pub type BodyReader = Pin<Box<dyn AsyncBufRead + Send>>;

/// A wire encoding, selected purely by declared content type.
#[async_trait]
pub trait WireDecoder: Send + Sync {
    /// Content type this decoder is registered under, e.g. "application/json".
    fn content_type(&self) -> &'static str;

    /// Consumes the body and reconstructs one accumulated `Response`,
    /// preserving chunk arrival order. Checks `cancel` before each unit so a
    /// stalled connection fails fast instead of running unbounded.
    async fn decode(
        &self,
        body: BodyReader,
        cancel: &CancellationToken,
    ) -> Result<Response, DecodeError>;
}

/// Named decoder registry. New encodings are added by registration, without
/// changing call sites.
pub struct Decoders {
    by_content_type: HashMap<&'static str, Arc<dyn WireDecoder>>,
}

impl Decoders {
    pub fn new() -> Self {
        Decoders {
            by_content_type: HashMap::new(),
        }
    }

    /// Registry with the two built-in encodings: line-delimited JSON and
    /// msgpack.
    pub fn with_defaults() -> Self {
        let mut decoders = Self::new();
        decoders.register(Arc::new(JsonLinesDecoder));
        decoders.register(Arc::new(PackedDecoder));
        decoders
    }

    pub fn register(&mut self, decoder: Arc<dyn WireDecoder>) {
        self.by_content_type.insert(decoder.content_type(), decoder);
    }

    /// Looks up a decoder by content type, ignoring any media-type
    /// parameters ("application/json; charset=utf-8").
    pub fn get(&self, content_type: &str) -> Result<Arc<dyn WireDecoder>, DecodeError> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or(content_type)
            .trim();
        self.by_content_type
            .get(essence)
            .cloned()
            .ok_or_else(|| DecodeError::UnknownContentType(content_type.to_string()))
    }
}

impl Default for Decoders {
    fn default() -> Self {
        Self::with_defaults()
    }
}
