pub mod decoder;
pub mod errors;
pub mod kv;
pub mod metrics_defs;
pub mod search;
pub mod tsdb;

pub use decoder::{DecodeError, Decoders, QueryResult, Response, Row, WireDecoder};
pub use errors::BackendError;
pub use kv::{HashStore, MemoryHashStore, MetricMeta, MetricStore, RedisHashStore};
pub use search::{SearchClient, SearchTransport};
pub use tsdb::TsdbClient;
