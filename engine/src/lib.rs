pub mod catalogue;
pub mod direct;
pub mod errors;
pub mod frame;
pub mod metrics_defs;
pub mod service;

pub use catalogue::SearchAliasCatalogue;
pub use direct::{ClusterMetricQuery, DirectQueryEngine, Point, Series};
pub use errors::{EngineError, QueryError};
pub use frame::{AggregateFunction, ConditionOp, DimCondition, Frame};
pub use service::{ClientPool, QueryService};
