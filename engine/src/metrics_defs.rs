use shared::metrics_defs::{MetricDef, MetricType};

pub const FEDERATED_QUERIES: MetricDef = MetricDef {
    name: "engine.federated.queries",
    metric_type: MetricType::Counter,
    description: "Federated search queries accepted by the entrypoint",
};

pub const FEDERATED_QUERY_ERRORS: MetricDef = MetricDef {
    name: "engine.federated.query_errors",
    metric_type: MetricType::Counter,
    description: "Federated queries that returned an error to the caller",
};

pub const DIRECT_QUERY_SECONDS: MetricDef = MetricDef {
    name: "engine.direct.query_seconds",
    metric_type: MetricType::Histogram,
    description: "Direct-query pipeline duration in seconds",
};

pub const ALL_METRICS: &[MetricDef] = &[
    FEDERATED_QUERIES,
    FEDERATED_QUERY_ERRORS,
    DIRECT_QUERY_SECONDS,
];
