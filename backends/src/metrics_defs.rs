use shared::metrics_defs::{MetricDef, MetricType};

pub const SEARCH_REQUESTS: MetricDef = MetricDef {
    name: "backend.search.requests",
    metric_type: MetricType::Counter,
    description: "Search calls issued after acquiring a concurrency permit",
};

pub const SEARCH_INFLIGHT: MetricDef = MetricDef {
    name: "backend.search.inflight",
    metric_type: MetricType::Gauge,
    description: "Search calls currently in flight against the backend",
};

pub const DECODE_CHUNKS: MetricDef = MetricDef {
    name: "backend.decode.chunks",
    metric_type: MetricType::Counter,
    description: "Wire chunks decoded across all streaming responses",
};

pub const KV_CLUSTER_MISSES: MetricDef = MetricDef {
    name: "backend.kv.cluster_misses",
    metric_type: MetricType::Counter,
    description: "Per-cluster reads that found no data and were skipped",
};

pub const ALL_METRICS: &[MetricDef] = &[
    SEARCH_REQUESTS,
    SEARCH_INFLIGHT,
    DECODE_CHUNKS,
    KV_CLUSTER_MISSES,
];
