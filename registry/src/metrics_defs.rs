use shared::metrics_defs::{MetricDef, MetricType};

pub const RELOAD_APPLIED: MetricDef = MetricDef {
    name: "registry.reload.applied",
    metric_type: MetricType::Counter,
    description: "Registry snapshots applied after a content-hash change",
};

pub const RELOAD_SKIPPED: MetricDef = MetricDef {
    name: "registry.reload.skipped",
    metric_type: MetricType::Counter,
    description: "Registry pulls skipped because the content hash was unchanged",
};

pub const RELOAD_FAILED: MetricDef = MetricDef {
    name: "registry.reload.failed",
    metric_type: MetricType::Counter,
    description: "Registry reload attempts that failed and kept the previous snapshot",
};

pub const ALL_METRICS: &[MetricDef] = &[RELOAD_APPLIED, RELOAD_SKIPPED, RELOAD_FAILED];
