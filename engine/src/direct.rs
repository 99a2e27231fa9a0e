use crate::errors::EngineError;
use crate::frame::{AggregateFunction, ConditionOp, DimCondition, Frame, TIME_COLUMN};
use crate::metrics_defs::DIRECT_QUERY_SECONDS;
use backends::kv::MetricStore;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use shared::histogram;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The dimension whose equality conditions name the physical partitions to
/// fetch. Mandatory: without it the engine cannot know which clusters to
/// load.
pub const CLUSTER_DIMENSION: &str = "cluster_id";

#[derive(Clone, Debug, Deserialize)]
pub struct TimeAggregation {
    pub function: AggregateFunction,
    pub window_secs: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Aggregate {
    pub function: AggregateFunction,
    #[serde(default)]
    pub dimensions: Vec<String>,
}

/// A direct query over pre-aggregated cluster metrics.
#[derive(Clone, Debug, Deserialize)]
pub struct ClusterMetricQuery {
    pub metric_name: String,
    /// Disjunction of conjunctions over dimension columns.
    #[serde(default)]
    pub conditions: Vec<Vec<DimCondition>>,
    /// Optional pre-aggregation bucketing applied before the final
    /// aggregate.
    #[serde(default)]
    pub time_aggregation: Option<TimeAggregation>,
    /// At most one final aggregate; more is rejected.
    #[serde(default)]
    pub aggregates: Vec<Aggregate>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Point {
    pub timestamp_ms: i64,
    pub value: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Series {
    /// Label pairs sorted by name.
    pub labels: Vec<(String, String)>,
    pub points: Vec<Point>,
}

/// Loads raw per-cluster tabular data from the key-value store and reduces
/// it to a label-keyed series matrix.
pub struct DirectQueryEngine {
    store: Arc<MetricStore>,
}

impl DirectQueryEngine {
    pub fn new(store: Arc<MetricStore>) -> Self {
        DirectQueryEngine { store }
    }

    /// Range query: the full filter/bucket/aggregate pipeline, one series
    /// per distinct label set, points in time order.
    pub async fn query_range(
        &self,
        query: &ClusterMetricQuery,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<Vec<Series>, EngineError> {
        if query.aggregates.len() > 1 {
            return Err(EngineError::UnsupportedAggregate(query.aggregates.len()));
        }

        let started = Instant::now();
        let frame = self.load(query).await?;
        let frame = self.apply(frame, query, start, end, step)?;
        let matrix = to_matrix(&frame);
        histogram!(DIRECT_QUERY_SECONDS).record(started.elapsed().as_secs_f64());
        Ok(matrix)
    }

    /// Instant query: the range pipeline, reduced to the last point of each
    /// series.
    pub async fn query_instant(
        &self,
        query: &ClusterMetricQuery,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Series>, EngineError> {
        let matrix = self
            .query_range(query, start, end, Duration::from_secs(0))
            .await?;
        Ok(matrix
            .into_iter()
            .filter_map(|series| {
                let last = series.points.last().cloned()?;
                Some(Series {
                    labels: series.labels,
                    points: vec![last],
                })
            })
            .collect())
    }

    /// Resolves cluster ids and preloads every cluster's rows into one
    /// frame. A failed or empty per-cluster load is skipped with a warning;
    /// the query proceeds over whatever clusters succeeded.
    async fn load(&self, query: &ClusterMetricQuery) -> Result<Frame, EngineError> {
        let clusters = cluster_ids(&query.conditions);
        if clusters.is_empty() {
            return Err(EngineError::ClusterDimensionRequired);
        }

        let meta = match self.store.metric_meta(&query.metric_name).await {
            Ok(meta) => meta,
            Err(err) => {
                tracing::warn!(
                    metric = query.metric_name.as_str(),
                    error = %err,
                    "metric meta unavailable, returning empty result"
                );
                return Ok(Frame::default());
            }
        };

        let mut frame = Frame::new(meta.tags);
        for cluster in clusters {
            let rows = match self.store.cluster_rows(&query.metric_name, &cluster).await {
                Ok(Some(rows)) => rows,
                Ok(None) => {
                    tracing::warn!(
                        metric = query.metric_name.as_str(),
                        cluster = cluster.as_str(),
                        "no data for cluster, skipped"
                    );
                    continue;
                }
                Err(err) => {
                    tracing::warn!(
                        metric = query.metric_name.as_str(),
                        cluster = cluster.as_str(),
                        error = %err,
                        "cluster load failed, skipped"
                    );
                    continue;
                }
            };
            match Frame::from_raw_rows(&frame.dims, &rows) {
                Ok(loaded) if !loaded.is_empty() => frame.bind(loaded),
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(
                        metric = query.metric_name.as_str(),
                        cluster = cluster.as_str(),
                        error = %err,
                        "cluster rows unparsable, skipped"
                    );
                }
            }
        }
        Ok(frame)
    }

    /// The ordered filter/bucket/aggregate pipeline over a loaded frame.
    fn apply(
        &self,
        frame: Frame,
        query: &ClusterMetricQuery,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<Frame, EngineError> {
        let mut frame = frame
            .filter_time(start.timestamp(), end.timestamp())
            .filter_conditions(&query.conditions);

        if frame.is_empty() {
            return Ok(frame);
        }

        if let Some(time_aggregation) = &query.time_aggregation {
            frame.round_time(time_aggregation.window_secs as i64);
            let all_dims = frame.dims.clone();
            frame = frame.group_aggregate(&all_dims, time_aggregation.function);
        }

        if let Some(aggregate) = query.aggregates.first() {
            frame.round_time(step.as_secs() as i64);
            frame = frame.group_aggregate(&aggregate.dimensions, aggregate.function);
        }

        frame.sort_by_time();
        Ok(frame)
    }
}

/// Cluster ids named by equality conditions on the fixed cluster dimension,
/// across every OR branch, in appearance order.
fn cluster_ids(conditions: &[Vec<DimCondition>]) -> Vec<String> {
    let mut clusters = Vec::new();
    for branch in conditions {
        for cond in branch {
            if cond.operator == ConditionOp::Eq && cond.dimension == CLUSTER_DIMENSION {
                for value in &cond.values {
                    if !clusters.contains(value) {
                        clusters.push(value.clone());
                    }
                }
            }
        }
    }
    clusters
}

/// Groups frame rows into one series per distinct label set. Labels are the
/// dimension columns (value/time excluded), sorted by name; points keep
/// arrival order within their group. Timestamps convert from seconds to
/// milliseconds.
fn to_matrix(frame: &Frame) -> Vec<Series> {
    let mut groups: IndexMap<String, Series> = IndexMap::new();

    for row in &frame.rows {
        let mut labels: Vec<(String, String)> = frame
            .dims
            .iter()
            .cloned()
            .zip(row.dims.iter().cloned())
            .filter(|(name, _)| name != TIME_COLUMN)
            .collect();
        labels.sort();

        let key = labels
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("\u{1f}");

        let point = Point {
            timestamp_ms: row.time * 1000,
            value: row.value,
        };
        groups
            .entry(key)
            .or_insert_with(|| Series {
                labels,
                points: Vec::new(),
            })
            .points
            .push(point);
    }

    groups.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use backends::kv::MemoryHashStore;

    const META: &str = r#"{"metric_name": "node_cpu_usage", "tags": ["cluster_id", "node"]}"#;

    fn engine_with(clusters: &[(&str, &str)]) -> DirectQueryEngine {
        let mut memory = MemoryHashStore::new();
        memory.insert("plexus:metric_meta", "node_cpu_usage", META);
        for (cluster, rows) in clusters {
            memory.insert(
                "plexus:metric_data",
                &MetricStore::cluster_field("node_cpu_usage", cluster),
                *rows,
            );
        }
        DirectQueryEngine::new(Arc::new(MetricStore::new(Arc::new(memory), "plexus")))
    }

    fn cluster_cond(values: &[&str]) -> Vec<DimCondition> {
        vec![DimCondition {
            dimension: CLUSTER_DIMENSION.into(),
            operator: ConditionOp::Eq,
            values: values.iter().map(|v| v.to_string()).collect(),
        }]
    }

    fn query(conditions: Vec<Vec<DimCondition>>, aggregates: Vec<Aggregate>) -> ClusterMetricQuery {
        ClusterMetricQuery {
            metric_name: "node_cpu_usage".into(),
            conditions,
            time_aggregation: None,
            aggregates,
        }
    }

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            DateTime::from_timestamp(1_700_000_120, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn missing_cluster_dimension_is_rejected() {
        let engine = engine_with(&[]);
        let (start, end) = window();
        let err = engine
            .query_range(&query(vec![], vec![]), start, end, Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ClusterDimensionRequired));
    }

    #[tokio::test]
    async fn more_than_one_aggregate_is_rejected() {
        let engine = engine_with(&[]);
        let (start, end) = window();
        let aggregates = vec![
            Aggregate { function: AggregateFunction::Sum, dimensions: vec![] },
            Aggregate { function: AggregateFunction::Max, dimensions: vec![] },
        ];
        let err = engine
            .query_range(
                &query(vec![cluster_cond(&["cls-1"])], aggregates),
                start,
                end,
                Duration::from_secs(60),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedAggregate(2)));
    }

    #[tokio::test]
    async fn sum_and_mean_across_clusters() {
        // Two clusters contribute [1, 2] and [3, 4] at the same timestamp
        // with identical grouping dimensions.
        let engine = engine_with(&[
            (
                "cls-1",
                r#"[{"cluster_id": "cls-1", "node": "n1", "value": 1, "time": 1700000000},
                    {"cluster_id": "cls-1", "node": "n1", "value": 2, "time": 1700000000}]"#,
            ),
            (
                "cls-2",
                r#"[{"cluster_id": "cls-2", "node": "n1", "value": 3, "time": 1700000000},
                    {"cluster_id": "cls-2", "node": "n1", "value": 4, "time": 1700000000}]"#,
            ),
        ]);
        let (start, end) = window();
        let conditions = vec![cluster_cond(&["cls-1", "cls-2"])];

        let sum = engine
            .query_range(
                &query(
                    conditions.clone(),
                    vec![Aggregate { function: AggregateFunction::Sum, dimensions: vec!["node".into()] }],
                ),
                start,
                end,
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        assert_eq!(sum.len(), 1);
        // 1_700_000_000 floors to the 1_699_999_980 bucket at a 60s step.
        assert_eq!(
            sum[0].points,
            vec![Point { timestamp_ms: 1_699_999_980_000, value: 10.0 }]
        );

        let mean = engine
            .query_range(
                &query(
                    conditions,
                    vec![Aggregate { function: AggregateFunction::Mean, dimensions: vec!["node".into()] }],
                ),
                start,
                end,
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        assert_eq!(mean[0].points[0].value, 2.5);
    }

    #[tokio::test]
    async fn failed_cluster_is_skipped_best_effort() {
        // cls-2 holds unparsable rows; cls-1 still answers.
        let engine = engine_with(&[
            (
                "cls-1",
                r#"[{"cluster_id": "cls-1", "node": "n1", "value": 1, "time": 1700000000}]"#,
            ),
            ("cls-2", "not json"),
        ]);
        let (start, end) = window();
        let matrix = engine
            .query_range(
                &query(vec![cluster_cond(&["cls-1", "cls-2", "cls-absent"])], vec![]),
                start,
                end,
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        assert_eq!(matrix.len(), 1);
        assert_eq!(matrix[0].points.len(), 1);
    }

    #[tokio::test]
    async fn missing_meta_degrades_to_empty_matrix() {
        let mut memory = MemoryHashStore::new();
        memory.insert(
            "plexus:metric_data",
            &MetricStore::cluster_field("node_cpu_usage", "cls-1"),
            r#"[{"cluster_id": "cls-1", "value": 1, "time": 1700000000}]"#,
        );
        let engine =
            DirectQueryEngine::new(Arc::new(MetricStore::new(Arc::new(memory), "plexus")));
        let (start, end) = window();
        let matrix = engine
            .query_range(
                &query(vec![cluster_cond(&["cls-1"])], vec![]),
                start,
                end,
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        assert!(matrix.is_empty());
    }

    #[tokio::test]
    async fn or_branch_duplication_is_preserved() {
        // The same row satisfies both OR branches; it contributes twice to
        // the sum. Known (and accepted) behavior of branch-wise filtering.
        let engine = engine_with(&[(
            "cls-1",
            r#"[{"cluster_id": "cls-1", "node": "n1", "value": 5, "time": 1700000000}]"#,
        )]);
        let (start, end) = window();
        let conditions = vec![
            cluster_cond(&["cls-1"]),
            vec![
                DimCondition {
                    dimension: CLUSTER_DIMENSION.into(),
                    operator: ConditionOp::Eq,
                    values: vec!["cls-1".into()],
                },
                DimCondition {
                    dimension: "node".into(),
                    operator: ConditionOp::Eq,
                    values: vec!["n1".into()],
                },
            ],
        ];
        let matrix = engine
            .query_range(
                &query(
                    conditions,
                    vec![Aggregate { function: AggregateFunction::Sum, dimensions: vec!["node".into()] }],
                ),
                start,
                end,
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        assert_eq!(matrix[0].points[0].value, 10.0);
    }

    #[tokio::test]
    async fn time_aggregation_buckets_before_final_aggregate() {
        let engine = engine_with(&[(
            "cls-1",
            r#"[{"cluster_id": "cls-1", "node": "n1", "value": 1, "time": 1700000000},
                {"cluster_id": "cls-1", "node": "n1", "value": 3, "time": 1700000030},
                {"cluster_id": "cls-1", "node": "n2", "value": 5, "time": 1700000000}]"#,
        )]);
        let (start, end) = window();
        let q = ClusterMetricQuery {
            metric_name: "node_cpu_usage".into(),
            conditions: vec![cluster_cond(&["cls-1"])],
            time_aggregation: Some(TimeAggregation {
                function: AggregateFunction::Max,
                window_secs: 60,
            }),
            aggregates: vec![Aggregate {
                function: AggregateFunction::Sum,
                dimensions: vec![],
            }],
        };
        let matrix = engine
            .query_range(&q, start, end, Duration::from_secs(60))
            .await
            .unwrap();
        // Per-node max within the bucket (3 and 5), then summed across nodes.
        assert_eq!(matrix.len(), 1);
        assert_eq!(matrix[0].points[0].value, 8.0);
    }

    #[tokio::test]
    async fn matrix_groups_by_label_set_and_orders_points_by_time() {
        let engine = engine_with(&[(
            "cls-1",
            r#"[{"cluster_id": "cls-1", "node": "n1", "value": 2, "time": 1700000060},
                {"cluster_id": "cls-1", "node": "n1", "value": 1, "time": 1700000000},
                {"cluster_id": "cls-1", "node": "n2", "value": 9, "time": 1700000000}]"#,
        )]);
        let (start, end) = window();
        let matrix = engine
            .query_range(
                &query(vec![cluster_cond(&["cls-1"])], vec![]),
                start,
                end,
                Duration::from_secs(0),
            )
            .await
            .unwrap();

        assert_eq!(matrix.len(), 2);
        let n1 = matrix
            .iter()
            .find(|series| series.labels.contains(&("node".into(), "n1".into())))
            .unwrap();
        let times: Vec<i64> = n1.points.iter().map(|p| p.timestamp_ms).collect();
        assert_eq!(times, vec![1_700_000_000_000, 1_700_000_060_000]);
        assert!(n1.labels.contains(&("cluster_id".into(), "cls-1".into())));
    }

    #[tokio::test]
    async fn instant_query_keeps_last_point_only() {
        let engine = engine_with(&[(
            "cls-1",
            r#"[{"cluster_id": "cls-1", "node": "n1", "value": 1, "time": 1700000000},
                {"cluster_id": "cls-1", "node": "n1", "value": 7, "time": 1700000060}]"#,
        )]);
        let (start, end) = window();
        let vector = engine
            .query_instant(&query(vec![cluster_cond(&["cls-1"])], vec![]), start, end)
            .await
            .unwrap();
        assert_eq!(vector.len(), 1);
        assert_eq!(vector[0].points.len(), 1);
        assert_eq!(vector[0].points[0].value, 7.0);
    }
}
