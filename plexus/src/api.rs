use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response as AxumResponse};
use axum::routing::{get, post};
use axum::Json;
use backends::decoder::stitch::merge_partials;
use backends::TsdbClient;
use chrono::DateTime;
use engine::{ClusterMetricQuery, DirectQueryEngine, QueryError, QueryService};
use registry::{RegistryStore, ResolveError};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<RegistryStore>,
    pub service: QueryService,
    pub direct: Option<Arc<DirectQueryEngine>>,
    pub tsdb: Option<Arc<TsdbClient>>,
    pub query_timeout: Duration,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/query", post(federated_query))
        .route("/cluster_metrics/query_range", post(cluster_metrics_query))
        .route("/tsdb/query", post(tsdb_query))
        .route("/healthz", get(healthz))
        .with_state(state)
}

#[derive(Deserialize)]
struct FederatedQueryRequest {
    table_id: String,
    #[serde(default)]
    body: serde_json::Value,
    /// Epoch seconds, half-open window.
    start: i64,
    end: i64,
    #[serde(default)]
    fuzzy: bool,
}

async fn federated_query(
    State(state): State<AppState>,
    Json(request): Json<FederatedQueryRequest>,
) -> AxumResponse {
    let (Some(start), Some(end)) = (
        DateTime::from_timestamp(request.start, 0),
        DateTime::from_timestamp(request.end, 0),
    ) else {
        return error_response(StatusCode::BAD_REQUEST, "invalid time range");
    };

    match state
        .service
        .query(&request.table_id, &request.body, start, end, request.fuzzy)
        .await
    {
        // The backend payload passes through unchanged.
        Ok(raw) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            raw,
        )
            .into_response(),
        Err(err) => {
            tracing::warn!(table = request.table_id.as_str(), error = %err, "federated query failed");
            error_response(query_status(&err), &err.to_string())
        }
    }
}

fn query_status(err: &QueryError) -> StatusCode {
    match err {
        QueryError::Resolve(ResolveError::StorageNotFound(_)) => StatusCode::NOT_FOUND,
        QueryError::Resolve(ResolveError::NoAliasesFound(_)) => StatusCode::NOT_FOUND,
        QueryError::Resolve(_) => StatusCode::BAD_REQUEST,
        QueryError::StorageNotFound(_) => StatusCode::NOT_FOUND,
        QueryError::Backend(_) => StatusCode::BAD_GATEWAY,
        QueryError::Engine(_) => StatusCode::BAD_REQUEST,
    }
}

#[derive(Deserialize)]
struct ClusterMetricsRequest {
    #[serde(flatten)]
    query: ClusterMetricQuery,
    start: i64,
    end: i64,
    #[serde(default)]
    step_secs: u64,
    /// Instant mode: reduce each series to its last point.
    #[serde(default)]
    instant: bool,
}

async fn cluster_metrics_query(
    State(state): State<AppState>,
    Json(request): Json<ClusterMetricsRequest>,
) -> AxumResponse {
    let Some(direct) = &state.direct else {
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "cluster-metrics backend not configured",
        );
    };
    let (Some(start), Some(end)) = (
        DateTime::from_timestamp(request.start, 0),
        DateTime::from_timestamp(request.end, 0),
    ) else {
        return error_response(StatusCode::BAD_REQUEST, "invalid time range");
    };

    let result = if request.instant {
        direct.query_instant(&request.query, start, end).await
    } else {
        direct
            .query_range(
                &request.query,
                start,
                end,
                Duration::from_secs(request.step_secs),
            )
            .await
    };

    match result {
        Ok(matrix) => Json(matrix).into_response(),
        Err(err) => {
            tracing::warn!(metric = request.query.metric_name.as_str(), error = %err, "direct query failed");
            error_response(StatusCode::BAD_REQUEST, &err.to_string())
        }
    }
}

#[derive(Deserialize)]
struct TsdbQueryRequest {
    db: String,
    statement: String,
    #[serde(default)]
    precision: String,
    #[serde(default = "default_chunked")]
    chunked: bool,
}

fn default_chunked() -> bool {
    true
}

/// Raw passthrough to the time-series database: runs one statement, stitches
/// the chunked stream back into complete logical rows, and returns the merged
/// response.
async fn tsdb_query(
    State(state): State<AppState>,
    Json(request): Json<TsdbQueryRequest>,
) -> AxumResponse {
    let Some(tsdb) = &state.tsdb else {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "tsdb backend not configured");
    };

    // The decode loop observes this token as the request deadline.
    let cancel = CancellationToken::new();
    let deadline = cancel.clone();
    let timeout = state.query_timeout;
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        deadline.cancel();
    });

    match tsdb
        .query(
            &request.db,
            &request.statement,
            &request.precision,
            request.chunked,
            &cancel,
        )
        .await
    {
        Ok(response) => Json(merge_partials(&response)).into_response(),
        Err(err) => {
            tracing::warn!(db = request.db.as_str(), error = %err, "tsdb query failed");
            error_response(StatusCode::BAD_GATEWAY, &err.to_string())
        }
    }
}

async fn healthz(State(state): State<AppState>) -> AxumResponse {
    if state.store.is_ready() {
        (StatusCode::OK, "ok\n").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "loading registry\n").into_response()
    }
}

fn error_response(status: StatusCode, message: &str) -> AxumResponse {
    (
        status,
        Json(serde_json::json!({ "error_message": message })),
    )
        .into_response()
}
