//! Metric update and lookup handlers.
//!
//! JSON bodies are decoded by hand rather than with the `Json` extractor so
//! that every malformed record is a 400 with a short reason, and a missing
//! content type is a 415.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use tracing::debug;

use tally_core::{Metric, MetricKind, MetricUpdate, MetricValue, RecordError};

use crate::ApiState;
use crate::error::ApiError;

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"))
}

fn decode_json<T: DeserializeOwned>(headers: &HeaderMap, body: &[u8]) -> Result<T, ApiError> {
    if !is_json(headers) {
        return Err(ApiError::UnsupportedMediaType);
    }
    serde_json::from_slice(body).map_err(|e| ApiError::Malformed(e.to_string()))
}

/// Apply one update and return the record echoed to the client.
async fn apply_one(state: &ApiState, update: MetricUpdate) -> Result<Metric, ApiError> {
    let record = match update {
        MetricUpdate::Gauge { name, value } => {
            state.repo.set_gauge(&name, value).await?;
            Metric::gauge(name, value)
        }
        MetricUpdate::Counter { name, delta } => {
            let total = state.repo.add_counter(&name, delta).await?;
            Metric::counter(name, total)
        }
    };
    Ok(record)
}

// ── Updates ────────────────────────────────────────────────────

/// POST /update/{type}/{name}/{value}
pub async fn update_path(
    State(state): State<ApiState>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> Result<StatusCode, ApiError> {
    let update = MetricUpdate::from_parts(&kind, &name, &value)?;
    apply_one(&state, update).await?;
    Ok(StatusCode::OK)
}

/// POST /update/
///
/// Counters echo the accumulated total in `delta`.
pub async fn update(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Metric>, ApiError> {
    let record: Metric = decode_json(&headers, &body)?;
    let record = apply_one(&state, record.into_update()?).await?;
    Ok(Json(record))
}

/// POST /updates/
///
/// Every record is validated before any is applied.
pub async fn update_batch(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let records: Vec<Metric> = decode_json(&headers, &body)?;
    let updates = records
        .into_iter()
        .map(Metric::into_update)
        .collect::<Result<Vec<_>, _>>()?;

    state.repo.apply(&updates).await?;
    debug!(records = updates.len(), "batch applied");
    Ok(StatusCode::OK)
}

// ── Lookups ────────────────────────────────────────────────────

/// GET /value/{type}/{name}
pub async fn value_path(
    State(state): State<ApiState>,
    Path((kind, name)): Path<(String, String)>,
) -> Result<String, ApiError> {
    let kind: MetricKind = kind.parse()?;
    let value = state.repo.get(kind, &name).await?.ok_or(ApiError::NotFound)?;
    Ok(value.to_string())
}

/// POST /value/
pub async fn value(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Metric>, ApiError> {
    let query: Metric = decode_json(&headers, &body)?;
    if query.id.is_empty() {
        return Err(RecordError::MissingName.into());
    }
    let kind = query.metric_kind()?;
    let value: MetricValue = state
        .repo
        .get(kind, &query.id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(Metric::from_value(query.id, value)))
}

// ── Health ─────────────────────────────────────────────────────

/// GET /ping
pub async fn ping(State(state): State<ApiState>) -> impl IntoResponse {
    match state.repo.ping().await {
        Ok(()) => (StatusCode::OK, String::new()),
        Err(e) => {
            debug!(error = %e, backend = state.repo.backend_name(), "ping failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "ping unsuccessful".to_string(),
            )
        }
    }
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(
    State(state): State<ApiState>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state.repo.snapshot().await?;
    let body = crate::prometheus::render_prometheus(&snapshot);
    Ok((
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    ))
}
