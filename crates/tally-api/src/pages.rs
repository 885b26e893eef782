//! The HTML page listing every metric, gauges first.

use askama::Template;
use axum::extract::State;
use axum::response::Html;

use crate::ApiState;
use crate::error::ApiError;

struct MetricRow {
    name: String,
    value: String,
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate {
    gauges: Vec<MetricRow>,
    counters: Vec<MetricRow>,
}

fn render<T: Template>(tmpl: T) -> Result<Html<String>, ApiError> {
    tmpl.render()
        .map(Html)
        .map_err(|e| ApiError::Render(e.to_string()))
}

/// GET /
pub async fn index(State(state): State<ApiState>) -> Result<Html<String>, ApiError> {
    let snapshot = state.repo.snapshot().await?;
    render(IndexTemplate {
        gauges: snapshot
            .gauges
            .into_iter()
            .map(|(name, v)| MetricRow {
                name,
                value: v.to_string(),
            })
            .collect(),
        counters: snapshot
            .counters
            .into_iter()
            .map(|(name, v)| MetricRow {
                name,
                value: v.to_string(),
            })
            .collect(),
    })
}
