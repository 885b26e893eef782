//! tally-api: HTTP surface of the tally server.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/update/{type}/{name}/{value}` | Update one metric from the path |
//! | POST | `/update/` | Update one metric from a JSON record |
//! | POST | `/updates/` | Apply a JSON array of records |
//! | GET | `/value/{type}/{name}` | Plain-text value |
//! | POST | `/value/` | JSON lookup |
//! | GET | `/` | HTML page of all metrics |
//! | GET | `/ping` | Repository liveness |
//! | GET | `/metrics` | Prometheus exposition |
//!
//! Every route sits behind request logging, gzip and, when a key is
//! configured, HMAC signature checks (outermost first).

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod pages;
pub mod prometheus;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tally_core::SigningCodec;
use tally_store::MetricRepository;

pub use error::ApiError;

/// Shared state for handlers.
#[derive(Clone)]
pub struct ApiState {
    pub repo: Arc<dyn MetricRepository>,
}

/// Build the complete router.
pub fn build_router(repo: Arc<dyn MetricRepository>, signer: Option<SigningCodec>) -> Router {
    let mut router = Router::new()
        .route("/", get(pages::index))
        .route("/ping", get(handlers::ping))
        .route("/metrics", get(handlers::prometheus_metrics))
        .route("/update/", post(handlers::update))
        .route("/update/{kind}/{name}/{value}", post(handlers::update_path))
        .route("/updates/", post(handlers::update_batch))
        .route("/value/", post(handlers::value))
        .route("/value/{kind}/{name}", get(handlers::value_path))
        .with_state(ApiState { repo });

    if let Some(signer) = signer {
        router = router.layer(axum::middleware::from_fn_with_state(
            signer,
            middleware::signature,
        ));
    }

    router
        .layer(axum::middleware::from_fn(middleware::gzip))
        .layer(axum::middleware::from_fn(middleware::log_requests))
}
