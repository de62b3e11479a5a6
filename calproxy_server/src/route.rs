pub mod calendar;
pub mod health;
pub mod metrics;

use std::{sync::Arc, time::Duration};

use axum::{routing::get, Router};
use calproxy_core::{metrics::Counters, Pipeline};
use tower_http::trace::TraceLayer;

/// Everything the handlers share.
pub struct AppState {
    pub pipeline: Pipeline,
    pub counters: Arc<Counters>,
    /// Deadline of a whole calendar request, upstream requests still running are aborted.
    pub request_timeout: Duration,
}

/// Any path other than `/health` and `/metrics` serves the merged calendar.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(calendar::handler))
        .route("/*path", get(calendar::handler))
        .route("/health", get(health::handler))
        .route("/metrics", get(metrics::handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
