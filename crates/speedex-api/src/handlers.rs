//! Route handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tracing::debug;

use crate::ApiState;

/// Content type of the Prometheus text exposition format.
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// GET /metrics
///
/// Always 200: a failed or missing measurement is reported through
/// `speedtest_scrape_success 0`, not through the status code.
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let body = state.orchestrator.scrape().await;
    debug!(mode = %state.orchestrator.mode(), bytes = body.len(), "scrape served");
    (
        StatusCode::OK,
        [("content-type", PROMETHEUS_CONTENT_TYPE)],
        body,
    )
}

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok\n")
}

/// GET /
pub async fn index(State(state): State<ApiState>) -> impl IntoResponse {
    let body = format!(
        "speedex {}\nmode: {}\nmetrics: /metrics\n",
        env!("CARGO_PKG_VERSION"),
        state.orchestrator.mode(),
    );
    (StatusCode::OK, [("content-type", "text/plain; charset=utf-8")], body)
}
