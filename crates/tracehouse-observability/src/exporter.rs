//! Metrics exposition.
//!
//! The block-builder keeps its metrics on a dedicated registry that is
//! populated lazily by [`metrics::init`]. Everything here funnels through
//! [`render`], which guarantees registration before encoding, so a scrape
//! that arrives before the builder has started still sees the full metric
//! set (at zero) instead of an empty page.
//!
//! [`router`] is the HTTP face of it: mount the returned router wherever
//! the process serves its admin endpoints and Prometheus can scrape
//! `/metrics`.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use prometheus::{Encoder, TextEncoder};

use crate::metrics;

/// Content type of the Prometheus text exposition format.
const TEXT_FORMAT: &str = "text/plain; version=0.0.4";

/// Encode the block-builder registry in Prometheus text format.
///
/// Registers the metrics first if nothing else has yet, so the output
/// always carries every gauge and histogram the builder exposes.
pub fn render() -> prometheus::Result<String> {
    metrics::init();

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&metrics::REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Router serving the registry at `/metrics`.
pub fn router() -> Router {
    Router::new().route("/metrics", get(serve_metrics))
}

async fn serve_metrics() -> Response {
    match render() {
        Ok(body) => ([(header::CONTENT_TYPE, TEXT_FORMAT)], body).into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {err}"),
        )
            .into_response(),
    }
}
