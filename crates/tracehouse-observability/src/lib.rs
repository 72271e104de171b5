//! Observability for the Tracehouse block-builder.
//!
//! Prometheus metrics describing the consume-build-flush-commit pipeline.
//! [`exporter::render`] encodes the registry in text format, registering
//! the metrics on first use; [`exporter::router`] serves it at `/metrics`.

pub mod exporter;
pub mod metrics;
