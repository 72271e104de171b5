//! Block-builder metrics.
//!
//! All metrics live on a dedicated registry and are registered once via
//! [`init`]. Gauges carry the `partition` label as a string, matching the
//! label set scrapers already expect from the rest of the pipeline.

use lazy_static::lazy_static;
use prometheus::{
    GaugeVec, Histogram, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry,
};
use std::sync::Once;

static INIT: Once = Once::new();

lazy_static! {
    /// Global Prometheus metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    /// Lag of a partition in offsets (log end minus committed position)
    pub static ref PARTITION_LAG: IntGaugeVec = IntGaugeVec::new(
        Opts::new("tracehouse_block_builder_partition_lag", "Lag of a partition."),
        &["partition"]
    ).expect("metric can be created");

    /// Lag of a partition in seconds, set from the first record of a cycle
    pub static ref PARTITION_LAG_SECONDS: GaugeVec = GaugeVec::new(
        Opts::new(
            "tracehouse_block_builder_partition_lag_seconds",
            "Lag of a partition in seconds."
        ),
        &["partition"]
    ).expect("metric can be created");

    /// Time spent consuming a full cycle
    pub static ref CONSUME_CYCLE_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "tracehouse_block_builder_consume_cycle_duration_seconds",
            "Time spent consuming a full cycle."
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0])
    ).expect("metric can be created");

    /// Time spent processing one partition section
    pub static ref PROCESS_PARTITION_SECTION_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "tracehouse_block_builder_process_partition_section_duration_seconds",
            "Time spent processing one partition section."
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
        &["partition"]
    ).expect("metric can be created");

    /// Fetch errors observed by the consumer
    pub static ref FETCH_ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "tracehouse_block_builder_fetch_errors_total",
            "Total number of errors while fetching by the consumer."
        ),
        &["partition"]
    ).expect("metric can be created");
}

/// Register all metrics. Safe to call multiple times.
pub fn init() {
    INIT.call_once(|| {
        REGISTRY
            .register(Box::new(PARTITION_LAG.clone()))
            .expect("partition_lag can be registered");
        REGISTRY
            .register(Box::new(PARTITION_LAG_SECONDS.clone()))
            .expect("partition_lag_seconds can be registered");
        REGISTRY
            .register(Box::new(CONSUME_CYCLE_DURATION.clone()))
            .expect("consume_cycle_duration can be registered");
        REGISTRY
            .register(Box::new(PROCESS_PARTITION_SECTION_DURATION.clone()))
            .expect("process_partition_section_duration can be registered");
        REGISTRY
            .register(Box::new(FETCH_ERRORS_TOTAL.clone()))
            .expect("fetch_errors_total can be registered");
    });
}
