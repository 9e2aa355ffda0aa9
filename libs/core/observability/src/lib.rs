//! Observability utilities for the quota and capacity collection core.
//!
//! This crate provides:
//! - Prometheus metrics recording and export
//! - Scrape instrumentation helpers for quota and capacity collectors
//! - The serialized-metrics envelope that collectors hand to the orchestrator
//!   as an opaque blob, and its re-emission as live Prometheus metrics
//!
//! # Example
//!
//! ```rust,ignore
//! use observability::{init_metrics, ScrapeMetrics};
//!
//! // Initialize metrics recorder
//! init_metrics();
//!
//! // Record scrape operations
//! ScrapeMetrics::record_scrape("compute", 1250, true);
//! ```

pub mod scrape;
pub mod serialized;

pub use scrape::ScrapeMetrics;
pub use serialized::{SerializedMetricFamily, SerializedMetrics, SerializedMetricsError};

// Re-export metrics macros for convenience
pub use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing::info;

static RECORDER: OnceCell<PrometheusHandle> = OnceCell::new();

/// Counter families recorded by the collection core.
const COUNTERS: &[(&str, &str)] = &[
    (
        "collector_scrapes_total",
        "Total quota/usage scrapes by service and outcome",
    ),
    (
        "collector_capacity_scrapes_total",
        "Total capacity scrapes by service and outcome",
    ),
    (
        "collector_quota_writes_total",
        "Quota write-backs by service and outcome",
    ),
    (
        "collector_slow_requests_total",
        "Backend round trips that exceeded the slow-request threshold",
    ),
];

/// Histogram families recorded by the collection core.
const HISTOGRAMS: &[(&str, &str)] = &[
    (
        "collector_scrape_duration_seconds",
        "Quota/usage scrape duration in seconds",
    ),
    (
        "collector_capacity_scrape_duration_seconds",
        "Capacity scrape duration in seconds",
    ),
];

/// Installs the process-wide Prometheus recorder on first call and returns
/// the handle for rendering exposition text. Later calls return the same
/// handle without touching the recorder.
pub fn init_metrics() -> &'static PrometheusHandle {
    RECORDER.get_or_init(|| {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .unwrap_or_else(|err| panic!("cannot install Prometheus recorder: {err}"));

        for (name, help) in COUNTERS {
            metrics::describe_counter!(*name, *help);
        }
        for (name, help) in HISTOGRAMS {
            metrics::describe_histogram!(*name, *help);
        }

        info!(
            counters = COUNTERS.len(),
            histograms = HISTOGRAMS.len(),
            "metrics recorder installed"
        );
        handle
    })
}

/// Renders the current exposition text, or `None` before [`init_metrics`].
pub fn render_metrics() -> Option<String> {
    RECORDER.get().map(PrometheusHandle::render)
}
