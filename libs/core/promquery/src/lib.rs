//! Prometheus query API access for collectors.
//!
//! Provides a thin instant-query client and the bulk metric cache that lets
//! several collectors share one time-bounded snapshot of backend metrics
//! instead of hammering the query API on every scrape.

pub mod cache;
pub mod client;

pub use cache::{BulkMetricCache, BulkQuery};
pub use client::{MetricSource, PromClient, Sample, Vector};
