//! Backend-agnostic capacity collectors.
//!
//! Two collectors for clusters whose capacity does not come from a native
//! backend API: literal values from the configuration, and samples from a
//! Prometheus-style query API.

pub mod manual;
pub mod prometheus;

pub use manual::ManualCapacityPlugin;
pub use prometheus::PrometheusCapacityPlugin;
