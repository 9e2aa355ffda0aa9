//! Scrape-specific metrics for the collection core.

use metrics::{counter, histogram};

fn outcome_label(success: bool) -> &'static str {
    if success { "success" } else { "error" }
}

/// Scrape metrics recorder
pub struct ScrapeMetrics;

impl ScrapeMetrics {
    /// Record a per-project quota/usage scrape
    pub fn record_scrape(service: &str, duration_ms: u64, success: bool) {
        counter!(
            "collector_scrapes_total",
            "service" => service.to_string(),
            "outcome" => outcome_label(success)
        )
        .increment(1);
        histogram!("collector_scrape_duration_seconds", "service" => service.to_string())
            .record(duration_ms as f64 / 1000.0);
    }

    /// Record a per-cluster capacity scrape
    pub fn record_capacity_scrape(service: &str, duration_ms: u64, success: bool) {
        counter!(
            "collector_capacity_scrapes_total",
            "service" => service.to_string(),
            "outcome" => outcome_label(success)
        )
        .increment(1);
        histogram!("collector_capacity_scrape_duration_seconds", "service" => service.to_string())
            .record(duration_ms as f64 / 1000.0);
    }

    /// Record a quota write-back
    pub fn record_quota_write(service: &str, success: bool) {
        counter!(
            "collector_quota_writes_total",
            "service" => service.to_string(),
            "outcome" => outcome_label(success)
        )
        .increment(1);
    }

    /// Record a backend round trip that exceeded the slow-request threshold
    pub fn record_slow_request(service: &str) {
        counter!("collector_slow_requests_total", "service" => service.to_string()).increment(1);
    }
}
