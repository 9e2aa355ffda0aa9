//! Instant-vector queries against a Prometheus-style HTTP API.

use std::collections::BTreeMap;

use async_trait::async_trait;
use core_plugin::{CollectorError, CollectorResult, ScrapeContext};
use serde::Deserialize;
use tracing::debug;

/// One sample of an instant vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub labels: BTreeMap<String, String>,
    pub value: f64,
}

impl Sample {
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }
}

/// The result of one instant query.
pub type Vector = Vec<Sample>;

/// Anything that can answer instant queries. Collectors depend on this trait
/// so tests can substitute canned vectors for the live API.
#[async_trait]
pub trait MetricSource: Send + Sync {
    async fn query(&self, ctx: &ScrapeContext, expression: &str) -> CollectorResult<Vector>;
}

#[derive(Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    data: Option<ApiData>,
}

#[derive(Deserialize)]
struct ApiData {
    #[serde(rename = "resultType")]
    result_type: String,
    result: Vec<ApiResult>,
}

#[derive(Deserialize)]
struct ApiResult {
    metric: BTreeMap<String, String>,
    value: (f64, String),
}

/// HTTP client for the query API.
pub struct PromClient {
    client: reqwest::Client,
    base_url: String,
}

impl PromClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn query_inner(&self, expression: &str) -> CollectorResult<Vector> {
        let url = format!("{}/api/v1/query", self.base_url);
        let response: ApiResponse = self
            .client
            .get(&url)
            .query(&[("query", expression)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.status != "success" {
            return Err(CollectorError::Transient(format!(
                "query failed: {}",
                response.error.unwrap_or_else(|| response.status.clone())
            )));
        }
        let data = response.data.ok_or_else(|| {
            CollectorError::Transient("query succeeded but returned no data".into())
        })?;
        if data.result_type != "vector" {
            return Err(CollectorError::Transient(format!(
                "expected vector result, got {}",
                data.result_type
            )));
        }

        let mut vector = Vec::with_capacity(data.result.len());
        for entry in data.result {
            let value = entry.value.1.parse::<f64>().map_err(|_| {
                CollectorError::Transient(format!("unparseable sample value {:?}", entry.value.1))
            })?;
            vector.push(Sample {
                labels: entry.metric,
                value,
            });
        }
        debug!(
            expression = expression,
            samples = vector.len(),
            "instant query done"
        );
        Ok(vector)
    }
}

#[async_trait]
impl MetricSource for PromClient {
    async fn query(&self, ctx: &ScrapeContext, expression: &str) -> CollectorResult<Vector> {
        ctx.round_trip("prometheus", "query", self.query_inner(expression))
            .await
    }
}
