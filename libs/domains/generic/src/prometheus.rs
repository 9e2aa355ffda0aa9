//! Capacity measured through a Prometheus-style query API.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use core_model::{AvailabilityZone, CapacityData, PerAz, ResourceName, ServiceType};
use core_plugin::{
    CapacityBackchannel, CapacityPlugin, CapacityScrapeResult, CollectorError, CollectorResult,
    ProviderClient, ScrapeContext,
};
use promquery::{MetricSource, PromClient};
use serde::Deserialize;
use tracing::debug;

const DEFAULT_AZ_LABEL: &str = "az";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PrometheusCapacityParams {
    api_url: String,

    /// Service to resource to query expression. Each query must yield one
    /// sample per AZ.
    queries: BTreeMap<ServiceType, BTreeMap<ResourceName, String>>,

    /// The label carrying the AZ name on each sample.
    #[serde(default)]
    az_label: Option<String>,

    /// Accept a scrape whose total capacity over all AZs is zero. Without
    /// this, zero capacity is treated as a broken query.
    #[serde(default)]
    allow_zero_capacity: bool,
}

/// Derives per-AZ capacity from configured query expressions.
pub struct PrometheusCapacityPlugin {
    queries: BTreeMap<ServiceType, BTreeMap<ResourceName, String>>,
    api_url: String,
    az_label: String,
    allow_zero_capacity: bool,
    source: Option<Arc<dyn MetricSource>>,
}

impl PrometheusCapacityPlugin {
    pub const TYPE_ID: &'static str = "prometheus";

    pub fn from_params(params: serde_json::Value) -> CollectorResult<Self> {
        let params: PrometheusCapacityParams = core_config::parse_params(params)?;
        if params.queries.values().all(BTreeMap::is_empty) {
            return Err(CollectorError::Misconfigured(
                "prometheus capacity: no queries configured".into(),
            ));
        }
        Ok(Self {
            queries: params.queries,
            api_url: params.api_url,
            az_label: params.az_label.unwrap_or_else(|| DEFAULT_AZ_LABEL.into()),
            allow_zero_capacity: params.allow_zero_capacity,
            source: None,
        })
    }

    /// Test constructor wiring in a prepared metric source.
    pub fn with_source(mut self, source: Arc<dyn MetricSource>) -> Self {
        self.source = Some(source);
        self
    }

    fn source(&self) -> CollectorResult<&dyn MetricSource> {
        self.source
            .as_deref()
            .ok_or_else(|| CollectorError::Misconfigured("capacity plugin used before init".into()))
    }

    /// Folds one query's samples into a per-AZ capacity map.
    fn fold_samples(
        &self,
        resource: &ResourceName,
        samples: &[promquery::Sample],
        all_azs: &[AvailabilityZone],
    ) -> CollectorResult<PerAz<CapacityData>> {
        let mut per_az: PerAz<CapacityData> = PerAz::new();
        let mut unknown_total = 0u64;

        for sample in samples {
            let zone = sample
                .label(&self.az_label)
                .map(AvailabilityZone::from)
                .filter(|zone| all_azs.contains(zone));

            match zone {
                Some(zone) => {
                    if per_az.contains(&zone) {
                        return Err(CollectorError::InvariantViolated(format!(
                            "resource {resource}: multiple samples for AZ {zone}"
                        )));
                    }
                    per_az.insert(zone, CapacityData::new(sample.value as u64));
                }
                None => {
                    // Samples without a recognizable AZ are aggregated.
                    unknown_total += sample.value as u64;
                }
            }
        }
        if unknown_total > 0 {
            per_az.insert(
                AvailabilityZone::unknown(),
                CapacityData::new(unknown_total),
            );
        }

        if per_az.total_capacity() == 0 && !self.allow_zero_capacity {
            return Err(CollectorError::InvariantViolated(format!(
                "resource {resource}: total capacity is zero"
            )));
        }
        Ok(per_az)
    }
}

#[async_trait]
impl CapacityPlugin for PrometheusCapacityPlugin {
    async fn init(
        &mut self,
        _ctx: &ScrapeContext,
        _provider: &ProviderClient,
    ) -> CollectorResult<()> {
        if self.source.is_none() {
            self.source = Some(Arc::new(PromClient::new(self.api_url.clone())));
        }
        Ok(())
    }

    fn plugin_type_id(&self) -> &'static str {
        Self::TYPE_ID
    }

    async fn scrape(
        &self,
        ctx: &ScrapeContext,
        _backchannel: &dyn CapacityBackchannel,
        all_azs: &[AvailabilityZone],
    ) -> CollectorResult<CapacityScrapeResult> {
        let source = self.source()?;

        let mut capacity = BTreeMap::new();
        for (service, resources) in &self.queries {
            let mut by_resource = BTreeMap::new();
            for (resource, expression) in resources {
                ctx.check_canceled()?;
                let samples = source.query(ctx, expression).await?;
                debug!(
                    service = %service,
                    resource = %resource,
                    samples = samples.len(),
                    "capacity query done"
                );
                by_resource.insert(
                    resource.clone(),
                    self.fold_samples(resource, &samples, all_azs)?,
                );
            }
            capacity.insert(service.clone(), by_resource);
        }

        Ok(CapacityScrapeResult {
            capacity,
            metrics: Default::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use promquery::{Sample, Vector};
    use std::collections::BTreeMap as Map;

    struct CannedSource {
        samples: Vec<(&'static str, f64)>,
    }

    #[async_trait]
    impl MetricSource for CannedSource {
        async fn query(&self, _ctx: &ScrapeContext, _expression: &str) -> CollectorResult<Vector> {
            Ok(self
                .samples
                .iter()
                .map(|(az, value)| Sample {
                    labels: Map::from([("az".to_string(), az.to_string())]),
                    value: *value,
                })
                .collect())
        }
    }

    struct NoDemand;

    #[async_trait]
    impl CapacityBackchannel for NoDemand {
        async fn get_resource_demand(
            &self,
            _service: &ServiceType,
            _resource: &ResourceName,
        ) -> CollectorResult<core_model::DemandByAz> {
            Ok(Default::default())
        }
    }

    fn plugin(samples: Vec<(&'static str, f64)>, allow_zero: bool) -> PrometheusCapacityPlugin {
        PrometheusCapacityPlugin::from_params(serde_json::json!({
            "api_url": "http://prometheus.example.test",
            "queries": {"compute": {"cores": "sum by (az) (hypervisor_cores)"}},
            "allow_zero_capacity": allow_zero,
        }))
        .unwrap()
        .with_source(Arc::new(CannedSource { samples }))
    }

    fn azs() -> Vec<AvailabilityZone> {
        vec![
            AvailabilityZone::from("az-1"),
            AvailabilityZone::from("az-2"),
        ]
    }

    #[tokio::test]
    async fn unmatched_az_labels_land_in_unknown() {
        let plugin = plugin(vec![("az-1", 10.0), ("az-2", 20.0), ("az-9", 5.0)], false);
        let result = plugin
            .scrape(&ScrapeContext::new(), &NoDemand, &azs())
            .await
            .unwrap();

        let per_az = &result.capacity[&ServiceType::from("compute")][&ResourceName::from("cores")];
        assert_eq!(per_az.get(&AvailabilityZone::from("az-1")).unwrap().capacity, 10);
        assert_eq!(per_az.get(&AvailabilityZone::from("az-2")).unwrap().capacity, 20);
        assert_eq!(per_az.get(&AvailabilityZone::unknown()).unwrap().capacity, 5);
    }

    #[tokio::test]
    async fn duplicate_az_samples_fail_the_scrape() {
        let plugin = plugin(vec![("az-1", 10.0), ("az-1", 7.0)], false);
        let result = plugin.scrape(&ScrapeContext::new(), &NoDemand, &azs()).await;
        assert!(matches!(result, Err(CollectorError::InvariantViolated(_))));
    }

    #[tokio::test]
    async fn zero_capacity_fails_unless_allowed() {
        let plugin = plugin(vec![("az-1", 0.0)], false);
        let result = plugin.scrape(&ScrapeContext::new(), &NoDemand, &azs()).await;
        assert!(matches!(result, Err(CollectorError::InvariantViolated(_))));

        let plugin = plugin_with_zero_allowed();
        let result = plugin.scrape(&ScrapeContext::new(), &NoDemand, &azs()).await;
        assert!(result.is_ok());
    }

    fn plugin_with_zero_allowed() -> PrometheusCapacityPlugin {
        plugin(vec![("az-1", 0.0)], true)
    }
}
