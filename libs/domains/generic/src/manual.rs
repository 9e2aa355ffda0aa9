//! Capacity values taken literally from the configuration.

use std::collections::BTreeMap;

use async_trait::async_trait;
use core_model::{flat_capacity, AvailabilityZone, PerAz, ResourceName, ServiceType};
use core_plugin::{
    CapacityBackchannel, CapacityPlugin, CapacityScrapeResult, CollectorError, CollectorResult,
    ProviderClient, ScrapeContext,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ManualCapacityParams {
    /// `"service/resource"` to capacity value.
    values: BTreeMap<String, u64>,
}

/// Reports fixed capacity values, single-AZ under `any`.
///
/// Useful for resources whose capacity is a business decision rather than a
/// measurement, and as a stopgap while a native collector is being built.
pub struct ManualCapacityPlugin {
    values: BTreeMap<ServiceType, BTreeMap<ResourceName, u64>>,
}

impl ManualCapacityPlugin {
    pub const TYPE_ID: &'static str = "manual";

    pub fn from_params(params: serde_json::Value) -> CollectorResult<Self> {
        let params: ManualCapacityParams = core_config::parse_params(params)?;
        if params.values.is_empty() {
            return Err(CollectorError::Misconfigured(
                "manual capacity: no values configured".into(),
            ));
        }

        let mut values: BTreeMap<ServiceType, BTreeMap<ResourceName, u64>> = BTreeMap::new();
        for (key, capacity) in params.values {
            let Some((service, resource)) = key.split_once('/') else {
                return Err(CollectorError::Misconfigured(format!(
                    "manual capacity: key {key:?} is not of the form service/resource"
                )));
            };
            values
                .entry(ServiceType::from(service))
                .or_default()
                .insert(ResourceName::from(resource), capacity);
        }
        Ok(Self { values })
    }
}

#[async_trait]
impl CapacityPlugin for ManualCapacityPlugin {
    async fn init(
        &mut self,
        _ctx: &ScrapeContext,
        _provider: &ProviderClient,
    ) -> CollectorResult<()> {
        Ok(())
    }

    fn plugin_type_id(&self) -> &'static str {
        Self::TYPE_ID
    }

    async fn scrape(
        &self,
        _ctx: &ScrapeContext,
        _backchannel: &dyn CapacityBackchannel,
        _all_azs: &[AvailabilityZone],
    ) -> CollectorResult<CapacityScrapeResult> {
        let capacity = self
            .values
            .iter()
            .map(|(service, resources)| {
                let resources = resources
                    .iter()
                    .map(|(resource, value)| (resource.clone(), flat_capacity(*value)))
                    .collect::<BTreeMap<ResourceName, PerAz<_>>>();
                (service.clone(), resources)
            })
            .collect();

        Ok(CapacityScrapeResult {
            capacity,
            metrics: Default::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_model::CapacityData;

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

    #[tokio::test]
    async fn reports_configured_values_under_any() {
        let plugin = ManualCapacityPlugin::from_params(serde_json::json!({
            "values": {"compute/cores": 100},
        }))
        .unwrap();

        let all_azs = vec![
            AvailabilityZone::from("az-1"),
            AvailabilityZone::from("az-2"),
        ];
        let result = plugin
            .scrape(&ScrapeContext::new(), &NoDemand, &all_azs)
            .await
            .unwrap();

        let per_az = &result.capacity[&ServiceType::from("compute")][&ResourceName::from("cores")];
        assert_eq!(per_az.len(), 1);
        assert_eq!(
            per_az.get(&AvailabilityZone::any()),
            Some(&CapacityData::new(100))
        );
    }

    #[test]
    fn malformed_keys_are_misconfiguration() {
        let result = ManualCapacityPlugin::from_params(serde_json::json!({
            "values": {"cores": 100},
        }));
        assert!(matches!(result, Err(CollectorError::Misconfigured(_))));
    }

    #[test]
    fn empty_value_map_is_misconfiguration() {
        let result = ManualCapacityPlugin::from_params(serde_json::json!({"values": {}}));
        assert!(matches!(result, Err(CollectorError::Misconfigured(_))));
    }
}
