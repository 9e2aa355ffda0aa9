//! Pool-summed capacity for the block-storage service.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use core_model::{AvailabilityZone, CapacityData, PerAz, ResourceName, ServiceType};
use core_plugin::{
    CapacityBackchannel, CapacityPlugin, CapacityScrapeResult, CollectorError, CollectorResult,
    ProviderClient, ScrapeContext,
};
use serde::Deserialize;
use tracing::debug;

use super::client::{BlockStorageBackend, HttpBlockStorageBackend, VolumePool};

/// Pools in these states serve no new volumes and are excluded entirely.
const EXCLUDED_POOL_STATES: &[&str] = &["drain", "reserved"];

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BlockStorageCapacityParams {
    volume_types: Vec<String>,

    #[serde(default)]
    with_subcapacities: bool,
}

/// Sums pool capacity per volume type and AZ.
pub struct BlockStorageCapacityPlugin {
    volume_types: Vec<String>,
    with_subcapacities: bool,
    backend: Option<Arc<dyn BlockStorageBackend>>,
}

impl BlockStorageCapacityPlugin {
    pub const TYPE_ID: &'static str = "cinder";

    pub fn from_params(params: serde_json::Value) -> CollectorResult<Self> {
        let params: BlockStorageCapacityParams = core_config::parse_params(params)?;
        if params.volume_types.is_empty() {
            return Err(CollectorError::Misconfigured(
                "block-storage capacity: no volume types configured".into(),
            ));
        }
        Ok(Self {
            volume_types: params.volume_types,
            with_subcapacities: params.with_subcapacities,
            backend: None,
        })
    }

    /// Test constructor wiring in a prepared backend.
    pub fn with_backend(mut self, backend: Arc<dyn BlockStorageBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    fn backend(&self) -> CollectorResult<&dyn BlockStorageBackend> {
        self.backend
            .as_deref()
            .ok_or_else(|| CollectorError::Misconfigured("capacity plugin used before init".into()))
    }

    fn suffix(&self, index: usize) -> String {
        if index == 0 {
            String::new()
        } else {
            format!("_{}", self.volume_types[index])
        }
    }

    /// Pools carry the service host somewhere in their name
    /// (`host@backend#pool`); the AZ is that host's AZ.
    fn zone_of(
        pool: &VolumePool,
        host_azs: &BTreeMap<String, AvailabilityZone>,
        all_azs: &[AvailabilityZone],
    ) -> AvailabilityZone {
        host_azs
            .iter()
            .find(|(host, _)| pool.name.contains(host.as_str()))
            .map(|(_, zone)| zone.clone())
            .filter(|zone| all_azs.contains(zone))
            .unwrap_or_else(AvailabilityZone::unknown)
    }
}

#[async_trait]
impl CapacityPlugin for BlockStorageCapacityPlugin {
    async fn init(
        &mut self,
        _ctx: &ScrapeContext,
        provider: &ProviderClient,
    ) -> CollectorResult<()> {
        if self.backend.is_none() {
            let endpoint = provider.endpoint(&ServiceType::from("volumev3"))?;
            self.backend = Some(Arc::new(HttpBlockStorageBackend::new(
                endpoint,
                provider.token(),
            )));
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
        let backend = self.backend()?;
        let host_azs = backend.host_azs(ctx).await?;

        let mut pools = backend.pools(ctx).await?;
        pools.sort_by(|a, b| a.name.cmp(&b.name));

        let mut per_type: BTreeMap<&str, PerAz<CapacityData>> = BTreeMap::new();
        for pool in &pools {
            if EXCLUDED_POOL_STATES.contains(&pool.state.as_str()) {
                debug!(pool = %pool.name, state = %pool.state, "excluding pool from capacity");
                continue;
            }
            let Some(volume_type) = self
                .volume_types
                .iter()
                .find(|volume_type| pool.volume_type == **volume_type)
            else {
                continue;
            };

            let zone = Self::zone_of(pool, &host_azs, all_azs);
            let entry = per_type
                .entry(volume_type.as_str())
                .or_default()
                .entry_or_default(zone.clone());
            entry.capacity += pool.total_capacity_gb;
            *entry.usage.get_or_insert(0) += pool.allocated_capacity_gb;
            if self.with_subcapacities {
                entry.subcapacities.push(serde_json::json!({
                    "pool_name": pool.name,
                    "az": zone,
                    "capacity_gib": pool.total_capacity_gb,
                    "usage_gib": pool.allocated_capacity_gb,
                }));
            }
        }

        let mut resources = BTreeMap::new();
        for (index, volume_type) in self.volume_types.iter().enumerate() {
            let suffix = self.suffix(index);
            resources.insert(
                ResourceName::from(format!("capacity{suffix}")),
                per_type.remove(volume_type.as_str()).unwrap_or_default(),
            );
        }

        Ok(CapacityScrapeResult {
            capacity: BTreeMap::from([(ServiceType::from("volumev3"), resources)]),
            metrics: Default::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::client::MockBlockStorageBackend;
    use super::*;

    fn pool(name: &str, volume_type: &str, state: &str, total: u64, allocated: u64) -> VolumePool {
        VolumePool {
            name: name.into(),
            volume_type: volume_type.into(),
            state: state.into(),
            total_capacity_gb: total,
            allocated_capacity_gb: allocated,
        }
    }

    fn plugin(pools: Vec<VolumePool>) -> BlockStorageCapacityPlugin {
        let mut backend = MockBlockStorageBackend::new();
        backend.expect_host_azs().returning(|_| {
            Ok(BTreeMap::from([
                (
                    "cinder-volume-1".to_string(),
                    AvailabilityZone::from("az-1"),
                ),
                (
                    "cinder-volume-2".to_string(),
                    AvailabilityZone::from("az-2"),
                ),
            ]))
        });
        backend.expect_pools().return_once(move |_| Ok(pools));
        BlockStorageCapacityPlugin::from_params(serde_json::json!({
            "volume_types": ["standard"],
            "with_subcapacities": true,
        }))
        .unwrap()
        .with_backend(Arc::new(backend))
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

    #[tokio::test]
    async fn sums_pools_per_az_and_excludes_drained() {
        let plugin = plugin(vec![
            pool("cinder-volume-1@netapp#pool1", "standard", "", 1000, 250),
            pool("cinder-volume-1@netapp#pool2", "standard", "drain", 500, 0),
            pool("cinder-volume-2@netapp#pool1", "standard", "", 800, 100),
            pool("elsewhere@netapp#pool1", "standard", "", 300, 0),
            pool("cinder-volume-1@netapp#other", "premium", "", 999, 0),
        ]);

        let result = plugin
            .scrape(
                &ScrapeContext::new(),
                &NoDemand,
                &[
                    AvailabilityZone::from("az-1"),
                    AvailabilityZone::from("az-2"),
                ],
            )
            .await
            .unwrap();

        let capacity =
            &result.capacity[&ServiceType::from("volumev3")][&ResourceName::from("capacity")];
        let az1 = capacity.get(&AvailabilityZone::from("az-1")).unwrap();
        assert_eq!(az1.capacity, 1000);
        assert_eq!(az1.usage, Some(250));
        assert_eq!(az1.subcapacities.len(), 1);

        let az2 = capacity.get(&AvailabilityZone::from("az-2")).unwrap();
        assert_eq!(az2.capacity, 800);

        // The pool on an unmapped host lands in unknown.
        let unknown = capacity.get(&AvailabilityZone::unknown()).unwrap();
        assert_eq!(unknown.capacity, 300);
    }
}
