//! AZ-aware capacity aggregation for the shared-filesystem service.
//!
//! Per-pool capacity reports are filtered by hardware state, attributed to an
//! AZ through the share-service host mapping, and split between share and
//! snapshot capacity by the configured capacity balance.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use core_model::{AvailabilityZone, CapacityData, PerAz, ResourceName, ServiceType};
use core_plugin::{
    CapacityBackchannel, CapacityPlugin, CapacityScrapeResult, CollectorError, CollectorResult,
    ProviderClient, ScrapeContext,
};
use serde::Deserialize;
use tracing::error;

use super::client::{HttpSharedFsBackend, SharePool, SharedFsBackend};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SharedFsCapacityParams {
    share_types: Vec<String>,

    /// How many shares one pool can reasonably serve.
    shares_per_pool: u64,

    /// How many snapshots each share is budgeted for.
    snapshots_per_share: u64,

    /// Cluster-wide share-network count, spread over the AZs.
    #[serde(default)]
    share_networks: u64,

    /// The share/snapshot capacity split: snapshot capacity gets `balance`
    /// times the share capacity.
    capacity_balance: f64,

    #[serde(default)]
    with_subcapacities: bool,
}

/// How one pool's hardware state maps into the aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoolState {
    Included,
    Excluded(&'static str),
    Unknown,
}

fn classify_hardware_state(state: &str) -> PoolState {
    match state {
        "live" => PoolState::Included,
        "in_build" => PoolState::Excluded("hardware_state is in_build"),
        "in_decom" => PoolState::Excluded("hardware_state is in_decom"),
        "replacing_decom" => PoolState::Excluded("hardware_state is replacing_decom"),
        _ => PoolState::Unknown,
    }
}

/// Splits a total between share and snapshot capacity.
///
/// Shares get `total / (balance + 1)`, snapshots the `balance`-weighted
/// remainder, both with floor semantics.
fn capacity_split(balance: f64, total_gb: u64) -> (u64, u64) {
    let share = (total_gb as f64 / (balance + 1.0)).floor() as u64;
    let snapshot = (balance * total_gb as f64 / (balance + 1.0)).floor() as u64;
    (share, snapshot)
}

/// The per-AZ share count: pools times shares-per-pool, minus this AZ's slice
/// of the share networks, saturating at zero.
fn share_count(shares_per_pool: u64, pool_count: u64, share_networks_per_az: u64) -> u64 {
    (shares_per_pool * pool_count).saturating_sub(share_networks_per_az)
}

#[derive(Debug, Default)]
struct AzAccumulator {
    pool_count: u64,
    total_gb: u64,
    allocated_gb: u64,
    subcapacities: Vec<serde_json::Value>,
}

/// Reports share/snapshot counts and capacity per share type and AZ.
pub struct SharedFsCapacityPlugin {
    share_types: Vec<String>,
    shares_per_pool: u64,
    snapshots_per_share: u64,
    share_networks: u64,
    capacity_balance: f64,
    with_subcapacities: bool,
    backend: Option<Arc<dyn SharedFsBackend>>,
}

impl SharedFsCapacityPlugin {
    pub const TYPE_ID: &'static str = "manila";

    pub fn from_params(params: serde_json::Value) -> CollectorResult<Self> {
        let params: SharedFsCapacityParams = core_config::parse_params(params)?;
        if params.share_types.is_empty() {
            return Err(CollectorError::Misconfigured(
                "shared-filesystem capacity: no share types configured".into(),
            ));
        }
        if params.capacity_balance < 0.0 {
            return Err(CollectorError::Misconfigured(
                "capacity_balance must not be negative".into(),
            ));
        }
        Ok(Self {
            share_types: params.share_types,
            shares_per_pool: params.shares_per_pool,
            snapshots_per_share: params.snapshots_per_share,
            share_networks: params.share_networks,
            capacity_balance: params.capacity_balance,
            with_subcapacities: params.with_subcapacities,
            backend: None,
        })
    }

    /// Test constructor wiring in a prepared backend.
    pub fn with_backend(mut self, backend: Arc<dyn SharedFsBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    fn backend(&self) -> CollectorResult<&dyn SharedFsBackend> {
        self.backend
            .as_deref()
            .ok_or_else(|| CollectorError::Misconfigured("capacity plugin used before init".into()))
    }

    fn suffix(&self, index: usize) -> String {
        if index == 0 {
            String::new()
        } else {
            format!("_{}", self.share_types[index])
        }
    }

    fn zone_of(
        pool: &SharePool,
        host_azs: &BTreeMap<String, AvailabilityZone>,
        all_azs: &[AvailabilityZone],
    ) -> AvailabilityZone {
        // Pool hosts look like compute-host@backend; the mapping is keyed by
        // the compute host alone.
        let host = pool.host.split('@').next().unwrap_or(&pool.host);
        host_azs
            .get(host)
            .filter(|zone| all_azs.contains(zone))
            .cloned()
            .unwrap_or_else(AvailabilityZone::unknown)
    }

    fn aggregate_pools(
        &self,
        pools: &[SharePool],
        host_azs: &BTreeMap<String, AvailabilityZone>,
        all_azs: &[AvailabilityZone],
    ) -> BTreeMap<AvailabilityZone, AzAccumulator> {
        let mut by_zone: BTreeMap<AvailabilityZone, AzAccumulator> = BTreeMap::new();

        // Sorted by pool name so subcapacity ordering is deterministic.
        let mut pools: Vec<&SharePool> = pools.iter().collect();
        pools.sort_by(|a, b| a.name.cmp(&b.name));

        for pool in pools {
            let zone = Self::zone_of(pool, host_azs, all_azs);
            let entry = by_zone.entry(zone.clone()).or_default();

            let exclusion_reason = match classify_hardware_state(&pool.hardware_state) {
                PoolState::Included => None,
                PoolState::Excluded(reason) => Some(reason.to_string()),
                PoolState::Unknown => {
                    error!(
                        pool = %pool.name,
                        hardware_state = %pool.hardware_state,
                        "unknown hardware state, excluding pool from capacity"
                    );
                    Some(format!(
                        "unknown hardware_state {:?}",
                        pool.hardware_state
                    ))
                }
            };

            if exclusion_reason.is_none() {
                entry.pool_count += 1;
                entry.total_gb += pool.total_capacity_gb;
                entry.allocated_gb += pool.allocated_capacity_gb;
            }
            if self.with_subcapacities {
                let mut subcapacity = serde_json::json!({
                    "pool_name": pool.name,
                    "host": pool.host,
                    "az": zone,
                    "capacity_gib": pool.total_capacity_gb,
                    "usage_gib": pool.allocated_capacity_gb,
                });
                if let Some(reason) = &exclusion_reason {
                    subcapacity["exclusion_reason"] = serde_json::json!(reason);
                }
                entry.subcapacities.push(subcapacity);
            }
        }
        by_zone
    }
}

#[async_trait]
impl CapacityPlugin for SharedFsCapacityPlugin {
    async fn init(
        &mut self,
        _ctx: &ScrapeContext,
        provider: &ProviderClient,
    ) -> CollectorResult<()> {
        if self.backend.is_none() {
            let endpoint = provider.endpoint(&ServiceType::from("sharev2"))?;
            self.backend = Some(Arc::new(HttpSharedFsBackend::new(
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
        let az_count = all_azs.len().max(1) as u64;

        let mut resources: BTreeMap<ResourceName, PerAz<CapacityData>> = BTreeMap::new();

        for (index, share_type) in self.share_types.iter().enumerate() {
            ctx.check_canceled()?;
            let suffix = self.suffix(index);
            let pools = backend.pools(ctx, share_type).await?;
            let by_zone = self.aggregate_pools(&pools, &host_azs, all_azs);

            let mut shares: PerAz<CapacityData> = PerAz::new();
            let mut snapshots: PerAz<CapacityData> = PerAz::new();
            let mut share_capacity: PerAz<CapacityData> = PerAz::new();
            let mut snapshot_capacity: PerAz<CapacityData> = PerAz::new();

            for (zone, acc) in by_zone {
                let share_count = share_count(
                    self.shares_per_pool,
                    acc.pool_count,
                    self.share_networks / az_count,
                );
                let snapshot_count = self.snapshots_per_share * share_count;
                let (share_gib, snapshot_gib) =
                    capacity_split(self.capacity_balance, acc.total_gb);
                let (share_usage_gib, snapshot_usage_gib) =
                    capacity_split(self.capacity_balance, acc.allocated_gb);

                shares.insert(zone.clone(), CapacityData::new(share_count));
                snapshots.insert(zone.clone(), CapacityData::new(snapshot_count));
                share_capacity.insert(
                    zone.clone(),
                    CapacityData {
                        capacity: share_gib,
                        usage: Some(share_usage_gib),
                        subcapacities: acc.subcapacities,
                    },
                );
                snapshot_capacity.insert(
                    zone,
                    CapacityData::with_usage(snapshot_gib, snapshot_usage_gib),
                );
            }

            resources.insert(ResourceName::from(format!("shares{suffix}")), shares);
            resources.insert(
                ResourceName::from(format!("share_snapshots{suffix}")),
                snapshots,
            );
            resources.insert(
                ResourceName::from(format!("share_capacity{suffix}")),
                share_capacity,
            );
            resources.insert(
                ResourceName::from(format!("snapshot_capacity{suffix}")),
                snapshot_capacity,
            );
        }

        Ok(CapacityScrapeResult {
            capacity: BTreeMap::from([(ServiceType::from("sharev2"), resources)]),
            metrics: Default::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::client::MockSharedFsBackend;
    use super::*;

    fn pool(name: &str, host: &str, state: &str, total: u64, allocated: u64) -> SharePool {
        SharePool {
            name: name.into(),
            host: host.into(),
            hardware_state: state.into(),
            total_capacity_gb: total,
            allocated_capacity_gb: allocated,
        }
    }

    fn host_azs() -> BTreeMap<String, AvailabilityZone> {
        BTreeMap::from([
            ("share-host-1".to_string(), AvailabilityZone::from("az-1")),
            ("share-host-2".to_string(), AvailabilityZone::from("az-2")),
        ])
    }

    fn plugin(pools: Vec<SharePool>, params: serde_json::Value) -> SharedFsCapacityPlugin {
        let mut backend = MockSharedFsBackend::new();
        backend.expect_host_azs().returning(|_| Ok(host_azs()));
        backend.expect_pools().return_once(move |_, _| Ok(pools));
        SharedFsCapacityPlugin::from_params(params)
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

    async fn scrape(plugin: &SharedFsCapacityPlugin) -> CapacityScrapeResult {
        plugin
            .scrape(
                &ScrapeContext::new(),
                &NoDemand,
                &[
                    AvailabilityZone::from("az-1"),
                    AvailabilityZone::from("az-2"),
                ],
            )
            .await
            .unwrap()
    }

    #[test]
    fn capacity_split_follows_the_balance() {
        assert_eq!(capacity_split(2.0, 300), (100, 200));
        assert_eq!(capacity_split(0.0, 300), (300, 0));
        assert_eq!(capacity_split(1.0, 301), (150, 150));
    }

    #[test]
    fn share_count_saturates_at_zero() {
        for pool_count in 0..4u64 {
            for shares_per_pool in 0..4u64 {
                for share_networks in 0..20u64 {
                    let expected =
                        (shares_per_pool * pool_count).saturating_sub(share_networks);
                    assert_eq!(
                        share_count(shares_per_pool, pool_count, share_networks),
                        expected
                    );
                }
            }
        }
    }

    #[tokio::test]
    async fn aggregates_pools_per_az_and_splits_capacity() {
        let plugin = plugin(
            vec![
                pool("pool-a", "share-host-1@backend", "live", 300, 90),
                pool("pool-b", "share-host-2@backend", "live", 600, 30),
            ],
            serde_json::json!({
                "share_types": ["default"],
                "shares_per_pool": 250,
                "snapshots_per_share": 5,
                "capacity_balance": 2.0,
                "with_subcapacities": true,
            }),
        );

        let result = scrape(&plugin).await;
        let resources = &result.capacity[&ServiceType::from("sharev2")];
        let az1 = AvailabilityZone::from("az-1");
        let az2 = AvailabilityZone::from("az-2");

        let share_capacity = &resources[&ResourceName::from("share_capacity")];
        assert_eq!(share_capacity.get(&az1).unwrap().capacity, 100);
        assert_eq!(share_capacity.get(&az1).unwrap().usage, Some(30));
        assert_eq!(share_capacity.get(&az2).unwrap().capacity, 200);

        let snapshot_capacity = &resources[&ResourceName::from("snapshot_capacity")];
        assert_eq!(snapshot_capacity.get(&az1).unwrap().capacity, 200);

        let shares = &resources[&ResourceName::from("shares")];
        assert_eq!(shares.get(&az1).unwrap().capacity, 250);
        let snapshots = &resources[&ResourceName::from("share_snapshots")];
        assert_eq!(snapshots.get(&az1).unwrap().capacity, 1250);

        assert_eq!(
            share_capacity.get(&az1).unwrap().subcapacities.len(),
            1
        );
    }

    #[tokio::test]
    async fn hardware_state_filter_excludes_pools_with_reason() {
        let plugin = plugin(
            vec![
                pool("pool-a", "share-host-1@backend", "live", 300, 0),
                pool("pool-b", "share-host-1@backend", "in_decom", 500, 0),
                pool("pool-c", "share-host-1@backend", "quantum", 700, 0),
            ],
            serde_json::json!({
                "share_types": ["default"],
                "shares_per_pool": 10,
                "snapshots_per_share": 1,
                "capacity_balance": 2.0,
                "with_subcapacities": true,
            }),
        );

        let result = scrape(&plugin).await;
        let resources = &result.capacity[&ServiceType::from("sharev2")];
        let az1 = AvailabilityZone::from("az-1");

        // Only pool-a counts: 300 / 3 = 100.
        let share_capacity = &resources[&ResourceName::from("share_capacity")];
        assert_eq!(share_capacity.get(&az1).unwrap().capacity, 100);

        let subcapacities = &share_capacity.get(&az1).unwrap().subcapacities;
        assert_eq!(subcapacities.len(), 3);
        assert!(subcapacities[0].get("exclusion_reason").is_none());
        assert_eq!(
            subcapacities[1]["exclusion_reason"],
            serde_json::json!("hardware_state is in_decom")
        );
        assert!(subcapacities[2]["exclusion_reason"]
            .as_str()
            .unwrap()
            .contains("quantum"));
    }

    #[tokio::test]
    async fn share_networks_are_spread_across_azs() {
        let plugin = plugin(
            vec![
                pool("pool-a", "share-host-1@backend", "live", 300, 0),
                pool("pool-b", "share-host-2@backend", "live", 300, 0),
            ],
            serde_json::json!({
                "share_types": ["default"],
                "shares_per_pool": 100,
                "snapshots_per_share": 1,
                "share_networks": 50,
                "capacity_balance": 2.0,
            }),
        );

        let result = scrape(&plugin).await;
        let shares =
            &result.capacity[&ServiceType::from("sharev2")][&ResourceName::from("shares")];
        // 100 shares per pool, minus 50/2 share networks.
        assert_eq!(
            shares.get(&AvailabilityZone::from("az-1")).unwrap().capacity,
            75
        );
    }

    #[tokio::test]
    async fn scrape_is_idempotent() {
        let pools = || {
            vec![
                pool("pool-a", "share-host-1@backend", "live", 300, 90),
                pool("pool-b", "share-host-1@backend", "in_build", 500, 0),
            ]
        };
        let params = serde_json::json!({
            "share_types": ["default"],
            "shares_per_pool": 10,
            "snapshots_per_share": 2,
            "capacity_balance": 1.0,
            "with_subcapacities": true,
        });

        let first = scrape(&plugin(pools(), params.clone())).await;
        let second = scrape(&plugin(pools(), params)).await;
        assert_eq!(first.capacity, second.capacity);
    }
}
