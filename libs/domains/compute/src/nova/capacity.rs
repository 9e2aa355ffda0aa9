//! The binpacking capacity collector for the compute service.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use core_model::{
    AvailabilityZone, CapacityData, PerAz, ResourceDemand, ResourceName, ServiceType,
};
use core_plugin::{
    CapacityBackchannel, CapacityPlugin, CapacityScrapeResult, CollectorError, CollectorResult,
    ProviderClient, ScrapeContext,
};
use observability::{SerializedMetricFamily, SerializedMetrics};
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::binpack::{
    AzSimulation, BinpackHypervisor, BinpackVector, OvercommitFactor, PooledDemand, SplitDemand,
};
use crate::flavors::{sort_for_placement, FlavorInfo, FlavorTranslationTable};

use super::client::{ComputeBackend, HttpComputeBackend, HypervisorRecord};

const PLACEMENTS_METRIC: &str = "compute_binpack_placements";
const UNPLACEABLE_METRIC: &str = "compute_binpack_unplaceable_flavors";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NovaCapacityParams {
    /// Hypervisors are selected when one of their aggregates matches.
    aggregate_name_pattern: String,

    #[serde(default)]
    required_traits: Vec<String>,
    #[serde(default)]
    excluded_traits: Vec<String>,

    /// Hypervisors carrying this trait stay out of the simulation; their
    /// usage still counts.
    #[serde(default)]
    shadowing_trait: Option<String>,

    /// Per-instance root disk approximation for the pooled instances
    /// capacity.
    max_root_disk_gb: u64,

    #[serde(default)]
    cores_overcommit_factor: Option<f64>,

    /// AZ-specific overrides for the cores overcommit factor.
    #[serde(default)]
    cores_overcommit_per_az: BTreeMap<String, f64>,

    /// Accepted only at the neutral value; cores are the only resource with
    /// overcommit.
    #[serde(default)]
    ram_overcommit_factor: Option<f64>,
    #[serde(default)]
    instances_overcommit_factor: Option<f64>,

    #[serde(default)]
    with_subcapacities: bool,
}

/// Reports compute capacity from a placement simulation over hypervisor
/// nodes.
pub struct NovaCapacityPlugin {
    aggregate_pattern: Regex,
    required_traits: Vec<String>,
    excluded_traits: Vec<String>,
    shadowing_trait: Option<String>,
    max_root_disk_gb: u64,
    default_overcommit: OvercommitFactor,
    overcommit_per_az: BTreeMap<AvailabilityZone, OvercommitFactor>,
    with_subcapacities: bool,
    backend: Option<Arc<dyn ComputeBackend>>,
    split_flavors: Vec<FlavorInfo>,
    translation: FlavorTranslationTable,
}

impl NovaCapacityPlugin {
    pub const TYPE_ID: &'static str = "nova";

    pub fn from_params(params: serde_json::Value) -> CollectorResult<Self> {
        let params: NovaCapacityParams = core_config::parse_params(params)?;

        let aggregate_pattern = Regex::new(&params.aggregate_name_pattern).map_err(|err| {
            CollectorError::Misconfigured(format!("invalid aggregate_name_pattern: {err}"))
        })?;
        for (name, factor) in [
            ("ram_overcommit_factor", params.ram_overcommit_factor),
            (
                "instances_overcommit_factor",
                params.instances_overcommit_factor,
            ),
        ] {
            if factor.is_some_and(|factor| factor != 1.0) {
                return Err(CollectorError::Misconfigured(format!(
                    "{name}: only cores support overcommit"
                )));
            }
        }
        if params.max_root_disk_gb == 0 {
            return Err(CollectorError::Misconfigured(
                "max_root_disk_gb must be positive".into(),
            ));
        }

        Ok(Self {
            aggregate_pattern,
            required_traits: params.required_traits,
            excluded_traits: params.excluded_traits,
            shadowing_trait: params.shadowing_trait,
            max_root_disk_gb: params.max_root_disk_gb,
            default_overcommit: OvercommitFactor(params.cores_overcommit_factor.unwrap_or(1.0)),
            overcommit_per_az: params
                .cores_overcommit_per_az
                .into_iter()
                .map(|(zone, factor)| (AvailabilityZone::from(zone), OvercommitFactor(factor)))
                .collect(),
            with_subcapacities: params.with_subcapacities,
            backend: None,
            split_flavors: Vec::new(),
            translation: FlavorTranslationTable::default(),
        })
    }

    /// Test constructor wiring in a prepared backend.
    pub fn with_backend(mut self, backend: Arc<dyn ComputeBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    fn backend(&self) -> CollectorResult<&dyn ComputeBackend> {
        self.backend
            .as_deref()
            .ok_or_else(|| CollectorError::Misconfigured("capacity plugin used before init".into()))
    }

    fn overcommit_for(&self, zone: &AvailabilityZone) -> OvercommitFactor {
        self.overcommit_per_az
            .get(zone)
            .copied()
            .unwrap_or(self.default_overcommit)
    }

    fn is_selected(&self, hypervisor: &HypervisorRecord) -> bool {
        let aggregate_matches = hypervisor
            .aggregate_names
            .iter()
            .any(|name| self.aggregate_pattern.is_match(name));
        let required = self
            .required_traits
            .iter()
            .all(|required| hypervisor.traits.contains(required));
        let excluded = self
            .excluded_traits
            .iter()
            .any(|excluded| hypervisor.traits.contains(excluded));
        aggregate_matches && required && !excluded
    }

    fn is_shadowed(&self, hypervisor: &HypervisorRecord) -> bool {
        self.shadowing_trait
            .as_ref()
            .is_some_and(|shadowing| hypervisor.traits.contains(shadowing))
    }

    fn zone_of(&self, hypervisor: &HypervisorRecord, all_azs: &[AvailabilityZone]) -> AvailabilityZone {
        match &hypervisor.availability_zone {
            Some(zone) if all_azs.contains(zone) => zone.clone(),
            _ => AvailabilityZone::unknown(),
        }
    }

    async fn demand_for(
        &self,
        backchannel: &dyn CapacityBackchannel,
        resource: &str,
    ) -> CollectorResult<PerAz<ResourceDemand>> {
        backchannel
            .get_resource_demand(&ServiceType::from("compute"), &ResourceName::from(resource))
            .await
    }

    fn demand_in(demand: &PerAz<ResourceDemand>, zone: &AvailabilityZone) -> ResourceDemand {
        demand.get(zone).copied().unwrap_or_default()
    }
}

/// Everything known about one AZ before simulation.
struct AzInput {
    hypervisors: Vec<HypervisorRecord>,
    shadowed: Vec<HypervisorRecord>,
}

#[async_trait]
impl CapacityPlugin for NovaCapacityPlugin {
    async fn init(
        &mut self,
        ctx: &ScrapeContext,
        provider: &ProviderClient,
    ) -> CollectorResult<()> {
        if self.backend.is_none() {
            let compute = provider.endpoint(&ServiceType::from("compute"))?;
            let placement = provider.endpoint(&ServiceType::from("placement"))?;
            self.backend = Some(Arc::new(HttpComputeBackend::new(
                compute,
                placement,
                provider.token(),
            )));
        }

        let mut flavors: Vec<FlavorInfo> = self
            .backend()?
            .list_flavors(ctx)
            .await?
            .into_iter()
            .filter(FlavorInfo::has_separate_instance_quota)
            .collect();
        sort_for_placement(&mut flavors);
        self.split_flavors = flavors;
        Ok(())
    }

    fn plugin_type_id(&self) -> &'static str {
        Self::TYPE_ID
    }

    async fn scrape(
        &self,
        ctx: &ScrapeContext,
        backchannel: &dyn CapacityBackchannel,
        all_azs: &[AvailabilityZone],
    ) -> CollectorResult<CapacityScrapeResult> {
        let backend = self.backend()?;

        // Partition the selected hypervisors by AZ.
        let mut by_zone: BTreeMap<AvailabilityZone, AzInput> = BTreeMap::new();
        for hypervisor in backend.list_hypervisors(ctx).await? {
            if !self.is_selected(&hypervisor) {
                continue;
            }
            let zone = self.zone_of(&hypervisor, all_azs);
            let input = by_zone.entry(zone).or_insert_with(|| AzInput {
                hypervisors: Vec::new(),
                shadowed: Vec::new(),
            });
            if self.is_shadowed(&hypervisor) {
                input.shadowed.push(hypervisor);
            } else {
                input.hypervisors.push(hypervisor);
            }
        }

        let cores_demand = self.demand_for(backchannel, "cores").await?;
        let instances_demand = self.demand_for(backchannel, "instances").await?;
        let ram_demand = self.demand_for(backchannel, "ram").await?;

        // Existing placements of split flavors, per AZ; instances on shadowed
        // hosts are only counted, never simulated.
        let mut existing: BTreeMap<(AvailabilityZone, String), Vec<String>> = BTreeMap::new();
        let mut shadowed_counts: BTreeMap<(AvailabilityZone, String), u64> = BTreeMap::new();
        for flavor in &self.split_flavors {
            ctx.check_canceled()?;
            let locations = backend
                .list_instances_of_flavor(ctx, &flavor.original_name)
                .await?;
            for location in locations {
                let Some(hostname) = location.hypervisor_hostname else {
                    continue;
                };
                let Some((zone, shadowed)) = by_zone.iter().find_map(|(zone, input)| {
                    if input.hypervisors.iter().any(|hv| hv.name == hostname) {
                        Some((zone.clone(), false))
                    } else if input.shadowed.iter().any(|hv| hv.name == hostname) {
                        Some((zone.clone(), true))
                    } else {
                        None
                    }
                }) else {
                    continue;
                };
                let key = (zone, flavor.original_name.clone());
                if shadowed {
                    *shadowed_counts.entry(key).or_default() += 1;
                } else {
                    existing.entry(key).or_default().push(hostname);
                }
            }
        }

        let mut split_demands_by_flavor: BTreeMap<String, PerAz<ResourceDemand>> = BTreeMap::new();
        for flavor in &self.split_flavors {
            let resource = self.translation.resource_name(&flavor.original_name);
            split_demands_by_flavor.insert(
                flavor.original_name.clone(),
                backchannel
                    .get_resource_demand(&ServiceType::from("compute"), &resource)
                    .await?,
            );
        }

        let mut cores_capacity: PerAz<CapacityData> = PerAz::new();
        let mut instances_capacity: PerAz<CapacityData> = PerAz::new();
        let mut ram_capacity: PerAz<CapacityData> = PerAz::new();
        let mut split_capacity: BTreeMap<String, PerAz<CapacityData>> = BTreeMap::new();
        let mut placements_family =
            SerializedMetricFamily::new(vec!["az".into(), "flavor".into()]);
        let mut unplaceable_family =
            SerializedMetricFamily::new(vec!["az".into(), "flavor".into()]);

        for (zone, input) in &by_zone {
            ctx.check_canceled()?;
            let overcommit = self.overcommit_for(zone);

            let mut binpack_hypervisors = Vec::with_capacity(input.hypervisors.len());
            for hypervisor in &input.hypervisors {
                binpack_hypervisors
                    .push(BinpackHypervisor::new(&hypervisor.name, &hypervisor.inventory)?);
            }

            let pooled = PooledDemand {
                cores: Self::demand_in(&cores_demand, zone),
                instances: Self::demand_in(&instances_demand, zone),
                ram: Self::demand_in(&ram_demand, zone),
            };
            let split_demands: Vec<SplitDemand> = self
                .split_flavors
                .iter()
                .map(|flavor| {
                    let key = (zone.clone(), flavor.original_name.clone());
                    SplitDemand {
                        flavor: flavor.clone(),
                        demand: split_demands_by_flavor
                            .get(&flavor.original_name)
                            .map(|demand| Self::demand_in(demand, zone))
                            .unwrap_or_default(),
                        existing_hosts: existing.get(&key).cloned().unwrap_or_default(),
                        shadowed_count: shadowed_counts.get(&key).copied().unwrap_or_default(),
                    }
                })
                .collect();

            let mut simulation =
                AzSimulation::new(binpack_hypervisors, overcommit, self.max_root_disk_gb);
            simulation.run(&pooled, &split_demands);

            let total = simulation.total_capacity();
            let split_consumed = self.split_flavors.iter().fold(
                BinpackVector::default(),
                |acc: BinpackVector<u64>, flavor| {
                    let placed = simulation.placement_count(&flavor.original_name);
                    acc.add(
                        BinpackVector::new(flavor.vcpus, flavor.memory_mib, flavor.disk_gib)
                            .scale(placed),
                    )
                },
            );

            // Shadowed hosts contribute usage but no capacity.
            let observed_usage = input
                .hypervisors
                .iter()
                .chain(&input.shadowed)
                .fold(BinpackVector::default(), |acc: BinpackVector<u64>, hv| {
                    acc.add(hv.usage)
                });

            let subcapacities: Vec<serde_json::Value> = if self.with_subcapacities {
                input
                    .hypervisors
                    .iter()
                    .map(|hv| (hv, false))
                    .chain(input.shadowed.iter().map(|hv| (hv, true)))
                    .map(|(hv, shadowed)| {
                        serde_json::json!({
                            "name": hv.name,
                            "az": zone,
                            "capacity": hv.inventory.node_capacity(),
                            "usage": hv.usage,
                            "shadowed": shadowed,
                        })
                    })
                    .collect()
            } else {
                Vec::new()
            };

            cores_capacity.insert(
                zone.clone(),
                CapacityData {
                    capacity: overcommit
                        .apply_to(total.vcpus)
                        .saturating_sub(split_consumed.vcpus),
                    usage: Some(observed_usage.vcpus),
                    subcapacities: subcapacities.clone(),
                },
            );
            ram_capacity.insert(
                zone.clone(),
                CapacityData {
                    capacity: total.memory_mb.saturating_sub(split_consumed.memory_mb),
                    usage: Some(observed_usage.memory_mb),
                    subcapacities,
                },
            );
            // TODO: pooled-instances capacity treats every instance as
            // having max_root_disk_gb of root disk; clusters with strongly
            // varying root disk sizes will over- or under-report here.
            let placed_split_total: u64 = self
                .split_flavors
                .iter()
                .map(|flavor| simulation.placement_count(&flavor.original_name))
                .sum();
            instances_capacity.insert(
                zone.clone(),
                CapacityData {
                    capacity: (total.local_gb / self.max_root_disk_gb)
                        .saturating_sub(placed_split_total),
                    usage: Some(pooled.instances.usage),
                    subcapacities: Vec::new(),
                },
            );

            for flavor in &self.split_flavors {
                let key = (zone.clone(), flavor.original_name.clone());
                let placed = simulation.placement_count(&flavor.original_name);
                let shadowed = shadowed_counts.get(&key).copied().unwrap_or_default();
                let demand = split_demands_by_flavor
                    .get(&flavor.original_name)
                    .map(|demand| Self::demand_in(demand, zone))
                    .unwrap_or_default();

                split_capacity
                    .entry(flavor.original_name.clone())
                    .or_default()
                    .insert(
                        zone.clone(),
                        CapacityData::with_usage(placed + shadowed, demand.usage),
                    );

                placements_family.push(
                    vec![zone.to_string(), flavor.original_name.clone()],
                    (placed + shadowed) as f64,
                );
                if !simulation.can_place(&flavor.original_name) {
                    warn!(
                        az = %zone,
                        flavor = %flavor.original_name,
                        "demand exceeds simulated capacity"
                    );
                    unplaceable_family
                        .push(vec![zone.to_string(), flavor.original_name.clone()], 1.0);
                }
            }

            debug!(az = %zone, hypervisors = input.hypervisors.len(), "binpack simulation done");
        }

        let mut resources = BTreeMap::from([
            (
                ResourceName::from("cores"),
                cores_capacity,
            ),
            (ResourceName::from("instances"), instances_capacity),
            (ResourceName::from("ram"), ram_capacity),
        ]);
        for (flavor_name, per_az) in split_capacity {
            resources.insert(self.translation.resource_name(&flavor_name), per_az);
        }

        let mut metrics = SerializedMetrics::new();
        metrics.insert(PLACEMENTS_METRIC, placements_family);
        metrics.insert(UNPLACEABLE_METRIC, unplaceable_family);

        Ok(CapacityScrapeResult {
            capacity: BTreeMap::from([(ServiceType::from("compute"), resources)]),
            metrics,
        })
    }

    fn describe_metrics(&self) {
        observability::describe_gauge!(
            PLACEMENTS_METRIC,
            "Simulated placements per AZ and flavor"
        );
        observability::describe_gauge!(
            UNPLACEABLE_METRIC,
            "Flavors whose demand exceeds simulated capacity"
        );
    }

    fn collect_metrics(
        &self,
        metrics: &SerializedMetrics,
        capacitor_id: &str,
    ) -> Result<(), observability::SerializedMetricsError> {
        let constant = [("capacitor_id", capacitor_id)];
        metrics.emit(PLACEMENTS_METRIC, &["az", "flavor"], &constant)?;
        metrics.emit(UNPLACEABLE_METRIC, &["az", "flavor"], &constant)
    }
}
