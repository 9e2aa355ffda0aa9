//! Baremetal node capacity.
//!
//! Baremetal capacity is a node count per flavor: each physical node serves
//! exactly one instance of the flavor whose resource class it carries.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use core_model::{AvailabilityZone, CapacityData, PerAz, ResourceName, ServiceType};
use core_plugin::{
    CapacityBackchannel, CapacityPlugin, CapacityScrapeResult, CollectorError, CollectorResult,
    ProviderClient, ScrapeContext,
};
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::flavors::{FlavorInfo, FlavorTranslationTable};

/// Provision states that make a node count toward capacity.
const AVAILABLE_STATES: &[&str] = &["available", "active", "deploying", "cleaning"];

/// One baremetal node as reported by the bare-metal service.
#[derive(Debug, Clone)]
pub struct BaremetalNode {
    pub name: String,
    pub provision_state: String,
    pub retired: bool,
    pub resource_class: Option<String>,
}

/// Read access to the bare-metal service and the host-to-AZ mapping.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BaremetalBackend: Send + Sync {
    async fn list_nodes(&self, ctx: &ScrapeContext) -> CollectorResult<Vec<BaremetalNode>>;

    /// Flavors that request a baremetal resource class.
    async fn list_flavors(&self, ctx: &ScrapeContext) -> CollectorResult<Vec<FlavorInfo>>;

    /// Compute host to AZ, derived from the aggregate listing.
    async fn host_azs(
        &self,
        ctx: &ScrapeContext,
    ) -> CollectorResult<BTreeMap<String, AvailabilityZone>>;
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BaremetalCapacityParams {
    /// Keep retired nodes in the reported capacity. Retirement currently has
    /// no billing consequence, so the default keeps them visible.
    #[serde(default = "default_true")]
    count_retired_nodes: bool,

    #[serde(default)]
    with_subcapacities: bool,
}

fn default_true() -> bool {
    true
}

/// Counts baremetal nodes per flavor and AZ.
pub struct BaremetalCapacityPlugin {
    count_retired_nodes: bool,
    with_subcapacities: bool,
    node_name_pattern: Regex,
    backend: Option<Arc<dyn BaremetalBackend>>,
    translation: FlavorTranslationTable,
}

impl BaremetalCapacityPlugin {
    pub const TYPE_ID: &'static str = "ironic";

    pub fn from_params(params: serde_json::Value) -> CollectorResult<Self> {
        let params: BaremetalCapacityParams = core_config::parse_params(params)?;
        Ok(Self {
            count_retired_nodes: params.count_retired_nodes,
            with_subcapacities: params.with_subcapacities,
            // Node names look like node012-bm015, node003-bb091, node200-cp002.
            node_name_pattern: Regex::new(r"^node\d+-([a-z]{2,3}\d+)$")
                .map_err(|err| CollectorError::Misconfigured(err.to_string()))?,
            backend: None,
            translation: FlavorTranslationTable::default(),
        })
    }

    /// Test constructor wiring in a prepared backend.
    pub fn with_backend(mut self, backend: Arc<dyn BaremetalBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    fn backend(&self) -> CollectorResult<&dyn BaremetalBackend> {
        self.backend
            .as_deref()
            .ok_or_else(|| CollectorError::Misconfigured("capacity plugin used before init".into()))
    }

    /// The host stub encoded in a node name, e.g. `bm015` in `node012-bm015`.
    fn host_stub<'a>(&self, node_name: &'a str) -> Option<&'a str> {
        self.node_name_pattern
            .captures(node_name)
            .and_then(|captures| captures.get(1))
            .map(|group| group.as_str())
    }

    fn zone_of(
        &self,
        node_name: &str,
        host_azs: &BTreeMap<String, AvailabilityZone>,
        all_azs: &[AvailabilityZone],
    ) -> AvailabilityZone {
        let Some(stub) = self.host_stub(node_name) else {
            return AvailabilityZone::unknown();
        };
        host_azs
            .iter()
            .find(|(host, _)| host.contains(stub))
            .map(|(_, zone)| zone.clone())
            .filter(|zone| all_azs.contains(zone))
            .unwrap_or_else(AvailabilityZone::unknown)
    }
}

#[async_trait]
impl CapacityPlugin for BaremetalCapacityPlugin {
    async fn init(
        &mut self,
        _ctx: &ScrapeContext,
        _provider: &ProviderClient,
    ) -> CollectorResult<()> {
        if self.backend.is_none() {
            return Err(CollectorError::Misconfigured(
                "baremetal capacity requires a backend".into(),
            ));
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

        let flavor_by_class: BTreeMap<String, FlavorInfo> = backend
            .list_flavors(ctx)
            .await?
            .into_iter()
            .filter_map(|flavor| {
                flavor
                    .resource_class()
                    .map(|class| (class.to_string(), flavor.clone()))
            })
            .collect();
        let host_azs = backend.host_azs(ctx).await?;

        let mut per_flavor: BTreeMap<String, PerAz<CapacityData>> = BTreeMap::new();
        for node in backend.list_nodes(ctx).await? {
            ctx.check_canceled()?;

            if node.retired && !self.count_retired_nodes {
                debug!(node = %node.name, "skipping retired node");
                continue;
            }
            if !AVAILABLE_STATES.contains(&node.provision_state.as_str()) {
                continue;
            }
            let Some(class) = &node.resource_class else {
                continue;
            };
            let Some(flavor) = flavor_by_class.get(class) else {
                warn!(node = %node.name, class = %class, "no flavor matches resource class");
                continue;
            };

            let zone = self.zone_of(&node.name, &host_azs, all_azs);
            let entry = per_flavor
                .entry(flavor.original_name.clone())
                .or_default()
                .entry_or_default(zone);
            entry.capacity += 1;
            if node.provision_state == "active" {
                *entry.usage.get_or_insert(0) += 1;
            } else {
                entry.usage.get_or_insert(0);
            }
            if self.with_subcapacities {
                entry.subcapacities.push(serde_json::json!({
                    "name": node.name,
                    "provision_state": node.provision_state,
                    "retired": node.retired,
                }));
            }
        }

        let resources = per_flavor
            .into_iter()
            .map(|(flavor_name, per_az)| (self.translation.resource_name(&flavor_name), per_az))
            .collect();

        Ok(CapacityScrapeResult {
            capacity: BTreeMap::from([(ServiceType::from("compute"), resources)]),
            metrics: Default::default(),
        })
    }
}
