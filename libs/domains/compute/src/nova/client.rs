//! The compute/placement backend contract and its HTTP implementation.

use std::collections::BTreeMap;

use async_trait::async_trait;
use core_model::{AvailabilityZone, FlexibleInt, FlexibleUint};
use core_plugin::{CollectorResult, ScrapeContext};
use serde::{Deserialize, Serialize};

use crate::binpack::{BinpackVector, HypervisorInventory, InventoryMetric};
use crate::flavors::FlavorInfo;

/// One quota field: granted limit and current consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QuotaSetField {
    pub limit: i64,
    pub in_use: u64,
}

/// The compute quota set of one project.
#[derive(Debug, Clone, Default)]
pub struct ComputeQuotaSet {
    pub cores: QuotaSetField,
    pub instances: QuotaSetField,
    pub ram: QuotaSetField,

    /// Per-flavor instance quotas, keyed by flavor name.
    pub per_flavor: BTreeMap<String, QuotaSetField>,
}

/// Aggregated server usage of one project in one AZ.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerUsage {
    pub instances: u64,
    pub cores: u64,
    pub ram_mb: u64,
    pub by_flavor: BTreeMap<String, u64>,
}

/// One hypervisor with its placement inventories and current usage.
#[derive(Debug, Clone)]
pub struct HypervisorRecord {
    pub name: String,
    pub service_host: String,
    pub aggregate_names: Vec<String>,
    pub traits: Vec<String>,
    pub availability_zone: Option<AvailabilityZone>,
    pub inventory: HypervisorInventory,
    pub usage: BinpackVector<u64>,
}

/// Where one running instance of a split flavor lives.
#[derive(Debug, Clone)]
pub struct InstanceLocation {
    pub hypervisor_hostname: Option<String>,
    pub availability_zone: Option<AvailabilityZone>,
}

/// Read/write access to the compute and placement services.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ComputeBackend: Send + Sync {
    async fn get_quota_set(
        &self,
        ctx: &ScrapeContext,
        project_id: &str,
    ) -> CollectorResult<ComputeQuotaSet>;

    async fn put_quota_set(
        &self,
        ctx: &ScrapeContext,
        project_id: &str,
        quotas: &BTreeMap<String, u64>,
    ) -> CollectorResult<()>;

    async fn list_flavors(&self, ctx: &ScrapeContext) -> CollectorResult<Vec<FlavorInfo>>;

    /// Server usage of one project, grouped by AZ.
    async fn usage_by_az(
        &self,
        ctx: &ScrapeContext,
        project_id: &str,
    ) -> CollectorResult<BTreeMap<AvailabilityZone, ServerUsage>>;

    async fn list_hypervisors(&self, ctx: &ScrapeContext)
        -> CollectorResult<Vec<HypervisorRecord>>;

    /// All running instances of one flavor, cluster-wide.
    async fn list_instances_of_flavor(
        &self,
        ctx: &ScrapeContext,
        flavor_name: &str,
    ) -> CollectorResult<Vec<InstanceLocation>>;
}

const SERVICE: &str = "compute";

#[derive(Deserialize)]
struct QuotaSetDocument {
    quota_set: BTreeMap<String, QuotaFieldDocument>,
}

#[derive(Deserialize)]
struct QuotaFieldDocument {
    limit: FlexibleInt,
    #[serde(default)]
    in_use: FlexibleUint,
}

#[derive(Serialize)]
struct QuotaSetUpdateDocument<'a> {
    quota_set: &'a BTreeMap<String, u64>,
}

#[derive(Deserialize)]
struct FlavorListDocument {
    flavors: Vec<FlavorDocument>,
}

#[derive(Deserialize)]
struct FlavorDocument {
    name: String,
    vcpus: u64,
    ram: u64,
    disk: u64,
    #[serde(default)]
    extra_specs: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct ServerListDocument {
    servers: Vec<ServerDocument>,
}

#[derive(Deserialize)]
struct ServerDocument {
    id: String,
    #[serde(rename = "OS-EXT-AZ:availability_zone")]
    availability_zone: Option<String>,
    #[serde(rename = "OS-EXT-SRV-ATTR:hypervisor_hostname")]
    hypervisor_hostname: Option<String>,
    flavor: ServerFlavorDocument,
}

#[derive(Deserialize)]
struct ServerFlavorDocument {
    original_name: String,
    vcpus: u64,
    ram: u64,
}

#[derive(Deserialize)]
struct ResourceProviderListDocument {
    resource_providers: Vec<ResourceProviderDocument>,
}

#[derive(Deserialize)]
struct ResourceProviderDocument {
    uuid: String,
    name: String,
}

#[derive(Deserialize)]
struct InventoryListDocument {
    inventories: BTreeMap<String, InventoryDocument>,
}

#[derive(Deserialize)]
struct InventoryDocument {
    total: u64,
    #[serde(default)]
    reserved: u64,
    #[serde(default)]
    max_unit: u64,
}

#[derive(Deserialize)]
struct UsageListDocument {
    usages: BTreeMap<String, u64>,
}

#[derive(Deserialize)]
struct TraitListDocument {
    #[serde(rename = "traits")]
    traits: Vec<String>,
}

#[derive(Deserialize)]
struct AggregateListDocument {
    aggregates: Vec<AggregateDocument>,
}

#[derive(Deserialize)]
struct AggregateDocument {
    name: String,
    availability_zone: Option<String>,
    hosts: Vec<String>,
}

/// HTTP implementation against the compute and placement APIs.
pub struct HttpComputeBackend {
    client: reqwest::Client,
    compute_url: String,
    placement_url: String,
    token: String,
}

impl HttpComputeBackend {
    pub fn new(
        compute_url: impl Into<String>,
        placement_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            compute_url: compute_url.into().trim_end_matches('/').to_string(),
            placement_url: placement_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> CollectorResult<T> {
        Ok(self
            .client
            .get(url)
            .header("X-Auth-Token", &self.token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    /// Lists servers page by page, aborting immediately on cancellation.
    async fn list_servers(
        &self,
        ctx: &ScrapeContext,
        query: &str,
    ) -> CollectorResult<Vec<ServerDocument>> {
        let mut servers = Vec::new();
        let mut marker = String::new();
        loop {
            ctx.check_canceled()?;
            let url = if marker.is_empty() {
                format!("{}/servers/detail?{}", self.compute_url, query)
            } else {
                format!(
                    "{}/servers/detail?{}&marker={}",
                    self.compute_url, query, marker
                )
            };
            let page: ServerListDocument = self.get_json(&url).await?;
            let Some(last) = page.servers.last() else {
                break;
            };
            marker = last.id.clone();
            servers.extend(page.servers);
        }
        Ok(servers)
    }
}

#[async_trait]
impl ComputeBackend for HttpComputeBackend {
    async fn get_quota_set(
        &self,
        ctx: &ScrapeContext,
        project_id: &str,
    ) -> CollectorResult<ComputeQuotaSet> {
        let url = format!("{}/os-quota-sets/{}/detail", self.compute_url, project_id);
        let document: QuotaSetDocument = ctx
            .round_trip(SERVICE, "get-quota-set", self.get_json(&url))
            .await?;

        let mut quota_set = ComputeQuotaSet::default();
        for (field, value) in document.quota_set {
            let value = QuotaSetField {
                limit: value.limit.into(),
                in_use: value.in_use.into(),
            };
            match field.as_str() {
                "cores" => quota_set.cores = value,
                "instances" => quota_set.instances = value,
                "ram" => quota_set.ram = value,
                other => {
                    if let Some(flavor) = other.strip_prefix("instances_") {
                        quota_set.per_flavor.insert(flavor.to_string(), value);
                    }
                }
            }
        }
        Ok(quota_set)
    }

    async fn put_quota_set(
        &self,
        ctx: &ScrapeContext,
        project_id: &str,
        quotas: &BTreeMap<String, u64>,
    ) -> CollectorResult<()> {
        let url = format!("{}/os-quota-sets/{}", self.compute_url, project_id);
        let body = QuotaSetUpdateDocument { quota_set: quotas };
        ctx.round_trip(SERVICE, "put-quota-set", async {
            self.client
                .put(&url)
                .header("X-Auth-Token", &self.token)
                .json(&body)
                .send()
                .await?
                .error_for_status()?;
            Ok(())
        })
        .await
    }

    async fn list_flavors(&self, ctx: &ScrapeContext) -> CollectorResult<Vec<FlavorInfo>> {
        let url = format!("{}/flavors/detail", self.compute_url);
        let document: FlavorListDocument = ctx
            .round_trip(SERVICE, "list-flavors", self.get_json(&url))
            .await?;

        Ok(document
            .flavors
            .into_iter()
            .map(|flavor| FlavorInfo {
                original_name: flavor.name,
                vcpus: flavor.vcpus,
                memory_mib: flavor.ram,
                disk_gib: flavor.disk,
                extra_specs: flavor.extra_specs,
            })
            .collect())
    }

    async fn usage_by_az(
        &self,
        ctx: &ScrapeContext,
        project_id: &str,
    ) -> CollectorResult<BTreeMap<AvailabilityZone, ServerUsage>> {
        let query = format!("all_tenants=1&project_id={project_id}");
        let servers = self.list_servers(ctx, &query).await?;

        let mut by_az: BTreeMap<AvailabilityZone, ServerUsage> = BTreeMap::new();
        for server in servers {
            let zone = server
                .availability_zone
                .map(AvailabilityZone::from)
                .unwrap_or_else(AvailabilityZone::unknown);
            let entry = by_az.entry(zone).or_default();
            entry.instances += 1;
            entry.cores += server.flavor.vcpus;
            entry.ram_mb += server.flavor.ram;
            *entry
                .by_flavor
                .entry(server.flavor.original_name)
                .or_default() += 1;
        }
        Ok(by_az)
    }

    async fn list_hypervisors(
        &self,
        ctx: &ScrapeContext,
    ) -> CollectorResult<Vec<HypervisorRecord>> {
        let providers: ResourceProviderListDocument = ctx
            .round_trip(
                SERVICE,
                "list-resource-providers",
                self.get_json(&format!("{}/resource_providers", self.placement_url)),
            )
            .await?;

        let aggregates: AggregateListDocument = ctx
            .round_trip(
                SERVICE,
                "list-aggregates",
                self.get_json(&format!("{}/os-aggregates", self.compute_url)),
            )
            .await?;

        let mut records = Vec::with_capacity(providers.resource_providers.len());
        for provider in providers.resource_providers {
            ctx.check_canceled()?;

            let inventories: InventoryListDocument = self
                .get_json(&format!(
                    "{}/resource_providers/{}/inventories",
                    self.placement_url, provider.uuid
                ))
                .await?;
            let usages: UsageListDocument = self
                .get_json(&format!(
                    "{}/resource_providers/{}/usages",
                    self.placement_url, provider.uuid
                ))
                .await?;
            let traits: TraitListDocument = self
                .get_json(&format!(
                    "{}/resource_providers/{}/traits",
                    self.placement_url, provider.uuid
                ))
                .await?;

            let metric = |class: &str| {
                inventories
                    .inventories
                    .get(class)
                    .map(|inventory| InventoryMetric {
                        total: inventory.total,
                        reserved: inventory.reserved,
                        max_unit: inventory.max_unit,
                    })
                    .unwrap_or_default()
            };
            let usage = |class: &str| usages.usages.get(class).copied().unwrap_or_default();

            // The provider name doubles as the hypervisor hostname; the
            // service host is its first dot-separated component.
            let service_host = provider
                .name
                .split('.')
                .next()
                .unwrap_or(&provider.name)
                .to_string();

            let matching_aggregates: Vec<&AggregateDocument> = aggregates
                .aggregates
                .iter()
                .filter(|aggregate| aggregate.hosts.contains(&service_host))
                .collect();

            records.push(HypervisorRecord {
                name: provider.name.clone(),
                service_host,
                aggregate_names: matching_aggregates
                    .iter()
                    .map(|aggregate| aggregate.name.clone())
                    .collect(),
                traits: traits.traits,
                availability_zone: matching_aggregates
                    .iter()
                    .find_map(|aggregate| aggregate.availability_zone.clone())
                    .map(AvailabilityZone::from),
                inventory: HypervisorInventory {
                    vcpus: metric("VCPU"),
                    memory_mb: metric("MEMORY_MB"),
                    local_gb: metric("DISK_GB"),
                },
                usage: BinpackVector::new(usage("VCPU"), usage("MEMORY_MB"), usage("DISK_GB")),
            });
        }
        Ok(records)
    }

    async fn list_instances_of_flavor(
        &self,
        ctx: &ScrapeContext,
        flavor_name: &str,
    ) -> CollectorResult<Vec<InstanceLocation>> {
        let query = format!("all_tenants=1&flavor={flavor_name}");
        let servers = self.list_servers(ctx, &query).await?;

        Ok(servers
            .into_iter()
            .map(|server| InstanceLocation {
                hypervisor_hostname: server.hypervisor_hostname,
                availability_zone: server.availability_zone.map(AvailabilityZone::from),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_set_document_decodes_flexible_fields() {
        let body = serde_json::json!({
            "quota_set": {
                "cores": {"limit": "40", "in_use": 12},
                "instances": {"limit": -1, "in_use": 3},
                "ram": {"limit": null, "in_use": "8192"},
                "instances_bm": {"limit": 2, "in_use": 1},
            },
        });
        let document: QuotaSetDocument = serde_json::from_value(body).unwrap();
        assert_eq!(document.quota_set["cores"].limit.0, 40);
        assert_eq!(document.quota_set["instances"].limit.0, -1);
        assert_eq!(document.quota_set["ram"].limit.0, 0);
        assert_eq!(document.quota_set["ram"].in_use.0, 8192);
    }

    #[test]
    fn server_document_reads_extension_attributes() {
        let body = serde_json::json!({
            "servers": [{
                "id": "abc",
                "OS-EXT-AZ:availability_zone": "az-1",
                "OS-EXT-SRV-ATTR:hypervisor_hostname": "hv1.cloud.local",
                "flavor": {"original_name": "bm", "vcpus": 8, "ram": 16384},
            }],
        });
        let document: ServerListDocument = serde_json::from_value(body).unwrap();
        assert_eq!(
            document.servers[0].hypervisor_hostname.as_deref(),
            Some("hv1.cloud.local")
        );
    }
}
