//! The per-project quota/usage collector for the shared-filesystem service.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use core_model::{
    AvailabilityZone, KeystoneProject, PerAz, ResourceData, ResourceInfo, ResourceName,
    ServiceMetadata, ServiceType, Topology, Unit, UsageData,
};
use core_plugin::{
    CollectorError, CollectorResult, ProviderClient, QuotaPlugin, QuotaScrapeResult, ScrapeContext,
};
use promquery::{BulkMetricCache, BulkQuery, PromClient};
use serde::Deserialize;
use tracing::info;

use super::client::{HttpSharedFsBackend, SharedFsBackend, SharedFsQuotaUpdate, ShareUsage};

const BYTES_PER_GIB: u64 = 1 << 30;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShareTypeSpec {
    pub name: String,

    /// Replication-enabled types carry the parallel replica quotas.
    #[serde(default)]
    pub replication_enabled: bool,

    /// When set, only projects of these domains may use this share type.
    #[serde(default)]
    pub restrict_to_domains: Option<Vec<String>>,
}

impl ShareTypeSpec {
    fn forbidden_for(&self, project: &KeystoneProject) -> bool {
        self.restrict_to_domains
            .as_ref()
            .is_some_and(|domains| !domains.contains(&project.domain.name))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SharedFsQuotaParams {
    share_types: Vec<ShareTypeSpec>,

    /// Where to read physical usage from. Optional; without it only logical
    /// usage is reported.
    #[serde(default)]
    prometheus_api_url: Option<String>,

    /// Query yielding physical usage in bytes, labeled by `project_id` and
    /// `az`.
    #[serde(default)]
    physical_usage_query: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct PhysicalUsage {
    bytes: u64,
}

type PhysicalUsageCache = BulkMetricCache<(String, String), PhysicalUsage>;

/// Collects share/snapshot counts and capacity per share type.
pub struct SharedFsQuotaPlugin {
    share_types: Vec<ShareTypeSpec>,
    prometheus_api_url: Option<String>,
    physical_usage_query: Option<String>,
    backend: Option<Arc<dyn SharedFsBackend>>,
    physical_usage: Option<PhysicalUsageCache>,
}

impl SharedFsQuotaPlugin {
    pub const TYPE_ID: &'static str = "manila";

    pub fn from_params(params: serde_json::Value) -> CollectorResult<Self> {
        let params: SharedFsQuotaParams = core_config::parse_params(params)?;
        if params.share_types.is_empty() {
            return Err(CollectorError::Misconfigured(
                "shared-filesystem quota: no share types configured".into(),
            ));
        }
        if params.physical_usage_query.is_some() != params.prometheus_api_url.is_some() {
            return Err(CollectorError::Misconfigured(
                "physical_usage_query and prometheus_api_url must be configured together".into(),
            ));
        }
        Ok(Self {
            share_types: params.share_types,
            prometheus_api_url: params.prometheus_api_url,
            physical_usage_query: params.physical_usage_query,
            backend: None,
            physical_usage: None,
        })
    }

    /// Test constructor wiring in a prepared backend.
    pub fn with_backend(mut self, backend: Arc<dyn SharedFsBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Test constructor wiring in a prepared physical-usage cache.
    pub fn with_physical_usage_cache(mut self, cache: PhysicalUsageCache) -> Self {
        self.physical_usage = Some(cache);
        self
    }

    fn backend(&self) -> CollectorResult<&dyn SharedFsBackend> {
        self.backend
            .as_deref()
            .ok_or_else(|| CollectorError::Misconfigured("quota plugin used before init".into()))
    }

    fn build_physical_usage_cache(api_url: &str, query: &str) -> PhysicalUsageCache {
        BulkMetricCache::new(
            Arc::new(PromClient::new(api_url)),
            vec![BulkQuery {
                description: "physical share usage by project and AZ",
                expression: query.to_string(),
                key: |sample| {
                    Some((
                        sample.label("project_id")?.to_string(),
                        sample.label("az")?.to_string(),
                    ))
                },
                fill: |entry: &mut PhysicalUsage, sample| entry.bytes = sample.value as u64,
            }],
        )
    }

    /// `""` for the primary share type, `"_<name>"` for all others.
    fn suffix(&self, index: usize) -> String {
        if index == 0 {
            String::new()
        } else {
            format!("_{}", self.share_types[index].name)
        }
    }

    fn resource(base: &str, suffix: &str) -> ResourceName {
        ResourceName::from(format!("{base}{suffix}"))
    }

    /// Prefers the replica quota over the legacy share quota. A disagreement
    /// reports unlimited, which forces the next reconciliation to rewrite
    /// the replica quota.
    fn reconcile_quota(
        project: &KeystoneProject,
        resource: &ResourceName,
        legacy: i64,
        replica: i64,
    ) -> i64 {
        if legacy == replica {
            replica
        } else {
            info!(
                project_id = %project.uuid,
                resource = %resource,
                legacy_quota = legacy,
                replica_quota = replica,
                "share and replica quotas disagree, forcing rewrite"
            );
            ResourceData::UNLIMITED
        }
    }

    fn usage_per_az(
        usage: &BTreeMap<AvailabilityZone, ShareUsage>,
        all_azs: &[AvailabilityZone],
        value: impl Fn(&ShareUsage) -> u64,
    ) -> PerAz<UsageData> {
        let mut per_az: PerAz<UsageData> = PerAz::from_real(all_azs);
        for (zone, entry) in usage {
            let target = if all_azs.contains(zone) {
                zone.clone()
            } else {
                AvailabilityZone::unknown()
            };
            per_az.entry_or_default(target).usage += value(entry);
        }
        per_az
    }
}

#[async_trait]
impl QuotaPlugin for SharedFsQuotaPlugin {
    async fn init(
        &mut self,
        _ctx: &ScrapeContext,
        provider: &ProviderClient,
        _service_type: ServiceType,
    ) -> CollectorResult<()> {
        if self.backend.is_none() {
            let endpoint = provider.endpoint(&ServiceType::from("sharev2"))?;
            self.backend = Some(Arc::new(HttpSharedFsBackend::new(
                endpoint,
                provider.token(),
            )));
        }
        if self.physical_usage.is_none() {
            if let (Some(api_url), Some(query)) =
                (&self.prometheus_api_url, &self.physical_usage_query)
            {
                self.physical_usage = Some(Self::build_physical_usage_cache(api_url, query));
            }
        }
        Ok(())
    }

    fn plugin_type_id(&self) -> &'static str {
        Self::TYPE_ID
    }

    fn service_info(&self) -> ServiceMetadata {
        ServiceMetadata {
            product_name: "manila".into(),
            area: "storage".into(),
        }
    }

    fn resources(&self) -> BTreeMap<ResourceName, ResourceInfo> {
        let mut resources = BTreeMap::from([(
            ResourceName::from("share_networks"),
            ResourceInfo::new(Unit::None, Topology::Flat),
        )]);
        for index in 0..self.share_types.len() {
            let suffix = self.suffix(index);
            resources.insert(
                Self::resource("shares", &suffix),
                ResourceInfo::new(Unit::None, Topology::AzAware),
            );
            resources.insert(
                Self::resource("share_capacity", &suffix),
                ResourceInfo::new(Unit::GibiBytes, Topology::AzAware),
            );
            resources.insert(
                Self::resource("share_snapshots", &suffix),
                ResourceInfo::new(Unit::None, Topology::AzAware),
            );
            resources.insert(
                Self::resource("snapshot_capacity", &suffix),
                ResourceInfo::new(Unit::GibiBytes, Topology::AzAware),
            );
        }
        resources
    }

    async fn scrape(
        &self,
        ctx: &ScrapeContext,
        project: &KeystoneProject,
        all_azs: &[AvailabilityZone],
    ) -> CollectorResult<QuotaScrapeResult> {
        let backend = self.backend()?;
        let mut resources = BTreeMap::new();

        let physical_usage = match &self.physical_usage {
            Some(cache) => Some(cache.get(ctx).await?),
            None => None,
        };

        for (index, share_type) in self.share_types.iter().enumerate() {
            let suffix = self.suffix(index);

            if share_type.forbidden_for(project) {
                for base in [
                    "shares",
                    "share_capacity",
                    "share_snapshots",
                    "snapshot_capacity",
                ] {
                    resources.insert(
                        Self::resource(base, &suffix),
                        ResourceData::forbidden(PerAz::from_real(all_azs)),
                    );
                }
                continue;
            }

            let quota_set = backend
                .get_quota_set(ctx, &project.uuid, Some(&share_type.name))
                .await?;
            let usage = backend
                .usage_by_az(ctx, &project.uuid, &share_type.name)
                .await?;

            let shares_resource = Self::resource("shares", &suffix);
            let shares_quota = if share_type.replication_enabled {
                Self::reconcile_quota(
                    project,
                    &shares_resource,
                    quota_set.shares.limit,
                    quota_set.share_replicas.limit,
                )
            } else {
                quota_set.shares.limit
            };
            let capacity_resource = Self::resource("share_capacity", &suffix);
            let capacity_quota = if share_type.replication_enabled {
                Self::reconcile_quota(
                    project,
                    &capacity_resource,
                    quota_set.gigabytes.limit,
                    quota_set.replica_gigabytes.limit,
                )
            } else {
                quota_set.gigabytes.limit
            };

            resources.insert(
                shares_resource,
                ResourceData::new(
                    shares_quota,
                    Self::usage_per_az(&usage, all_azs, |entry| entry.shares),
                ),
            );

            let mut capacity_per_az = Self::usage_per_az(&usage, all_azs, |entry| entry.gigabytes);
            if let Some(physical_usage) = &physical_usage {
                for (zone, data) in capacity_per_az.iter_mut() {
                    let key = (project.uuid.clone(), zone.to_string());
                    if let Some(entry) = physical_usage.get(&key) {
                        // Rounding is always ceiling, so a byte of physical
                        // usage never disappears from the GiB figure.
                        data.physical_usage = Some(entry.bytes.div_ceil(BYTES_PER_GIB));
                    }
                }
            }
            resources.insert(
                capacity_resource,
                ResourceData::new(capacity_quota, capacity_per_az),
            );

            resources.insert(
                Self::resource("share_snapshots", &suffix),
                ResourceData::new(
                    quota_set.snapshots.limit,
                    Self::usage_per_az(&usage, all_azs, |entry| entry.snapshots),
                ),
            );
            resources.insert(
                Self::resource("snapshot_capacity", &suffix),
                ResourceData::new(
                    quota_set.snapshot_gigabytes.limit,
                    Self::usage_per_az(&usage, all_azs, |entry| entry.snapshot_gigabytes),
                ),
            );
        }

        // share_networks live on the unscoped quota set.
        let unscoped = backend.get_quota_set(ctx, &project.uuid, None).await?;
        resources.insert(
            ResourceName::from("share_networks"),
            ResourceData::new(
                unscoped.share_networks.limit,
                PerAz::flat(UsageData::new(unscoped.share_networks.in_use)),
            ),
        );

        Ok(QuotaScrapeResult {
            resources,
            metrics: Default::default(),
        })
    }

    async fn set_quota(
        &self,
        ctx: &ScrapeContext,
        project: &KeystoneProject,
        desired: &BTreeMap<ResourceName, u64>,
    ) -> CollectorResult<()> {
        let backend = self.backend()?;
        let value = |resource: &ResourceName| desired.get(resource).copied().unwrap_or_default();
        let any_replication = self
            .share_types
            .iter()
            .any(|share_type| share_type.replication_enabled);

        let mut overall = SharedFsQuotaUpdate {
            share_networks: Some(value(&ResourceName::from("share_networks"))),
            ..Default::default()
        };

        for (index, share_type) in self.share_types.iter().enumerate() {
            let suffix = self.suffix(index);
            let update = SharedFsQuotaUpdate {
                gigabytes: value(&Self::resource("share_capacity", &suffix)),
                shares: value(&Self::resource("shares", &suffix)),
                snapshot_gigabytes: value(&Self::resource("snapshot_capacity", &suffix)),
                snapshots: value(&Self::resource("share_snapshots", &suffix)),
                share_replicas: share_type
                    .replication_enabled
                    .then_some(value(&Self::resource("shares", &suffix))),
                replica_gigabytes: share_type
                    .replication_enabled
                    .then_some(value(&Self::resource("share_capacity", &suffix))),
                share_networks: None,
            };

            if share_type.forbidden_for(project) {
                let nonzero = [
                    ("shares", update.shares),
                    ("share_capacity", update.gigabytes),
                    ("share_snapshots", update.snapshots),
                    ("snapshot_capacity", update.snapshot_gigabytes),
                ]
                .into_iter()
                .find(|(_, amount)| *amount > 0);
                if let Some((base, _)) = nonzero {
                    return Err(CollectorError::ForbiddenResource(Self::resource(
                        base, &suffix,
                    )));
                }
                continue;
            }

            overall.gigabytes += update.gigabytes;
            overall.shares += update.shares;
            overall.snapshot_gigabytes += update.snapshot_gigabytes;
            overall.snapshots += update.snapshots;
            if any_replication {
                *overall.share_replicas.get_or_insert(0) += update.shares;
                *overall.replica_gigabytes.get_or_insert(0) += update.gigabytes;
            }

            backend
                .put_quota_set(ctx, &project.uuid, Some(&share_type.name), &update)
                .await?;
        }

        // The overall quota must cover the sum of all share types.
        backend
            .put_quota_set(ctx, &project.uuid, None, &overall)
            .await
    }
}
