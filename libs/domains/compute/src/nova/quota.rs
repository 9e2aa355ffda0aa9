//! The per-project quota/usage collector for the compute service.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use core_model::{
    usage_breakdown, AvailabilityZone, KeystoneProject, ResourceData, ResourceInfo, ResourceName,
    ServiceMetadata, ServiceType, Topology, Unit,
};
use core_plugin::{
    CollectorError, CollectorResult, ProviderClient, QuotaPlugin, QuotaScrapeResult, ScrapeContext,
};
use serde::Deserialize;
use tracing::debug;

use crate::flavors::{sort_for_placement, FlavorInfo, FlavorTranslationTable};

use super::client::{ComputeBackend, HttpComputeBackend, ServerUsage};

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct NovaQuotaParams {
    /// Flavor names the quota backend knows under a different name.
    #[serde(default)]
    flavor_aliases: BTreeMap<String, String>,
}

/// Collects cores/instances/ram plus per-flavor instance quotas.
pub struct NovaQuotaPlugin {
    backend: Option<Arc<dyn ComputeBackend>>,
    translation: FlavorTranslationTable,
    split_flavors: Vec<FlavorInfo>,
    service_type: ServiceType,
}

impl NovaQuotaPlugin {
    pub const TYPE_ID: &'static str = "nova";

    pub fn from_params(params: serde_json::Value) -> CollectorResult<Self> {
        let params: NovaQuotaParams = core_config::parse_params(params)?;
        Ok(Self {
            backend: None,
            translation: FlavorTranslationTable::new(params.flavor_aliases),
            split_flavors: Vec::new(),
            service_type: ServiceType::from("compute"),
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
            .ok_or_else(|| CollectorError::Misconfigured("quota plugin used before init".into()))
    }

    /// Enumerates the flavors that carry their own instance quota.
    ///
    /// This is the only mutation of the flavor-translation table; it happens
    /// once per init and never races with scrape-time reads.
    pub async fn list_flavors_with_separate_instance_quota(
        &self,
        ctx: &ScrapeContext,
    ) -> CollectorResult<Vec<FlavorInfo>> {
        let mut flavors: Vec<FlavorInfo> = self
            .backend()?
            .list_flavors(ctx)
            .await?
            .into_iter()
            .filter(FlavorInfo::has_separate_instance_quota)
            .collect();
        sort_for_placement(&mut flavors);

        for flavor in &flavors {
            if let Some(alias) = flavor.extra_specs.get("quota:alias") {
                self.translation
                    .record_alias(alias.clone(), flavor.original_name.clone());
            }
        }
        Ok(flavors)
    }

    fn localized_usage(
        usage: &BTreeMap<AvailabilityZone, ServerUsage>,
        value: impl Fn(&ServerUsage) -> u64,
    ) -> BTreeMap<AvailabilityZone, u64> {
        usage
            .iter()
            .map(|(zone, entry)| (zone.clone(), value(entry)))
            .filter(|(_, amount)| *amount > 0)
            .collect()
    }
}

#[async_trait]
impl QuotaPlugin for NovaQuotaPlugin {
    async fn init(
        &mut self,
        ctx: &ScrapeContext,
        provider: &ProviderClient,
        service_type: ServiceType,
    ) -> CollectorResult<()> {
        self.service_type = service_type;
        if self.backend.is_none() {
            let compute = provider.endpoint(&ServiceType::from("compute"))?;
            let placement = provider.endpoint(&ServiceType::from("placement"))?;
            self.backend = Some(Arc::new(HttpComputeBackend::new(
                compute,
                placement,
                provider.token(),
            )));
        }
        self.split_flavors = self.list_flavors_with_separate_instance_quota(ctx).await?;
        debug!(
            flavors = self.split_flavors.len(),
            "found flavors with separate instance quota"
        );
        Ok(())
    }

    fn plugin_type_id(&self) -> &'static str {
        Self::TYPE_ID
    }

    fn service_info(&self) -> ServiceMetadata {
        ServiceMetadata {
            product_name: "nova".into(),
            area: "compute".into(),
        }
    }

    fn resources(&self) -> BTreeMap<ResourceName, ResourceInfo> {
        let mut resources = BTreeMap::from([
            (
                ResourceName::from("cores"),
                ResourceInfo::new(Unit::None, Topology::AzAware),
            ),
            (
                ResourceName::from("instances"),
                ResourceInfo::new(Unit::None, Topology::AzAware),
            ),
            (
                ResourceName::from("ram"),
                ResourceInfo::new(Unit::MebiBytes, Topology::AzAware),
            ),
        ]);
        for flavor in &self.split_flavors {
            resources.insert(
                self.translation.resource_name(&flavor.original_name),
                ResourceInfo::new(Unit::None, Topology::AzAware),
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
        let quota_set = backend.get_quota_set(ctx, &project.uuid).await?;
        let usage = backend.usage_by_az(ctx, &project.uuid).await?;

        let mut resources = BTreeMap::new();

        type UsageField = fn(&ServerUsage) -> u64;
        let pooled: [(&str, super::client::QuotaSetField, UsageField); 3] = [
            ("cores", quota_set.cores, |entry| entry.cores),
            ("instances", quota_set.instances, |entry| entry.instances),
            ("ram", quota_set.ram, |entry| entry.ram_mb),
        ];
        for (name, field, value) in pooled {
            let localized = Self::localized_usage(&usage, value);
            resources.insert(
                ResourceName::from(name),
                ResourceData::new(
                    field.limit,
                    usage_breakdown(field.in_use, Some(&localized), all_azs),
                ),
            );
        }

        for flavor in &self.split_flavors {
            let field = quota_set
                .per_flavor
                .get(&flavor.original_name)
                .copied()
                .unwrap_or_default();
            let localized = Self::localized_usage(&usage, |entry| {
                entry
                    .by_flavor
                    .get(&flavor.original_name)
                    .copied()
                    .unwrap_or_default()
            });
            resources.insert(
                self.translation.resource_name(&flavor.original_name),
                ResourceData::new(
                    field.limit,
                    usage_breakdown(field.in_use, Some(&localized), all_azs),
                ),
            );
        }

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
        let mut quotas = BTreeMap::new();
        for (resource, value) in desired {
            let field = match FlavorTranslationTable::flavor_of_resource(resource) {
                Some(flavor) => format!("instances_{}", self.translation.canonical_name(flavor)),
                None => resource.as_str().to_string(),
            };
            quotas.insert(field, *value);
        }
        self.backend()?
            .put_quota_set(ctx, &project.uuid, &quotas)
            .await
    }
}
