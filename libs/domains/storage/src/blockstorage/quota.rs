//! The per-project quota/usage collector for the block-storage service.

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
use serde::Deserialize;

use super::client::{BlockStorageBackend, HttpBlockStorageBackend, VolumeUsage};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BlockStorageQuotaParams {
    volume_types: Vec<String>,
}

/// Collects volume/snapshot counts and capacity per volume type.
pub struct BlockStorageQuotaPlugin {
    volume_types: Vec<String>,
    backend: Option<Arc<dyn BlockStorageBackend>>,
}

impl BlockStorageQuotaPlugin {
    pub const TYPE_ID: &'static str = "cinder";

    pub fn from_params(params: serde_json::Value) -> CollectorResult<Self> {
        let params: BlockStorageQuotaParams = core_config::parse_params(params)?;
        if params.volume_types.is_empty() {
            return Err(CollectorError::Misconfigured(
                "block-storage quota: no volume types configured".into(),
            ));
        }
        Ok(Self {
            volume_types: params.volume_types,
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
            .ok_or_else(|| CollectorError::Misconfigured("quota plugin used before init".into()))
    }

    fn suffix(&self, index: usize) -> String {
        if index == 0 {
            String::new()
        } else {
            format!("_{}", self.volume_types[index])
        }
    }

    fn usage_per_az(
        usage: &BTreeMap<AvailabilityZone, VolumeUsage>,
        all_azs: &[AvailabilityZone],
        value: impl Fn(&VolumeUsage) -> u64,
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
impl QuotaPlugin for BlockStorageQuotaPlugin {
    async fn init(
        &mut self,
        _ctx: &ScrapeContext,
        provider: &ProviderClient,
        _service_type: ServiceType,
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

    fn service_info(&self) -> ServiceMetadata {
        ServiceMetadata {
            product_name: "cinder".into(),
            area: "storage".into(),
        }
    }

    fn resources(&self) -> BTreeMap<ResourceName, ResourceInfo> {
        let mut resources = BTreeMap::new();
        for index in 0..self.volume_types.len() {
            let suffix = self.suffix(index);
            resources.insert(
                ResourceName::from(format!("capacity{suffix}")),
                ResourceInfo::new(Unit::GibiBytes, Topology::AzAware),
            );
            resources.insert(
                ResourceName::from(format!("snapshots{suffix}")),
                ResourceInfo::new(Unit::None, Topology::AzAware),
            );
            resources.insert(
                ResourceName::from(format!("volumes{suffix}")),
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
        let field = |name: &str| quota_set.get(name).copied().unwrap_or_default();

        let mut resources = BTreeMap::new();
        for (index, volume_type) in self.volume_types.iter().enumerate() {
            let suffix = self.suffix(index);
            let usage = backend
                .usage_by_az(ctx, &project.uuid, volume_type)
                .await?;

            resources.insert(
                ResourceName::from(format!("capacity{suffix}")),
                ResourceData::new(
                    field(&format!("gigabytes_{volume_type}")).limit,
                    Self::usage_per_az(&usage, all_azs, |entry| entry.gigabytes),
                ),
            );
            resources.insert(
                ResourceName::from(format!("snapshots{suffix}")),
                ResourceData::new(
                    field(&format!("snapshots_{volume_type}")).limit,
                    Self::usage_per_az(&usage, all_azs, |entry| entry.snapshots),
                ),
            );
            resources.insert(
                ResourceName::from(format!("volumes{suffix}")),
                ResourceData::new(
                    field(&format!("volumes_{volume_type}")).limit,
                    Self::usage_per_az(&usage, all_azs, |entry| entry.volumes),
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
        let value = |resource: String| desired.get(resource.as_str()).copied().unwrap_or_default();

        let mut quotas = BTreeMap::new();
        for (index, volume_type) in self.volume_types.iter().enumerate() {
            let suffix = self.suffix(index);
            quotas.insert(
                format!("gigabytes_{volume_type}"),
                value(format!("capacity{suffix}")),
            );
            quotas.insert(
                format!("snapshots_{volume_type}"),
                value(format!("snapshots{suffix}")),
            );
            quotas.insert(
                format!("volumes_{volume_type}"),
                value(format!("volumes{suffix}")),
            );
        }
        self.backend()?
            .put_quota_set(ctx, &project.uuid, &quotas)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::super::client::{MockBlockStorageBackend, QuotaField};
    use super::*;
    use core_model::KeystoneDomain;

    fn project() -> KeystoneProject {
        KeystoneProject::new(
            "p1",
            "demo",
            KeystoneDomain {
                uuid: "d1".into(),
                name: "default".into(),
            },
        )
    }

    fn azs() -> Vec<AvailabilityZone> {
        vec![
            AvailabilityZone::from("az-1"),
            AvailabilityZone::from("az-2"),
        ]
    }

    #[tokio::test]
    async fn scrape_reads_per_type_quota_fields() {
        let mut backend = MockBlockStorageBackend::new();
        backend.expect_get_quota_set().returning(|_, _| {
            Ok(BTreeMap::from([
                (
                    "gigabytes_standard".to_string(),
                    QuotaField {
                        limit: 1000,
                        in_use: 120,
                    },
                ),
                (
                    "volumes_standard".to_string(),
                    QuotaField { limit: 20, in_use: 3 },
                ),
                (
                    "snapshots_standard".to_string(),
                    QuotaField { limit: 50, in_use: 7 },
                ),
            ]))
        });
        backend.expect_usage_by_az().returning(|_, _, _| {
            Ok(BTreeMap::from([(
                AvailabilityZone::from("az-1"),
                VolumeUsage {
                    volumes: 3,
                    gigabytes: 120,
                    snapshots: 7,
                },
            )]))
        });

        let plugin = BlockStorageQuotaPlugin::from_params(
            serde_json::json!({"volume_types": ["standard"]}),
        )
        .unwrap()
        .with_backend(Arc::new(backend));

        let result = plugin
            .scrape(&ScrapeContext::new(), &project(), &azs())
            .await
            .unwrap();

        let capacity = &result.resources[&ResourceName::from("capacity")];
        assert_eq!(capacity.quota, 1000);
        assert_eq!(
            capacity.per_az.get(&AvailabilityZone::from("az-1")).unwrap().usage,
            120
        );
        assert_eq!(
            capacity.per_az.get(&AvailabilityZone::from("az-2")).unwrap().usage,
            0
        );
        assert_eq!(result.resources[&ResourceName::from("volumes")].quota, 20);
        assert_eq!(result.resources[&ResourceName::from("snapshots")].quota, 50);
    }

    #[tokio::test]
    async fn set_quota_writes_per_type_fields() {
        let mut backend = MockBlockStorageBackend::new();
        backend
            .expect_put_quota_set()
            .withf(|_, project_id, quotas| {
                project_id == "p1"
                    && quotas.get("gigabytes_standard") == Some(&500)
                    && quotas.get("volumes_standard") == Some(&10)
                    && quotas.get("snapshots_standard") == Some(&0)
            })
            .returning(|_, _, _| Ok(()));

        let plugin = BlockStorageQuotaPlugin::from_params(
            serde_json::json!({"volume_types": ["standard"]}),
        )
        .unwrap()
        .with_backend(Arc::new(backend));

        let desired = BTreeMap::from([
            (ResourceName::from("capacity"), 500u64),
            (ResourceName::from("volumes"), 10u64),
        ]);
        plugin
            .set_quota(&ScrapeContext::new(), &project(), &desired)
            .await
            .unwrap();
    }
}
