//! The block-storage backend contract and its HTTP implementation.

use std::collections::BTreeMap;

use async_trait::async_trait;
use core_model::{AvailabilityZone, FlexibleInt, FlexibleUint};
use core_plugin::{CollectorResult, ScrapeContext};
use serde::{Deserialize, Serialize};

const SERVICE: &str = "volumev3";

/// One quota field: granted limit and current consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QuotaField {
    pub limit: i64,
    pub in_use: u64,
}

/// Per-AZ usage of one project within one volume type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeUsage {
    pub volumes: u64,
    pub gigabytes: u64,
    pub snapshots: u64,
}

/// One storage pool from the scheduler-stats API.
#[derive(Debug, Clone)]
pub struct VolumePool {
    pub name: String,
    pub volume_type: String,
    pub state: String,
    pub total_capacity_gb: u64,
    pub allocated_capacity_gb: u64,
}

/// Read/write access to the block-storage service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlockStorageBackend: Send + Sync {
    /// The raw quota set, keyed by backend field name
    /// (`gigabytes_<type>`, `snapshots_<type>`, `volumes_<type>`).
    async fn get_quota_set(
        &self,
        ctx: &ScrapeContext,
        project_id: &str,
    ) -> CollectorResult<BTreeMap<String, QuotaField>>;

    async fn put_quota_set(
        &self,
        ctx: &ScrapeContext,
        project_id: &str,
        quotas: &BTreeMap<String, u64>,
    ) -> CollectorResult<()>;

    async fn usage_by_az(
        &self,
        ctx: &ScrapeContext,
        project_id: &str,
        volume_type: &str,
    ) -> CollectorResult<BTreeMap<AvailabilityZone, VolumeUsage>>;

    async fn pools(&self, ctx: &ScrapeContext) -> CollectorResult<Vec<VolumePool>>;

    /// Volume-service host to AZ, for substring-matching pool names.
    async fn host_azs(
        &self,
        ctx: &ScrapeContext,
    ) -> CollectorResult<BTreeMap<String, AvailabilityZone>>;
}

#[derive(Deserialize)]
struct QuotaSetDocument {
    quota_set: BTreeMap<String, serde_json::Value>,
}

#[derive(Deserialize, Default)]
struct FieldDocument {
    #[serde(default)]
    limit: FlexibleInt,
    #[serde(default)]
    in_use: FlexibleUint,
}

#[derive(Serialize)]
struct QuotaUpdateDocument<'a> {
    quota_set: &'a BTreeMap<String, u64>,
}

#[derive(Deserialize)]
struct PoolListDocument {
    pools: Vec<PoolDocument>,
}

#[derive(Deserialize)]
struct PoolDocument {
    name: String,
    capabilities: PoolCapabilities,
}

#[derive(Deserialize)]
struct PoolCapabilities {
    #[serde(default)]
    volume_backend_name: String,
    #[serde(default)]
    pool_state: String,
    #[serde(default)]
    total_capacity_gb: f64,
    #[serde(default)]
    allocated_capacity_gb: f64,
}

/// HTTP implementation against the block-storage API.
pub struct HttpBlockStorageBackend {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpBlockStorageBackend {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
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
}

#[async_trait]
impl BlockStorageBackend for HttpBlockStorageBackend {
    async fn get_quota_set(
        &self,
        ctx: &ScrapeContext,
        project_id: &str,
    ) -> CollectorResult<BTreeMap<String, QuotaField>> {
        let url = format!("{}/os-quota-sets/{}?usage=true", self.base_url, project_id);
        let document: QuotaSetDocument = ctx
            .round_trip(SERVICE, "get-quota-set", self.get_json(&url))
            .await?;

        let mut fields = BTreeMap::new();
        for (name, value) in document.quota_set {
            // Scalar entries like "id" are not quota fields.
            let Ok(field) = serde_json::from_value::<FieldDocument>(value) else {
                continue;
            };
            fields.insert(
                name,
                QuotaField {
                    limit: field.limit.into(),
                    in_use: field.in_use.into(),
                },
            );
        }
        Ok(fields)
    }

    async fn put_quota_set(
        &self,
        ctx: &ScrapeContext,
        project_id: &str,
        quotas: &BTreeMap<String, u64>,
    ) -> CollectorResult<()> {
        let url = format!("{}/os-quota-sets/{}", self.base_url, project_id);
        let body = QuotaUpdateDocument { quota_set: quotas };
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

    async fn usage_by_az(
        &self,
        ctx: &ScrapeContext,
        project_id: &str,
        volume_type: &str,
    ) -> CollectorResult<BTreeMap<AvailabilityZone, VolumeUsage>> {
        #[derive(Deserialize)]
        struct VolumeListDocument {
            volumes: Vec<VolumeDocument>,
        }

        #[derive(Deserialize)]
        struct VolumeDocument {
            availability_zone: Option<String>,
            size: u64,
        }

        let url = format!(
            "{}/volumes/detail?project_id={}&volume_type={}&all_tenants=1",
            self.base_url, project_id, volume_type
        );
        let document: VolumeListDocument = ctx
            .round_trip(SERVICE, "list-volumes", self.get_json(&url))
            .await?;

        let mut by_az: BTreeMap<AvailabilityZone, VolumeUsage> = BTreeMap::new();
        for volume in document.volumes {
            let zone = volume
                .availability_zone
                .map(AvailabilityZone::from)
                .unwrap_or_else(AvailabilityZone::unknown);
            let entry = by_az.entry(zone).or_default();
            entry.volumes += 1;
            entry.gigabytes += volume.size;
        }
        Ok(by_az)
    }

    async fn pools(&self, ctx: &ScrapeContext) -> CollectorResult<Vec<VolumePool>> {
        let url = format!("{}/scheduler-stats/get_pools?detail=true", self.base_url);
        let document: PoolListDocument = ctx
            .round_trip(SERVICE, "list-pools", self.get_json(&url))
            .await?;

        Ok(document
            .pools
            .into_iter()
            .map(|pool| VolumePool {
                name: pool.name,
                volume_type: pool.capabilities.volume_backend_name,
                state: pool.capabilities.pool_state,
                total_capacity_gb: pool.capabilities.total_capacity_gb as u64,
                allocated_capacity_gb: pool.capabilities.allocated_capacity_gb as u64,
            })
            .collect())
    }

    async fn host_azs(
        &self,
        ctx: &ScrapeContext,
    ) -> CollectorResult<BTreeMap<String, AvailabilityZone>> {
        #[derive(Deserialize)]
        struct ServiceListDocument {
            services: Vec<ServiceDocument>,
        }

        #[derive(Deserialize)]
        struct ServiceDocument {
            host: String,
            zone: Option<String>,
        }

        let url = format!("{}/os-services", self.base_url);
        let document: ServiceListDocument = ctx
            .round_trip(SERVICE, "list-services", self.get_json(&url))
            .await?;

        Ok(document
            .services
            .into_iter()
            .filter_map(|service| {
                service
                    .zone
                    .map(|zone| (service.host, AvailabilityZone::from(zone)))
            })
            .collect())
    }
}
