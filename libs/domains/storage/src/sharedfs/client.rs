//! The shared-filesystem backend contract and its HTTP implementation.

use std::collections::BTreeMap;

use async_trait::async_trait;
use core_model::{AvailabilityZone, FlexibleInt, FlexibleUint};
use core_plugin::{CollectorResult, ScrapeContext};
use serde::{Deserialize, Serialize};

const SERVICE: &str = "sharev2";

/// One quota field: granted limit and current consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QuotaField {
    pub limit: i64,
    pub in_use: u64,
}

/// The quota set for one project, optionally scoped to one share type.
#[derive(Debug, Clone, Default)]
pub struct SharedFsQuotaSet {
    pub gigabytes: QuotaField,
    pub shares: QuotaField,
    pub snapshot_gigabytes: QuotaField,
    pub snapshots: QuotaField,
    pub share_replicas: QuotaField,
    pub replica_gigabytes: QuotaField,
    pub share_networks: QuotaField,
}

/// The quota write-back document. Replica fields are omitted unless at least
/// one share type has replication enabled, because older backends reject
/// them.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SharedFsQuotaUpdate {
    pub gigabytes: u64,
    pub shares: u64,
    pub snapshot_gigabytes: u64,
    pub snapshots: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub share_replicas: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replica_gigabytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub share_networks: Option<u64>,
}

/// Per-AZ usage of one project within one share type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShareUsage {
    pub shares: u64,
    pub gigabytes: u64,
    pub snapshots: u64,
    pub snapshot_gigabytes: u64,
}

/// One storage pool from the scheduler-stats API.
#[derive(Debug, Clone)]
pub struct SharePool {
    pub name: String,
    /// `compute-host@backend` as reported by the scheduler.
    pub host: String,
    pub hardware_state: String,
    pub total_capacity_gb: u64,
    pub allocated_capacity_gb: u64,
}

/// Read/write access to the shared-filesystem service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SharedFsBackend: Send + Sync {
    async fn get_quota_set<'a>(
        &self,
        ctx: &ScrapeContext,
        project_id: &str,
        share_type: Option<&'a str>,
    ) -> CollectorResult<SharedFsQuotaSet>;

    async fn put_quota_set<'a>(
        &self,
        ctx: &ScrapeContext,
        project_id: &str,
        share_type: Option<&'a str>,
        update: &SharedFsQuotaUpdate,
    ) -> CollectorResult<()>;

    /// Usage of one project in one share type, grouped by AZ.
    async fn usage_by_az(
        &self,
        ctx: &ScrapeContext,
        project_id: &str,
        share_type: &str,
    ) -> CollectorResult<BTreeMap<AvailabilityZone, ShareUsage>>;

    /// Pools serving one share type.
    async fn pools(&self, ctx: &ScrapeContext, share_type: &str)
        -> CollectorResult<Vec<SharePool>>;

    /// Share-service host to AZ, derived from the service listing.
    async fn host_azs(
        &self,
        ctx: &ScrapeContext,
    ) -> CollectorResult<BTreeMap<String, AvailabilityZone>>;
}

#[derive(Deserialize)]
struct QuotaSetDocument {
    quota_set: QuotaSetFields,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct QuotaSetFields {
    gigabytes: FieldDocument,
    shares: FieldDocument,
    snapshot_gigabytes: FieldDocument,
    snapshots: FieldDocument,
    share_replicas: FieldDocument,
    replica_gigabytes: FieldDocument,
    share_networks: FieldDocument,
}

#[derive(Deserialize, Default)]
struct FieldDocument {
    #[serde(default)]
    limit: FlexibleInt,
    #[serde(default)]
    in_use: FlexibleUint,
}

impl From<FieldDocument> for QuotaField {
    fn from(field: FieldDocument) -> Self {
        Self {
            limit: field.limit.into(),
            in_use: field.in_use.into(),
        }
    }
}

#[derive(Serialize)]
struct QuotaUpdateDocument<'a> {
    quota_set: &'a SharedFsQuotaUpdate,
}

#[derive(Deserialize)]
struct PoolListDocument {
    pools: Vec<PoolDocument>,
}

#[derive(Deserialize)]
struct PoolDocument {
    name: String,
    host: String,
    capabilities: PoolCapabilities,
}

#[derive(Deserialize)]
struct PoolCapabilities {
    #[serde(default)]
    hardware_state: String,
    #[serde(default)]
    total_capacity_gb: f64,
    #[serde(default)]
    allocated_capacity_gb: f64,
}

/// HTTP implementation against the shared-filesystem API.
pub struct HttpSharedFsBackend {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpSharedFsBackend {
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
impl SharedFsBackend for HttpSharedFsBackend {
    async fn get_quota_set<'a>(
        &self,
        ctx: &ScrapeContext,
        project_id: &str,
        share_type: Option<&'a str>,
    ) -> CollectorResult<SharedFsQuotaSet> {
        let mut url = format!("{}/quota-sets/{}/detail", self.base_url, project_id);
        if let Some(share_type) = share_type {
            url = format!("{url}?share_type={share_type}");
        }
        let document: QuotaSetDocument = ctx
            .round_trip(SERVICE, "get-quota-set", self.get_json(&url))
            .await?;

        let fields = document.quota_set;
        Ok(SharedFsQuotaSet {
            gigabytes: fields.gigabytes.into(),
            shares: fields.shares.into(),
            snapshot_gigabytes: fields.snapshot_gigabytes.into(),
            snapshots: fields.snapshots.into(),
            share_replicas: fields.share_replicas.into(),
            replica_gigabytes: fields.replica_gigabytes.into(),
            share_networks: fields.share_networks.into(),
        })
    }

    async fn put_quota_set<'a>(
        &self,
        ctx: &ScrapeContext,
        project_id: &str,
        share_type: Option<&'a str>,
        update: &SharedFsQuotaUpdate,
    ) -> CollectorResult<()> {
        let mut url = format!("{}/quota-sets/{}", self.base_url, project_id);
        if let Some(share_type) = share_type {
            url = format!("{url}?share_type={share_type}");
        }
        let body = QuotaUpdateDocument { quota_set: update };
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
        share_type: &str,
    ) -> CollectorResult<BTreeMap<AvailabilityZone, ShareUsage>> {
        #[derive(Deserialize)]
        struct ShareListDocument {
            shares: Vec<ShareDocument>,
        }

        #[derive(Deserialize)]
        struct ShareDocument {
            availability_zone: Option<String>,
            size: u64,
        }

        let url = format!(
            "{}/shares/detail?project_id={}&share_type={}&all_tenants=1",
            self.base_url, project_id, share_type
        );
        let document: ShareListDocument = ctx
            .round_trip(SERVICE, "list-shares", self.get_json(&url))
            .await?;

        let mut by_az: BTreeMap<AvailabilityZone, ShareUsage> = BTreeMap::new();
        for share in document.shares {
            let zone = share
                .availability_zone
                .map(AvailabilityZone::from)
                .unwrap_or_else(AvailabilityZone::unknown);
            let entry = by_az.entry(zone).or_default();
            entry.shares += 1;
            entry.gigabytes += share.size;
        }
        Ok(by_az)
    }

    async fn pools(
        &self,
        ctx: &ScrapeContext,
        share_type: &str,
    ) -> CollectorResult<Vec<SharePool>> {
        let url = format!(
            "{}/scheduler-stats/pools/detail?share_type={}",
            self.base_url, share_type
        );
        let document: PoolListDocument = ctx
            .round_trip(SERVICE, "list-pools", self.get_json(&url))
            .await?;

        Ok(document
            .pools
            .into_iter()
            .map(|pool| SharePool {
                name: pool.name,
                host: pool.host,
                hardware_state: pool.capabilities.hardware_state,
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

        let url = format!("{}/services", self.base_url);
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_set_document_tolerates_missing_and_flexible_fields() {
        let body = serde_json::json!({
            "quota_set": {
                "gigabytes": {"limit": "1000", "in_use": 250},
                "shares": {"limit": -1, "in_use": 3},
                "share_replicas": {"limit": 10},
            },
        });
        let document: QuotaSetDocument = serde_json::from_value(body).unwrap();
        assert_eq!(i64::from(document.quota_set.gigabytes.limit), 1000);
        assert_eq!(i64::from(document.quota_set.shares.limit), -1);
        assert_eq!(u64::from(document.quota_set.share_replicas.in_use), 0);
        assert_eq!(i64::from(document.quota_set.snapshots.limit), 0);
    }

    #[test]
    fn quota_update_omits_replica_fields_by_default() {
        let update = SharedFsQuotaUpdate {
            gigabytes: 100,
            shares: 10,
            snapshot_gigabytes: 50,
            snapshots: 5,
            ..Default::default()
        };
        let json = serde_json::to_value(&update).unwrap();
        assert!(json.get("share_replicas").is_none());
        assert!(json.get("replica_gigabytes").is_none());
    }
}
