//! The endpoint-services quota collector.
//!
//! The backend tracks two flat resources per project: injected service
//! endpoints and published services.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use core_model::{
    AvailabilityZone, FlexibleInt, FlexibleUint, KeystoneProject, PerAz, ResourceData,
    ResourceInfo, ResourceName, ServiceMetadata, ServiceType, Topology, Unit, UsageData,
};
use core_plugin::{
    CollectorError, CollectorResult, ProviderClient, QuotaPlugin, QuotaScrapeResult, ScrapeContext,
};
use serde::{Deserialize, Serialize};

const SERVICE: &str = "endpoint-services";

/// The quota document of one project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EndpointQuota {
    pub endpoint: i64,
    pub service: i64,
    pub in_use_endpoint: u64,
    pub in_use_service: u64,
}

/// Read/write access to the endpoint-services quota API.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EndpointServicesBackend: Send + Sync {
    async fn get_quota(
        &self,
        ctx: &ScrapeContext,
        project_id: &str,
    ) -> CollectorResult<EndpointQuota>;

    async fn put_quota(
        &self,
        ctx: &ScrapeContext,
        project_id: &str,
        endpoint: u64,
        service: u64,
    ) -> CollectorResult<()>;
}

#[derive(Deserialize)]
struct QuotaDocument {
    endpoint: FlexibleInt,
    service: FlexibleInt,
    #[serde(default)]
    in_use_endpoint: FlexibleUint,
    #[serde(default)]
    in_use_service: FlexibleUint,
}

#[derive(Serialize)]
struct QuotaUpdateDocument {
    endpoint: u64,
    service: u64,
}

/// HTTP implementation against the endpoint-services API.
pub struct HttpEndpointServicesBackend {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpEndpointServicesBackend {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }
}

#[async_trait]
impl EndpointServicesBackend for HttpEndpointServicesBackend {
    async fn get_quota(
        &self,
        ctx: &ScrapeContext,
        project_id: &str,
    ) -> CollectorResult<EndpointQuota> {
        let url = format!("{}/quotas/{}", self.base_url, project_id);
        let document: QuotaDocument = ctx
            .round_trip(SERVICE, "get-quota", async {
                Ok(self
                    .client
                    .get(&url)
                    .header("X-Auth-Token", &self.token)
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await?)
            })
            .await?;

        Ok(EndpointQuota {
            endpoint: document.endpoint.into(),
            service: document.service.into(),
            in_use_endpoint: document.in_use_endpoint.into(),
            in_use_service: document.in_use_service.into(),
        })
    }

    async fn put_quota(
        &self,
        ctx: &ScrapeContext,
        project_id: &str,
        endpoint: u64,
        service: u64,
    ) -> CollectorResult<()> {
        let url = format!("{}/quotas/{}", self.base_url, project_id);
        let body = QuotaUpdateDocument { endpoint, service };
        ctx.round_trip(SERVICE, "put-quota", async {
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
}

/// Collects endpoint and service counts.
pub struct EndpointServicesQuotaPlugin {
    backend: Option<Arc<dyn EndpointServicesBackend>>,
}

impl EndpointServicesQuotaPlugin {
    pub const TYPE_ID: &'static str = "archer";

    pub fn from_params(params: serde_json::Value) -> CollectorResult<Self> {
        #[derive(Deserialize, Default)]
        #[serde(deny_unknown_fields)]
        struct EndpointServicesQuotaParams {}

        let _: EndpointServicesQuotaParams = core_config::parse_params(params)?;
        Ok(Self { backend: None })
    }

    /// Test constructor wiring in a prepared backend.
    pub fn with_backend(mut self, backend: Arc<dyn EndpointServicesBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    fn backend(&self) -> CollectorResult<&dyn EndpointServicesBackend> {
        self.backend
            .as_deref()
            .ok_or_else(|| CollectorError::Misconfigured("quota plugin used before init".into()))
    }
}

#[async_trait]
impl QuotaPlugin for EndpointServicesQuotaPlugin {
    async fn init(
        &mut self,
        _ctx: &ScrapeContext,
        provider: &ProviderClient,
        _service_type: ServiceType,
    ) -> CollectorResult<()> {
        if self.backend.is_none() {
            let endpoint = provider.endpoint(&ServiceType::from("endpoint-services"))?;
            self.backend = Some(Arc::new(HttpEndpointServicesBackend::new(
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
            product_name: "archer".into(),
            area: "network".into(),
        }
    }

    fn resources(&self) -> BTreeMap<ResourceName, ResourceInfo> {
        BTreeMap::from([
            (
                ResourceName::from("endpoints"),
                ResourceInfo::new(Unit::None, Topology::Flat),
            ),
            (
                ResourceName::from("services"),
                ResourceInfo::new(Unit::None, Topology::Flat),
            ),
        ])
    }

    async fn scrape(
        &self,
        ctx: &ScrapeContext,
        project: &KeystoneProject,
        _all_azs: &[AvailabilityZone],
    ) -> CollectorResult<QuotaScrapeResult> {
        let quota = self.backend()?.get_quota(ctx, &project.uuid).await?;

        Ok(QuotaScrapeResult {
            resources: BTreeMap::from([
                (
                    ResourceName::from("endpoints"),
                    ResourceData::new(
                        quota.endpoint,
                        PerAz::flat(UsageData::new(quota.in_use_endpoint)),
                    ),
                ),
                (
                    ResourceName::from("services"),
                    ResourceData::new(
                        quota.service,
                        PerAz::flat(UsageData::new(quota.in_use_service)),
                    ),
                ),
            ]),
            metrics: Default::default(),
        })
    }

    async fn set_quota(
        &self,
        ctx: &ScrapeContext,
        project: &KeystoneProject,
        desired: &BTreeMap<ResourceName, u64>,
    ) -> CollectorResult<()> {
        let value = |name: &str| desired.get(name).copied().unwrap_or_default();
        self.backend()?
            .put_quota(ctx, &project.uuid, value("endpoints"), value("services"))
            .await
    }
}
