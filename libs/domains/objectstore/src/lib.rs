//! The object-store quota collector.
//!
//! Account quota and usage travel in response headers rather than a JSON
//! body. Accounts are created lazily: the first non-zero quota write brings
//! the account into existence.

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
use tracing::debug;

const SERVICE: &str = "object-store";

/// Quota header on the account response.
pub const QUOTA_HEADER: &str = "X-Account-Bytes-Used-Quota";
/// Usage header on the account response.
pub const USAGE_HEADER: &str = "X-Account-Bytes-Used";

/// The account state read from response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccountState {
    pub bytes_used: u64,
    pub quota_bytes: Option<u64>,
}

/// Read/write access to the object-store account.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStoreBackend: Send + Sync {
    /// `None` when the account has not been created yet.
    async fn account_state(
        &self,
        ctx: &ScrapeContext,
        project_id: &str,
    ) -> CollectorResult<Option<AccountState>>;

    /// Writes the quota header; `create` additionally provisions the
    /// account.
    async fn put_account_quota(
        &self,
        ctx: &ScrapeContext,
        project_id: &str,
        quota_bytes: u64,
        create: bool,
    ) -> CollectorResult<()>;
}

/// HTTP implementation against the object-store API.
pub struct HttpObjectStoreBackend {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpObjectStoreBackend {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn account_url(&self, project_id: &str) -> String {
        format!("{}/v1/AUTH_{}", self.base_url, project_id)
    }
}

#[async_trait]
impl ObjectStoreBackend for HttpObjectStoreBackend {
    async fn account_state(
        &self,
        ctx: &ScrapeContext,
        project_id: &str,
    ) -> CollectorResult<Option<AccountState>> {
        let url = self.account_url(project_id);
        ctx.round_trip(SERVICE, "head-account", async {
            let response = self
                .client
                .head(&url)
                .header("X-Auth-Token", &self.token)
                .send()
                .await?;
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Ok(None);
            }
            let response = response.error_for_status()?;

            let header_value = |name: &str| {
                response
                    .headers()
                    .get(name)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.parse::<u64>().ok())
            };
            Ok(Some(AccountState {
                bytes_used: header_value(USAGE_HEADER).unwrap_or_default(),
                quota_bytes: header_value(QUOTA_HEADER),
            }))
        })
        .await
    }

    async fn put_account_quota(
        &self,
        ctx: &ScrapeContext,
        project_id: &str,
        quota_bytes: u64,
        create: bool,
    ) -> CollectorResult<()> {
        let url = self.account_url(project_id);
        ctx.round_trip(SERVICE, "put-account", async {
            let request = if create {
                // PUT creates the account as a side effect.
                self.client.put(&url)
            } else {
                self.client.post(&url)
            };
            request
                .header("X-Auth-Token", &self.token)
                .header(QUOTA_HEADER, quota_bytes)
                .send()
                .await?
                .error_for_status()?;
            Ok(())
        })
        .await
    }
}

/// Collects object-store account capacity.
pub struct ObjectStoreQuotaPlugin {
    backend: Option<Arc<dyn ObjectStoreBackend>>,
}

impl ObjectStoreQuotaPlugin {
    pub const TYPE_ID: &'static str = "swift";

    pub fn from_params(params: serde_json::Value) -> CollectorResult<Self> {
        #[derive(serde::Deserialize, Default)]
        #[serde(deny_unknown_fields)]
        struct ObjectStoreQuotaParams {}

        let _: ObjectStoreQuotaParams = core_config::parse_params(params)?;
        Ok(Self { backend: None })
    }

    /// Test constructor wiring in a prepared backend.
    pub fn with_backend(mut self, backend: Arc<dyn ObjectStoreBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    fn backend(&self) -> CollectorResult<&dyn ObjectStoreBackend> {
        self.backend
            .as_deref()
            .ok_or_else(|| CollectorError::Misconfigured("quota plugin used before init".into()))
    }
}

#[async_trait]
impl QuotaPlugin for ObjectStoreQuotaPlugin {
    async fn init(
        &mut self,
        _ctx: &ScrapeContext,
        provider: &ProviderClient,
        _service_type: ServiceType,
    ) -> CollectorResult<()> {
        if self.backend.is_none() {
            let endpoint = provider.endpoint(&ServiceType::from("object-store"))?;
            self.backend = Some(Arc::new(HttpObjectStoreBackend::new(
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
            product_name: "swift".into(),
            area: "storage".into(),
        }
    }

    fn resources(&self) -> BTreeMap<ResourceName, ResourceInfo> {
        BTreeMap::from([(
            ResourceName::from("capacity"),
            ResourceInfo::new(Unit::Bytes, Topology::Flat),
        )])
    }

    async fn scrape(
        &self,
        ctx: &ScrapeContext,
        project: &KeystoneProject,
        _all_azs: &[AvailabilityZone],
    ) -> CollectorResult<QuotaScrapeResult> {
        let state = self.backend()?.account_state(ctx, &project.uuid).await?;

        let (quota, usage) = match state {
            Some(state) => (
                state
                    .quota_bytes
                    .map(|quota| quota as i64)
                    .unwrap_or(ResourceData::UNLIMITED),
                state.bytes_used,
            ),
            None => {
                debug!(project_id = %project.uuid, "account does not exist yet");
                (ResourceData::UNLIMITED, 0)
            }
        };

        Ok(QuotaScrapeResult {
            resources: BTreeMap::from([(
                ResourceName::from("capacity"),
                ResourceData::new(quota, PerAz::flat(UsageData::new(usage))),
            )]),
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
        let quota = desired
            .get("capacity")
            .copied()
            .ok_or_else(|| CollectorError::Misconfigured("no capacity quota requested".into()))?;

        let exists = backend.account_state(ctx, &project.uuid).await?.is_some();
        if !exists && quota == 0 {
            // No point in provisioning an account just to give it nothing.
            return Ok(());
        }
        backend
            .put_account_quota(ctx, &project.uuid, quota, !exists)
            .await
    }
}
