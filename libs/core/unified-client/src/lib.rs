//! HTTP client for the unified backend-service v1 API.
//!
//! Newer backends expose one uniform surface instead of a service-specific
//! API: service info, cluster capacity, per-project usage, and a quota
//! write-back. Response bodies are decoded with strict unknown-field
//! rejection, so a backend that starts sending fields this client does not
//! know about fails loudly instead of being half-understood.

use core_model::{
    AvailabilityZone, ServiceCapacityReport, ServiceInfo, ServiceUsageReport,
};
use core_plugin::{CollectorError, CollectorResult, ScrapeContext};
use serde::Serialize;
use tracing::error;

/// Request body for the capacity and usage report endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ReportRequest {
    pub all_azs: Vec<AvailabilityZone>,
}

/// Request body for the quota write-back endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaRequest {
    pub resources: std::collections::BTreeMap<core_model::ResourceName, u64>,
}

/// Checks a report's info version against the version seen at init.
///
/// A drift means the backend changed its declared resources underneath us;
/// the only safe reaction is to have the process restart so the orchestrator
/// reloads the service info cleanly.
pub fn check_version(initial: u64, current: u64) -> CollectorResult<()> {
    if initial == current {
        Ok(())
    } else {
        Err(CollectorError::VersionDrift { initial, current })
    }
}

/// Client for one unified backend service.
pub struct UnifiedClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
    info: ServiceInfo,
}

impl UnifiedClient {
    /// Connects and fetches the initial [`ServiceInfo`].
    pub async fn connect(
        ctx: &ScrapeContext,
        base_url: impl Into<String>,
        token: impl Into<String>,
    ) -> CollectorResult<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let token = token.into();
        let client = reqwest::Client::new();

        let info = Self::fetch_info(ctx, &client, &base_url, &token).await?;
        info.check_resource_topologies()?;

        Ok(Self {
            client,
            base_url,
            token,
            info,
        })
    }

    /// The service info fetched at connect time.
    pub fn service_info(&self) -> &ServiceInfo {
        &self.info
    }

    async fn fetch_info(
        ctx: &ScrapeContext,
        client: &reqwest::Client,
        base_url: &str,
        token: &str,
    ) -> CollectorResult<ServiceInfo> {
        let url = format!("{base_url}/v1/info");
        ctx.round_trip("unified", "get-info", async {
            let body = client
                .get(&url)
                .header("X-Auth-Token", token)
                .send()
                .await?
                .error_for_status()?
                .text()
                .await?;
            let info: ServiceInfo = serde_json::from_str(&body)?;
            Ok(info)
        })
        .await
    }

    /// `POST /v1/report-capacity`
    pub async fn report_capacity(
        &self,
        ctx: &ScrapeContext,
        request: &ReportRequest,
    ) -> CollectorResult<ServiceCapacityReport> {
        let url = format!("{}/v1/report-capacity", self.base_url);
        let report: ServiceCapacityReport = ctx
            .round_trip("unified", "report-capacity", async {
                let body = self
                    .client
                    .post(&url)
                    .header("X-Auth-Token", &self.token)
                    .json(request)
                    .send()
                    .await?
                    .error_for_status()?
                    .text()
                    .await?;
                Ok(serde_json::from_str(&body)?)
            })
            .await?;

        self.enforce_version(report.info_version)?;
        Ok(report)
    }

    /// `POST /v1/projects/:uuid/report-usage`
    pub async fn report_usage(
        &self,
        ctx: &ScrapeContext,
        project_uuid: &str,
        request: &ReportRequest,
    ) -> CollectorResult<ServiceUsageReport> {
        let url = format!("{}/v1/projects/{}/report-usage", self.base_url, project_uuid);
        let report: ServiceUsageReport = ctx
            .round_trip("unified", "report-usage", async {
                let body = self
                    .client
                    .post(&url)
                    .header("X-Auth-Token", &self.token)
                    .json(request)
                    .send()
                    .await?
                    .error_for_status()?
                    .text()
                    .await?;
                Ok(serde_json::from_str(&body)?)
            })
            .await?;

        self.enforce_version(report.info_version)?;
        Ok(report)
    }

    /// `PUT /v1/projects/:uuid/quota`, expecting 204.
    pub async fn put_quota(
        &self,
        ctx: &ScrapeContext,
        project_uuid: &str,
        request: &QuotaRequest,
    ) -> CollectorResult<()> {
        let url = format!("{}/v1/projects/{}/quota", self.base_url, project_uuid);
        ctx.round_trip("unified", "put-quota", async {
            self.client
                .put(&url)
                .header("X-Auth-Token", &self.token)
                .json(request)
                .send()
                .await?
                .error_for_status()?;
            Ok(())
        })
        .await
    }

    /// Terminates the process on version drift.
    ///
    /// Returning the error instead would let the orchestrator keep feeding
    /// this scrape cycle with stale resource declarations; a deliberate exit
    /// makes it reload everything.
    fn enforce_version(&self, current: u64) -> CollectorResult<()> {
        if let Err(drift) = check_version(self.info.version, current) {
            error!(
                initial = self.info.version,
                current = current,
                service = %self.info.product_name,
                "unified backend changed its declared version mid-flight, restarting"
            );
            if cfg!(test) {
                return Err(drift);
            }
            std::process::exit(1);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_check_accepts_stable_versions() {
        assert!(check_version(3, 3).is_ok());
    }

    #[test]
    fn version_check_reports_drift() {
        match check_version(3, 4) {
            Err(CollectorError::VersionDrift { initial, current }) => {
                assert_eq!((initial, current), (3, 4));
            }
            other => panic!("expected drift, got {other:?}"),
        }
    }

    #[test]
    fn service_info_decoding_is_strict() {
        let body = serde_json::json!({
            "product_name": "unified-thing",
            "area": "storage",
            "resources": {},
            "rates": {},
            "version": 1,
            "extra": true,
        });
        let result: Result<ServiceInfo, _> = serde_json::from_value(body);
        assert!(result.is_err());
    }
}
