//! The cumulative-rate collector for the email service.
//!
//! The backend only reports usage within the current billing period, but the
//! rates exposed upstream are monotonic counters over the project's whole
//! lifetime. The collector therefore carries accumulated totals across
//! billing-period rollovers in an opaque state blob that the orchestrator
//! persists between scrapes.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use core_model::{
    AvailabilityZone, FlexibleUint, KeystoneProject, RateInfo, RateName, ResourceData,
    ResourceInfo, ResourceName, ServiceMetadata, ServiceType, Unit,
};
use core_plugin::{
    CollectorError, CollectorResult, ProviderClient, QuotaPlugin, QuotaScrapeResult,
    RateScrapeResult, ScrapeContext,
};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use tracing::debug;

const SERVICE: &str = "email-aws";

/// The billing-period start used before any period has been observed.
pub const SENTINEL_START_DATE: &str = "1970-01-01";

/// Usage within one billing period.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeriodUsage {
    pub totals: BTreeMap<String, u64>,
    /// First day of the billing period.
    pub start_date: String,
}

/// Read access to the email service's usage API.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailBackend: Send + Sync {
    async fn current_period_usage(
        &self,
        ctx: &ScrapeContext,
        project_id: &str,
    ) -> CollectorResult<PeriodUsage>;

    async fn previous_period_usage(
        &self,
        ctx: &ScrapeContext,
        project_id: &str,
    ) -> CollectorResult<PeriodUsage>;
}

#[derive(Deserialize)]
struct UsageDocument {
    #[serde(default)]
    totals: BTreeMap<String, FlexibleUint>,
    start_date: String,
}

/// HTTP implementation against the email service's usage API.
pub struct HttpEmailBackend {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpEmailBackend {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    async fn fetch_usage(
        &self,
        ctx: &ScrapeContext,
        project_id: &str,
        which: &str,
    ) -> CollectorResult<PeriodUsage> {
        let url = format!("{}/v1/usage/{}?period={}", self.base_url, project_id, which);
        let document: UsageDocument = ctx
            .round_trip(SERVICE, "get-usage", async {
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

        Ok(PeriodUsage {
            totals: document
                .totals
                .into_iter()
                .map(|(rate, value)| (rate, value.into()))
                .collect(),
            start_date: document.start_date,
        })
    }
}

#[async_trait]
impl EmailBackend for HttpEmailBackend {
    async fn current_period_usage(
        &self,
        ctx: &ScrapeContext,
        project_id: &str,
    ) -> CollectorResult<PeriodUsage> {
        self.fetch_usage(ctx, project_id, "current").await
    }

    async fn previous_period_usage(
        &self,
        ctx: &ScrapeContext,
        project_id: &str,
    ) -> CollectorResult<PeriodUsage> {
        self.fetch_usage(ctx, project_id, "previous").await
    }
}

/// The persisted rate state.
///
/// Serialized as plugin-private JSON. Unknown fields from older or newer
/// versions are ignored on read and never round-tripped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct RateState {
    #[serde(default)]
    previous_totals: BTreeMap<String, FlexibleUint>,
    #[serde(default)]
    current_period: PeriodMarker,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct PeriodMarker {
    start_date: String,
}

impl Default for PeriodMarker {
    fn default() -> Self {
        Self {
            start_date: SENTINEL_START_DATE.to_string(),
        }
    }
}

impl RateState {
    fn fresh(rates: &[String]) -> Self {
        Self {
            previous_totals: rates
                .iter()
                .map(|rate| (rate.clone(), FlexibleUint(0)))
                .collect(),
            current_period: PeriodMarker::default(),
        }
    }

    fn parse(serialized: Option<&str>, rates: &[String]) -> CollectorResult<Self> {
        match serialized {
            None | Some("") => Ok(Self::fresh(rates)),
            Some(serialized) => serde_json::from_str(serialized).map_err(|err| {
                CollectorError::InvariantViolated(format!("cannot decode rate state: {err}"))
            }),
        }
    }

    fn serialize(&self) -> CollectorResult<String> {
        serde_json::to_string(self).map_err(|err| {
            CollectorError::InvariantViolated(format!("cannot encode rate state: {err}"))
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EmailRatesParams {
    /// The rates the backend tracks, e.g. `recipients`.
    rates: Vec<String>,
}

/// Collects cumulative email rates across billing periods.
pub struct EmailRatesPlugin {
    rates: Vec<String>,
    backend: Option<Arc<dyn EmailBackend>>,
}

impl EmailRatesPlugin {
    pub const TYPE_ID: &'static str = "cronus";

    pub fn from_params(params: serde_json::Value) -> CollectorResult<Self> {
        let params: EmailRatesParams = core_config::parse_params(params)?;
        if params.rates.is_empty() {
            return Err(CollectorError::Misconfigured(
                "email rates: no rates configured".into(),
            ));
        }
        Ok(Self {
            rates: params.rates,
            backend: None,
        })
    }

    /// Test constructor wiring in a prepared backend.
    pub fn with_backend(mut self, backend: Arc<dyn EmailBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    fn backend(&self) -> CollectorResult<&dyn EmailBackend> {
        self.backend
            .as_deref()
            .ok_or_else(|| CollectorError::Misconfigured("rate plugin used before init".into()))
    }

    fn validate_date(date: &str) -> CollectorResult<()> {
        NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| {
            CollectorError::InvariantViolated(format!("unparseable billing-period date {date:?}"))
        })?;
        Ok(())
    }
}

#[async_trait]
impl QuotaPlugin for EmailRatesPlugin {
    async fn init(
        &mut self,
        _ctx: &ScrapeContext,
        provider: &ProviderClient,
        _service_type: ServiceType,
    ) -> CollectorResult<()> {
        if self.backend.is_none() {
            let endpoint = provider.endpoint(&ServiceType::from("email-aws"))?;
            self.backend = Some(Arc::new(HttpEmailBackend::new(endpoint, provider.token())));
        }
        Ok(())
    }

    fn plugin_type_id(&self) -> &'static str {
        Self::TYPE_ID
    }

    fn service_info(&self) -> ServiceMetadata {
        ServiceMetadata {
            product_name: "cronus".into(),
            area: "email".into(),
        }
    }

    fn resources(&self) -> BTreeMap<ResourceName, ResourceInfo> {
        BTreeMap::new()
    }

    fn rates(&self) -> BTreeMap<RateName, RateInfo> {
        self.rates
            .iter()
            .map(|rate| (RateName::from(rate.as_str()), RateInfo { unit: Unit::None }))
            .collect()
    }

    async fn scrape(
        &self,
        _ctx: &ScrapeContext,
        _project: &KeystoneProject,
        _all_azs: &[AvailabilityZone],
    ) -> CollectorResult<QuotaScrapeResult> {
        // This service tracks rates only.
        Ok(QuotaScrapeResult {
            resources: BTreeMap::<ResourceName, ResourceData>::new(),
            metrics: Default::default(),
        })
    }

    async fn set_quota(
        &self,
        _ctx: &ScrapeContext,
        _project: &KeystoneProject,
        desired: &BTreeMap<ResourceName, u64>,
    ) -> CollectorResult<()> {
        match desired.keys().next() {
            None => Ok(()),
            Some(resource) => Err(CollectorError::ForbiddenResource(resource.clone())),
        }
    }

    async fn scrape_rates(
        &self,
        ctx: &ScrapeContext,
        project: &KeystoneProject,
        _all_azs: &[AvailabilityZone],
        prev_state: Option<&str>,
    ) -> CollectorResult<RateScrapeResult> {
        let backend = self.backend()?;
        let mut state = RateState::parse(prev_state, &self.rates)?;

        let current = backend.current_period_usage(ctx, &project.uuid).await?;
        Self::validate_date(&current.start_date)?;

        if state.current_period.start_date == SENTINEL_START_DATE {
            // Fresh state: adopt the current period, nothing to carry over.
            state.current_period.start_date = current.start_date.clone();
        } else if state.current_period.start_date != current.start_date {
            // Billing-period rollover: fold the finished period's final tally
            // into the carried totals, exactly once.
            let previous = backend.previous_period_usage(ctx, &project.uuid).await?;
            if previous.start_date != SENTINEL_START_DATE
                && previous.start_date != state.current_period.start_date
            {
                return Err(CollectorError::InvariantViolated(format!(
                    "billing-period mismatch: carried period starts {}, previous period starts {}",
                    state.current_period.start_date, previous.start_date
                )));
            }
            debug!(
                project_id = %project.uuid,
                from = %state.current_period.start_date,
                to = %current.start_date,
                "billing period rolled over"
            );
            for (rate, amount) in &previous.totals {
                state
                    .previous_totals
                    .entry(rate.clone())
                    .or_insert(FlexibleUint(0))
                    .0 += *amount;
            }
            state.current_period.start_date = current.start_date.clone();
        }

        let rates = self
            .rates
            .iter()
            .map(|rate| {
                let carried = state
                    .previous_totals
                    .get(rate)
                    .copied()
                    .unwrap_or_default()
                    .0;
                let in_period = current.totals.get(rate).copied().unwrap_or_default();
                (
                    RateName::from(rate.as_str()),
                    BigUint::from(carried) + BigUint::from(in_period),
                )
            })
            .collect();

        Ok(RateScrapeResult {
            rates,
            state: state.serialize()?,
        })
    }
}
