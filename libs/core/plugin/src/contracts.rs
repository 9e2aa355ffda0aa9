//! The quota, capacity, and discovery plugin contracts.

use std::collections::BTreeMap;

use async_trait::async_trait;
use core_model::{
    AvailabilityZone, ClusterCapacityReport, DemandByAz, KeystoneDomain, KeystoneProject, RateInfo,
    RateName, ResourceData, ResourceInfo, ResourceName, ServiceMetadata, ServiceType,
};
use num_bigint::BigUint;
use observability::{SerializedMetrics, SerializedMetricsError};

use crate::context::ScrapeContext;
use crate::error::CollectorResult;
use crate::provider::ProviderClient;

/// Result of one per-project quota/usage scrape.
#[derive(Debug, Clone, Default)]
pub struct QuotaScrapeResult {
    pub resources: BTreeMap<ResourceName, ResourceData>,
    pub metrics: SerializedMetrics,
}

/// Result of one per-cluster capacity scrape.
#[derive(Debug, Clone, Default)]
pub struct CapacityScrapeResult {
    pub capacity: ClusterCapacityReport,
    pub metrics: SerializedMetrics,
}

/// Result of one per-project rate scrape.
///
/// Rates are monotonic cumulative counters; `state` is opaque to the
/// orchestrator and passed back verbatim on the next invocation.
#[derive(Debug, Clone, Default)]
pub struct RateScrapeResult {
    pub rates: BTreeMap<RateName, BigUint>,
    pub state: String,
}

/// A per-project collector for one backend service.
#[async_trait]
pub trait QuotaPlugin: Send + Sync {
    /// Binds to backends. May issue blocking calls, e.g. to enumerate flavors
    /// or share types.
    async fn init(
        &mut self,
        ctx: &ScrapeContext,
        provider: &ProviderClient,
        service_type: ServiceType,
    ) -> CollectorResult<()>;

    /// The stable type id this plugin registers under.
    fn plugin_type_id(&self) -> &'static str;

    fn service_info(&self) -> ServiceMetadata;

    fn resources(&self) -> BTreeMap<ResourceName, ResourceInfo>;

    fn rates(&self) -> BTreeMap<RateName, RateInfo> {
        BTreeMap::new()
    }

    /// Fetches quota and usage for one project.
    async fn scrape(
        &self,
        ctx: &ScrapeContext,
        project: &KeystoneProject,
        all_azs: &[AvailabilityZone],
    ) -> CollectorResult<QuotaScrapeResult>;

    /// Writes reconciled quotas back to the backend.
    async fn set_quota(
        &self,
        ctx: &ScrapeContext,
        project: &KeystoneProject,
        desired: &BTreeMap<ResourceName, u64>,
    ) -> CollectorResult<()>;

    /// Fetches cumulative rates for one project. `prev_state` is whatever
    /// `RateScrapeResult::state` this plugin returned last time, or `None` on
    /// the first scrape.
    async fn scrape_rates(
        &self,
        _ctx: &ScrapeContext,
        _project: &KeystoneProject,
        _all_azs: &[AvailabilityZone],
        _prev_state: Option<&str>,
    ) -> CollectorResult<RateScrapeResult> {
        Ok(RateScrapeResult::default())
    }

    /// Registers descriptions for the metric families this plugin emits.
    fn describe_metrics(&self) {}

    /// Re-emits a serialized-metrics blob as live metrics, labeled with the
    /// project's identifiers.
    fn collect_metrics(
        &self,
        _metrics: &SerializedMetrics,
        _project: &KeystoneProject,
    ) -> Result<(), SerializedMetricsError> {
        Ok(())
    }
}

/// Serves aggregated resource demand to capacity plugins, so that existing
/// commitments can pre-reserve capacity during simulation.
#[async_trait]
pub trait CapacityBackchannel: Send + Sync {
    async fn get_resource_demand(
        &self,
        service: &ServiceType,
        resource: &ResourceName,
    ) -> CollectorResult<DemandByAz>;
}

/// A per-cluster capacity collector.
#[async_trait]
pub trait CapacityPlugin: Send + Sync {
    async fn init(&mut self, ctx: &ScrapeContext, provider: &ProviderClient)
        -> CollectorResult<()>;

    fn plugin_type_id(&self) -> &'static str;

    /// Measures cluster-wide capacity, usually per AZ.
    async fn scrape(
        &self,
        ctx: &ScrapeContext,
        backchannel: &dyn CapacityBackchannel,
        all_azs: &[AvailabilityZone],
    ) -> CollectorResult<CapacityScrapeResult>;

    fn describe_metrics(&self) {}

    fn collect_metrics(
        &self,
        _metrics: &SerializedMetrics,
        _capacitor_id: &str,
    ) -> Result<(), SerializedMetricsError> {
        Ok(())
    }
}

/// Enumerates the domains and projects the orchestrator scrapes.
#[async_trait]
pub trait DiscoveryPlugin: Send + Sync {
    async fn init(&mut self, ctx: &ScrapeContext, provider: &ProviderClient)
        -> CollectorResult<()>;

    fn plugin_type_id(&self) -> &'static str;

    async fn list_domains(&self, ctx: &ScrapeContext) -> CollectorResult<Vec<KeystoneDomain>>;

    async fn list_projects(
        &self,
        ctx: &ScrapeContext,
        domain: &KeystoneDomain,
    ) -> CollectorResult<Vec<KeystoneProject>>;
}
