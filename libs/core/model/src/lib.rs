//! Shared data model for quota and capacity collection
//!
//! Everything that flows between collectors, the capacity engines, and the
//! orchestrator lives here: service/resource identifiers, availability-zone
//! aware maps, per-project quota/usage payloads, cluster capacity reports,
//! and the tolerant JSON decoders needed for backend APIs that are loose
//! about number types.

pub mod data;
pub mod distribute;
pub mod flexible;
pub mod ids;
pub mod info;
pub mod keystone;
pub mod peraz;
pub mod reports;
pub mod topology;

pub use data::{CapacityData, DemandByAz, ResourceData, ResourceDemand, UsageData};
pub use distribute::usage_breakdown;
pub use flexible::{FlexibleInt, FlexibleUint};
pub use ids::{AvailabilityZone, RateName, ResourceName, ServiceType};
pub use info::{RateInfo, ResourceInfo, ServiceInfo, ServiceMetadata, Unit};
pub use keystone::{KeystoneDomain, KeystoneProject};
pub use peraz::PerAz;
pub use reports::{
    flat_capacity, ClusterCapacityReport, ResourceCapacityReport, ResourceUsageReport,
    ServiceCapacityReport, ServiceUsageReport,
};
pub use topology::{match_report_to_topology, Topology, TopologyError};
