//! Cluster-level capacity and usage report payloads.
//!
//! These are the wire documents exchanged with the unified backend API, so
//! they reject unknown fields on decode.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::data::{CapacityData, UsageData};
use crate::ids::{ResourceName, ServiceType};
use crate::peraz::PerAz;

/// Capacity of one resource, broken down by AZ.
///
/// For az-separated resources the backend also reports per-AZ quota.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceCapacityReport {
    pub per_az: PerAz<CapacityData>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_az_quota: Option<PerAz<i64>>,
}

impl ResourceCapacityReport {
    pub fn new(per_az: PerAz<CapacityData>) -> Self {
        Self {
            per_az,
            per_az_quota: None,
        }
    }
}

/// Capacity for all resources of one backend service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ServiceCapacityReport {
    /// The [`crate::ServiceInfo::version`] this report was computed against.
    pub info_version: u64,
    pub resources: BTreeMap<ResourceName, ResourceCapacityReport>,
}

/// Usage of one resource by one project, as reported by the unified backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceUsageReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quota: Option<i64>,

    pub per_az: PerAz<UsageData>,
}

/// Usage for all resources of one backend service, for one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ServiceUsageReport {
    /// The [`crate::ServiceInfo::version`] this report was computed against.
    pub info_version: u64,
    pub resources: BTreeMap<ResourceName, ResourceUsageReport>,
}

/// What a capacity collector returns from one scrape: capacity per service,
/// per resource, per AZ.
pub type ClusterCapacityReport = BTreeMap<ServiceType, BTreeMap<ResourceName, PerAz<CapacityData>>>;

/// Convenience constructor for a single-AZ capacity entry.
pub fn flat_capacity(capacity: u64) -> PerAz<CapacityData> {
    PerAz::flat(CapacityData::new(capacity))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_report_rejects_unknown_fields() {
        let json = r#"{"per_az": {"any": {"capacity": 5}}, "bogus": 1}"#;
        let result: Result<ResourceCapacityReport, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn capacity_report_round_trips() {
        let report = ResourceCapacityReport::new(flat_capacity(100));
        let json = serde_json::to_string(&report).unwrap();
        let back: ResourceCapacityReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }
}
