//! Capacity, usage, and per-project resource payloads.

use serde::{Deserialize, Serialize};

use crate::peraz::PerAz;

/// Capacity of one resource in one availability zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CapacityData {
    pub capacity: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<u64>,

    /// Opaque breakdown records for UI drill-down, one per pool, hypervisor,
    /// or similar backend-level unit.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subcapacities: Vec<serde_json::Value>,
}

impl CapacityData {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            usage: None,
            subcapacities: Vec::new(),
        }
    }

    pub fn with_usage(capacity: u64, usage: u64) -> Self {
        Self {
            capacity,
            usage: Some(usage),
            subcapacities: Vec::new(),
        }
    }
}

/// Usage of one resource by one project in one availability zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UsageData {
    pub usage: u64,

    /// Usage on the physical layer, where the backend overcommits. Filled from
    /// a secondary metrics source for storage resources.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub physical_usage: Option<u64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subresources: Vec<serde_json::Value>,
}

impl UsageData {
    pub fn new(usage: u64) -> Self {
        Self {
            usage,
            physical_usage: None,
            subresources: Vec::new(),
        }
    }
}

/// Per-project quota and usage for one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceData {
    /// The granted quota. [`ResourceData::UNLIMITED`] means no limit.
    pub quota: i64,

    /// Administrative cap on the quota, where one applies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_quota: Option<i64>,

    /// Set when the project may not use this resource at all; any non-zero
    /// quota request must then be rejected.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub forbidden: bool,

    /// Usage broken down by AZ. Must agree with the resource's topology.
    pub per_az: PerAz<UsageData>,
}

impl ResourceData {
    pub const UNLIMITED: i64 = -1;

    pub fn new(quota: i64, per_az: PerAz<UsageData>) -> Self {
        Self {
            quota,
            max_quota: None,
            forbidden: false,
            per_az,
        }
    }

    /// Marks a resource the project may not use: zero quota, zero cap.
    pub fn forbidden(per_az: PerAz<UsageData>) -> Self {
        Self {
            quota: 0,
            max_quota: Some(0),
            forbidden: true,
            per_az,
        }
    }
}

/// Aggregated demand for one resource in one availability zone, served to
/// capacity collectors through the backchannel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ResourceDemand {
    /// Capacity that is in active use.
    pub usage: u64,

    /// Commitments that are confirmed but whose holders are not using them yet.
    pub unused_commitments: u64,

    /// Commitments that have been requested but not yet confirmed.
    pub pending_commitments: u64,
}

impl ResourceDemand {
    pub fn total(&self) -> u64 {
        self.usage + self.unused_commitments + self.pending_commitments
    }
}

/// Demand for one resource across all availability zones.
pub type DemandByAz = PerAz<ResourceDemand>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forbidden_resource_has_zero_quota_and_cap() {
        let data = ResourceData::forbidden(PerAz::flat(UsageData::new(0)));
        assert_eq!(data.quota, 0);
        assert_eq!(data.max_quota, Some(0));
        assert!(data.forbidden);
    }

    #[test]
    fn optional_fields_are_omitted_from_json() {
        let json = serde_json::to_value(CapacityData::new(42)).unwrap();
        assert_eq!(json, serde_json::json!({"capacity": 42}));

        let json = serde_json::to_value(UsageData::new(7)).unwrap();
        assert_eq!(json, serde_json::json!({"usage": 7}));
    }
}
