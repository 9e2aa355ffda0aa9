//! Service and resource metadata declared by collectors.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::ids::{RateName, ResourceName};
use crate::topology::{Topology, TopologyError};

/// Measurement unit of a resource or rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, Default)]
pub enum Unit {
    #[default]
    #[serde(rename = "")]
    #[strum(serialize = "")]
    None,
    #[serde(rename = "B")]
    #[strum(serialize = "B")]
    Bytes,
    #[serde(rename = "MiB")]
    #[strum(serialize = "MiB")]
    MebiBytes,
    #[serde(rename = "GiB")]
    #[strum(serialize = "GiB")]
    GibiBytes,
}

/// Metadata for one resource declared by a collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceInfo {
    pub unit: Unit,

    /// Whether quota is tracked for this resource. Counted-but-unlimited
    /// resources report usage only.
    pub has_quota: bool,

    pub topology: Topology,
}

impl ResourceInfo {
    pub fn new(unit: Unit, topology: Topology) -> Self {
        Self {
            unit,
            has_quota: true,
            topology,
        }
    }
}

/// Metadata for one cumulative rate declared by a collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RateInfo {
    pub unit: Unit,
}

/// The identity surface a collector exposes to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceMetadata {
    pub product_name: String,
    pub area: String,
}

/// Full description of a backend service: identity, declared resources and
/// rates, and a monotone version.
///
/// A changed version forces the orchestrator to reload this structure; see
/// the unified client for the fatal-on-drift behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceInfo {
    pub product_name: String,
    pub area: String,
    #[serde(default)]
    pub resources: BTreeMap<ResourceName, ResourceInfo>,
    #[serde(default)]
    pub rates: BTreeMap<RateName, RateInfo>,
    pub version: u64,
}

impl ServiceInfo {
    /// Validates the declared resource topologies.
    ///
    /// All declared resources must carry a parseable topology; the strict wire
    /// decoder rejects unknown or empty topology strings before this point,
    /// so here only cross-resource consistency remains: a service must not
    /// declare an empty resource name.
    pub fn check_resource_topologies(&self) -> Result<(), TopologyError> {
        for name in self.resources.keys() {
            if name.as_str().is_empty() {
                return Err(TopologyError::Invalid(String::new()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info() -> ServiceInfo {
        ServiceInfo {
            product_name: "compute".into(),
            area: "compute".into(),
            resources: BTreeMap::from([(
                ResourceName::from("cores"),
                ResourceInfo::new(Unit::None, Topology::AzAware),
            )]),
            rates: BTreeMap::new(),
            version: 1,
        }
    }

    #[test]
    fn valid_service_info_passes_topology_check() {
        assert!(sample_info().check_resource_topologies().is_ok());
    }

    #[test]
    fn empty_resource_name_is_rejected() {
        let mut info = sample_info();
        info.resources.insert(
            ResourceName::from(""),
            ResourceInfo::new(Unit::None, Topology::Flat),
        );
        assert!(info.check_resource_topologies().is_err());
    }

    #[test]
    fn unit_serializes_to_short_names() {
        assert_eq!(serde_json::to_string(&Unit::GibiBytes).unwrap(), "\"GiB\"");
        assert_eq!(serde_json::to_string(&Unit::None).unwrap(), "\"\"");
    }
}
