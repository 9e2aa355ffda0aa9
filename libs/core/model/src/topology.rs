//! Resource topology across availability zones, and report validation.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::ids::{AvailabilityZone, ResourceName};
use crate::peraz::PerAz;

/// How a resource partitions across availability zones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Topology {
    /// Only the `any` pseudo-AZ is allowed.
    Flat,
    /// One entry per real AZ, plus `unknown` for leftovers. Never `any`.
    AzAware,
    /// Real AZs only. Neither `any` nor `unknown`.
    AzSeparated,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TopologyError {
    #[error("invalid topology {0:?}")]
    Invalid(String),

    #[error("resource {resource} has topology {topology}, but report contains AZ {zone}")]
    ForbiddenZone {
        resource: ResourceName,
        topology: Topology,
        zone: AvailabilityZone,
    },

    #[error("resource {resource} has flat topology, but report contains {count} AZ entries")]
    NotFlat { resource: ResourceName, count: usize },
}

impl FromStr for Topology {
    type Err = TopologyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "flat" => Ok(Self::Flat),
            "az-aware" => Ok(Self::AzAware),
            "az-separated" => Ok(Self::AzSeparated),
            other => Err(TopologyError::Invalid(other.to_string())),
        }
    }
}

/// Validates that a per-AZ report agrees with the resource's declared topology.
///
/// `flat` requires exactly one entry under `any`. `az-aware` forbids `any`.
/// `az-separated` forbids both `any` and `unknown`.
pub fn match_report_to_topology<T>(
    resource: &ResourceName,
    per_az: &PerAz<T>,
    topology: Topology,
) -> Result<(), TopologyError> {
    match topology {
        Topology::Flat => {
            if per_az.len() != 1 {
                return Err(TopologyError::NotFlat {
                    resource: resource.clone(),
                    count: per_az.len(),
                });
            }
            for zone in per_az.keys() {
                if !zone.is_any() {
                    return Err(TopologyError::ForbiddenZone {
                        resource: resource.clone(),
                        topology,
                        zone: zone.clone(),
                    });
                }
            }
            Ok(())
        }
        Topology::AzAware => {
            for zone in per_az.keys() {
                if zone.is_any() {
                    return Err(TopologyError::ForbiddenZone {
                        resource: resource.clone(),
                        topology,
                        zone: zone.clone(),
                    });
                }
            }
            Ok(())
        }
        Topology::AzSeparated => {
            for zone in per_az.keys() {
                if !zone.is_real() {
                    return Err(TopologyError::ForbiddenZone {
                        resource: resource.clone(),
                        topology,
                        zone: zone.clone(),
                    });
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(zones: &[&str]) -> PerAz<u64> {
        zones
            .iter()
            .map(|az| (AvailabilityZone::from(*az), 1u64))
            .collect()
    }

    #[test]
    fn flat_requires_single_any_entry() {
        let resource = ResourceName::from("cores");
        assert!(match_report_to_topology(&resource, &report(&["any"]), Topology::Flat).is_ok());
        assert!(match_report_to_topology(&resource, &report(&["az-1"]), Topology::Flat).is_err());
        assert!(
            match_report_to_topology(&resource, &report(&["any", "az-1"]), Topology::Flat)
                .is_err()
        );
    }

    #[test]
    fn az_aware_forbids_any() {
        let resource = ResourceName::from("cores");
        let ok = report(&["az-1", "az-2", "unknown"]);
        assert!(match_report_to_topology(&resource, &ok, Topology::AzAware).is_ok());
        let bad = report(&["any", "az-1"]);
        assert!(match_report_to_topology(&resource, &bad, Topology::AzAware).is_err());
    }

    #[test]
    fn az_separated_forbids_pseudo_zones() {
        let resource = ResourceName::from("cores");
        assert!(
            match_report_to_topology(&resource, &report(&["az-1", "az-2"]), Topology::AzSeparated)
                .is_ok()
        );
        assert!(
            match_report_to_topology(&resource, &report(&["unknown"]), Topology::AzSeparated)
                .is_err()
        );
        assert!(
            match_report_to_topology(&resource, &report(&["any"]), Topology::AzSeparated)
                .is_err()
        );
    }

    #[test]
    fn empty_topology_string_is_rejected() {
        assert_eq!(
            "".parse::<Topology>(),
            Err(TopologyError::Invalid(String::new()))
        );
        assert_eq!("az-aware".parse::<Topology>(), Ok(Topology::AzAware));
    }
}
