//! Dividing a hypervisor into equal-sized nodes.

use core_plugin::{CollectorError, CollectorResult};
use serde::{Deserialize, Serialize};

use super::node::BinpackNode;
use super::vector::BinpackVector;

/// One inventory metric as reported by the placement service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct InventoryMetric {
    pub total: u64,
    pub reserved: u64,
    pub max_unit: u64,
}

impl InventoryMetric {
    pub fn usable(&self) -> u64 {
        self.total.saturating_sub(self.reserved)
    }

    /// Node count suggested by this metric alone.
    ///
    /// `floor(usable / max_unit)`, rounding up when the fractional part
    /// exceeds the tolerance, so a hypervisor that is one rounding error away
    /// from a whole node still gets it.
    fn node_count(&self) -> Option<u64> {
        if self.max_unit == 0 {
            return None;
        }
        let exact = self.usable() as f64 / self.max_unit as f64;
        let floor = exact.floor();
        if exact - floor > 0.99 {
            Some(floor as u64 + 1)
        } else {
            Some(floor as u64)
        }
    }
}

/// Placement inventories of one hypervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct HypervisorInventory {
    pub vcpus: InventoryMetric,
    pub memory_mb: InventoryMetric,
    pub local_gb: InventoryMetric,
}

impl HypervisorInventory {
    /// The capacity vector of one node.
    pub fn node_capacity(&self) -> BinpackVector<u64> {
        BinpackVector::new(
            self.vcpus.max_unit,
            self.memory_mb.max_unit,
            self.local_gb.max_unit,
        )
    }
}

/// A hypervisor split into equal-sized nodes for the simulation.
#[derive(Debug, Clone)]
pub struct BinpackHypervisor {
    pub name: String,
    pub nodes: Vec<BinpackNode>,
}

impl BinpackHypervisor {
    /// Derives the node count from the inventories.
    ///
    /// The VCPU and MEMORY_MB metrics must agree on the count; disagreement
    /// means the placement data is inconsistent and simulating on top of it
    /// would report capacity that cannot exist.
    pub fn new(name: impl Into<String>, inventory: &HypervisorInventory) -> CollectorResult<Self> {
        let name = name.into();

        let vcpu_count = inventory.vcpus.node_count().ok_or_else(|| {
            CollectorError::InvariantViolated(format!("hypervisor {name}: VCPU max_unit is zero"))
        })?;
        let memory_count = inventory.memory_mb.node_count().ok_or_else(|| {
            CollectorError::InvariantViolated(format!(
                "hypervisor {name}: MEMORY_MB max_unit is zero"
            ))
        })?;

        if vcpu_count != memory_count {
            return Err(CollectorError::InvariantViolated(format!(
                "hypervisor {name}: ambiguous node count (VCPU suggests {vcpu_count}, MEMORY_MB suggests {memory_count})"
            )));
        }

        let capacity = inventory.node_capacity();
        Ok(Self {
            name,
            nodes: (0..vcpu_count).map(|_| BinpackNode::new(capacity)).collect(),
        })
    }

    /// Total capacity across all nodes.
    pub fn capacity(&self) -> BinpackVector<u64> {
        self.nodes
            .iter()
            .fold(BinpackVector::default(), |acc, node| acc.add(node.capacity))
    }

    /// How many instances of a flavor this hypervisor currently hosts in the
    /// simulation.
    pub fn placement_count(&self, flavor_name: &str) -> u64 {
        self.nodes
            .iter()
            .flat_map(|node| &node.instances)
            .filter(|instance| instance.flavor_name == flavor_name)
            .count() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(total: u64, reserved: u64, max_unit: u64) -> InventoryMetric {
        InventoryMetric {
            total,
            reserved,
            max_unit,
        }
    }

    #[test]
    fn node_count_agreement_is_required() {
        let inventory = HypervisorInventory {
            vcpus: metric(96, 0, 24),
            memory_mb: metric(393216, 0, 98304),
            local_gb: metric(3600, 0, 900),
        };
        let hv = BinpackHypervisor::new("hv1", &inventory).unwrap();
        assert_eq!(hv.nodes.len(), 4);
        assert_eq!(hv.nodes[0].capacity, BinpackVector::new(24, 98304, 900));
        assert_eq!(hv.capacity(), BinpackVector::new(96, 393216, 3600));
    }

    #[test]
    fn disagreeing_metrics_fail_construction() {
        let inventory = HypervisorInventory {
            vcpus: metric(96, 0, 24),     // 4 nodes
            memory_mb: metric(393216, 0, 131072), // 3 nodes
            local_gb: metric(3600, 0, 900),
        };
        let result = BinpackHypervisor::new("hv1", &inventory);
        assert!(matches!(result, Err(CollectorError::InvariantViolated(_))));
    }

    #[test]
    fn rounding_tolerance_recovers_almost_whole_nodes() {
        // 95.9 VCPUs worth of usable capacity at 24 per node: 3.995 nodes,
        // fractional part 0.995 > 0.99, so 4 nodes.
        let inventory = HypervisorInventory {
            vcpus: metric(9590, 0, 2400),
            memory_mb: metric(393216, 0, 98304),
            local_gb: metric(3600, 0, 900),
        };
        let hv = BinpackHypervisor::new("hv1", &inventory).unwrap();
        assert_eq!(hv.nodes.len(), 4);
    }

    #[test]
    fn reserved_capacity_is_excluded() {
        let inventory = HypervisorInventory {
            vcpus: metric(96, 48, 24),    // 2 nodes
            memory_mb: metric(393216, 196608, 98304), // 2 nodes
            local_gb: metric(3600, 0, 900),
        };
        let hv = BinpackHypervisor::new("hv1", &inventory).unwrap();
        assert_eq!(hv.nodes.len(), 2);
    }
}
