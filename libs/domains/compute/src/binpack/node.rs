//! Nodes and placed instances.

use serde::Serialize;
use strum::Display;

use super::vector::BinpackVector;

/// Why an instance occupies simulated capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PlacementReason {
    /// A running instance, or demand classified as usage.
    Used,
    /// A confirmed commitment whose holder is not using it yet.
    Committed,
    /// A commitment that is requested but not yet confirmed.
    Pending,
    /// Proportional fill, to model how the remaining space will be consumed.
    Padding,
}

/// One simulated instance on a node.
#[derive(Debug, Clone, Serialize)]
pub struct BinpackInstance {
    pub flavor_name: String,
    pub size: BinpackVector<u64>,
    pub reason: PlacementReason,
}

/// One equal-sized slice of a hypervisor.
#[derive(Debug, Clone, Serialize)]
pub struct BinpackNode {
    pub capacity: BinpackVector<u64>,
    pub instances: Vec<BinpackInstance>,
}

impl BinpackNode {
    pub fn new(capacity: BinpackVector<u64>) -> Self {
        Self {
            capacity,
            instances: Vec::new(),
        }
    }

    pub fn usage(&self) -> BinpackVector<u64> {
        self.instances
            .iter()
            .fold(BinpackVector::default(), |acc, instance| {
                acc.add(instance.size)
            })
    }

    pub fn free(&self) -> BinpackVector<u64> {
        self.capacity.saturating_sub(self.usage())
    }

    /// Whether `size` can be placed here at all.
    pub fn accommodates(&self, size: BinpackVector<u64>) -> bool {
        let usage = self.usage();
        usage.fits_in(self.capacity) && size.fits_in(self.capacity.saturating_sub(usage))
    }

    pub fn place(&mut self, flavor_name: impl Into<String>, size: BinpackVector<u64>, reason: PlacementReason) {
        self.instances.push(BinpackInstance {
            flavor_name: flavor_name.into(),
            size,
            reason,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_is_the_sum_of_placed_sizes() {
        let mut node = BinpackNode::new(BinpackVector::new(8, 16384, 40));
        node.place("a", BinpackVector::new(2, 4096, 10), PlacementReason::Used);
        node.place("b", BinpackVector::new(4, 8192, 20), PlacementReason::Padding);

        assert_eq!(node.usage(), BinpackVector::new(6, 12288, 30));
        assert_eq!(node.free(), BinpackVector::new(2, 4096, 10));
        assert!(node.accommodates(BinpackVector::new(2, 4096, 10)));
        assert!(!node.accommodates(BinpackVector::new(3, 1, 1)));
    }
}
