//! The multi-phase placement simulation for one availability zone.
//!
//! Phases, in order: seed existing placements onto their known hosts, place
//! used demand while blocking pooled usage, place unused confirmed
//! commitments, place pending commitments, then fill the remaining space
//! proportionally so the reported capacity reflects how the cluster will
//! actually be consumed.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::flavors::FlavorInfo;

use super::hypervisor::BinpackHypervisor;
use super::node::PlacementReason;
use super::vector::{BinpackVector, OvercommitFactor};

use core_model::ResourceDemand;

/// Demand on the pooled resources (cores in logical units, RAM in MiB,
/// instance counts).
#[derive(Debug, Clone, Copy, Default)]
pub struct PooledDemand {
    pub cores: ResourceDemand,
    pub instances: ResourceDemand,
    pub ram: ResourceDemand,
}

impl PooledDemand {
    fn is_present(&self) -> bool {
        self.cores.total() > 0 || self.instances.total() > 0 || self.ram.total() > 0
    }
}

/// Demand for one split flavor in this AZ.
#[derive(Debug, Clone)]
pub struct SplitDemand {
    pub flavor: FlavorInfo,
    pub demand: ResourceDemand,

    /// Hypervisor hostname of each already-running instance, where the
    /// compute service can report it.
    pub existing_hosts: Vec<String>,

    /// Running instances that live on shadowed hypervisors. They are kept
    /// out of the simulation but still increase the reported capacity.
    pub shadowed_count: u64,
}

/// The simulation state for one AZ.
pub struct AzSimulation {
    hypervisors: Vec<BinpackHypervisor>,
    overcommit: OvercommitFactor,
    max_root_disk_gb: u64,
    can_place: BTreeMap<String, bool>,
}

impl AzSimulation {
    pub fn new(
        hypervisors: Vec<BinpackHypervisor>,
        overcommit: OvercommitFactor,
        max_root_disk_gb: u64,
    ) -> Self {
        Self {
            hypervisors,
            overcommit,
            max_root_disk_gb,
            can_place: BTreeMap::new(),
        }
    }

    /// The size vector a flavor occupies on a node: logical VCPUs consume
    /// physical capacity divided by the overcommit factor.
    fn effective_size(&self, flavor: &FlavorInfo) -> BinpackVector<u64> {
        BinpackVector::new(
            self.overcommit.apply_in_reverse(flavor.vcpus),
            flavor.memory_mib,
            flavor.disk_gib,
        )
    }

    fn pooled_vector(&self, cores: u64, ram: u64, instances: u64) -> BinpackVector<u64> {
        BinpackVector::new(
            self.overcommit.apply_in_reverse(cores),
            ram,
            instances * self.max_root_disk_gb,
        )
    }

    pub fn total_capacity(&self) -> BinpackVector<u64> {
        self.hypervisors
            .iter()
            .fold(BinpackVector::default(), |acc, hv| acc.add(hv.capacity()))
    }

    fn total_free(&self) -> BinpackVector<u64> {
        self.hypervisors
            .iter()
            .flat_map(|hv| &hv.nodes)
            .fold(BinpackVector::default(), |acc, node| acc.add(node.free()))
    }

    /// Capacity consumed by all placed split-flavor instances.
    pub fn placed_split_usage(&self) -> BinpackVector<u64> {
        self.hypervisors
            .iter()
            .flat_map(|hv| &hv.nodes)
            .map(|node| node.usage())
            .fold(BinpackVector::default(), BinpackVector::add)
    }

    pub fn placement_count(&self, flavor_name: &str) -> u64 {
        self.hypervisors
            .iter()
            .map(|hv| hv.placement_count(flavor_name))
            .sum()
    }

    pub fn can_place(&self, flavor_name: &str) -> bool {
        self.can_place.get(flavor_name).copied().unwrap_or(true)
    }

    pub fn hypervisors(&self) -> &[BinpackHypervisor] {
        &self.hypervisors
    }

    /// The vector-dot placement score: how closely the instance's shape
    /// matches the node's remaining shape, both normalized by the node's
    /// capacity. Higher is better.
    fn score(size: BinpackVector<u64>, capacity: BinpackVector<u64>, free: BinpackVector<u64>) -> f64 {
        let capacity = capacity.to_float();
        let s = size.to_float().div(capacity);
        let f = free.to_float().div(capacity);
        let numerator = s.dot(f);
        let denominator = s.dot(s) * f.dot(f);
        if denominator == 0.0 {
            0.0
        } else {
            (numerator * numerator) / denominator
        }
    }

    /// Places one instance on the best-scoring node anywhere in the AZ.
    ///
    /// Fails when the instance would encroach on `blocked` capacity, or no
    /// node has room. Ties resolve to the first-visited node.
    fn place_one(
        &mut self,
        flavor_name: &str,
        size: BinpackVector<u64>,
        reason: PlacementReason,
        blocked: BinpackVector<u64>,
    ) -> bool {
        if !size.fits_in(self.total_free().saturating_sub(blocked)) {
            return false;
        }

        let mut best: Option<(usize, usize, f64)> = None;
        for (hv_index, hv) in self.hypervisors.iter().enumerate() {
            for (node_index, node) in hv.nodes.iter().enumerate() {
                if !node.accommodates(size) {
                    continue;
                }
                let score = Self::score(size, node.capacity, node.free());
                if best.is_none_or(|(_, _, best_score)| score > best_score) {
                    best = Some((hv_index, node_index, score));
                }
            }
        }

        match best {
            Some((hv_index, node_index, _)) => {
                self.hypervisors[hv_index].nodes[node_index].place(flavor_name, size, reason);
                true
            }
            None => false,
        }
    }

    /// Places one instance on a specific hypervisor (for seeding existing
    /// placements whose host is known).
    fn place_on_host(
        &mut self,
        hostname: &str,
        flavor_name: &str,
        size: BinpackVector<u64>,
        reason: PlacementReason,
    ) -> bool {
        let Some(hv_index) = self.hypervisors.iter().position(|hv| hv.name == hostname) else {
            return false;
        };

        let mut best: Option<(usize, f64)> = None;
        for (node_index, node) in self.hypervisors[hv_index].nodes.iter().enumerate() {
            if !node.accommodates(size) {
                continue;
            }
            let score = Self::score(size, node.capacity, node.free());
            if best.is_none_or(|(_, best_score)| score > best_score) {
                best = Some((node_index, score));
            }
        }

        match best {
            Some((node_index, _)) => {
                self.hypervisors[hv_index].nodes[node_index].place(flavor_name, size, reason);
                true
            }
            None => false,
        }
    }

    fn place_several(
        &mut self,
        count: u64,
        flavor_name: &str,
        size: BinpackVector<u64>,
        reason: PlacementReason,
        blocked: BinpackVector<u64>,
    ) {
        for _ in 0..count {
            if !self.place_one(flavor_name, size, reason, blocked) {
                debug!(
                    flavor = flavor_name,
                    reason = %reason,
                    "placement failed, marking flavor as saturated"
                );
                self.can_place.insert(flavor_name.to_string(), false);
                return;
            }
        }
    }

    /// Runs all placement phases. `split_demands` must already be in
    /// placement priority order (descending VCPUs, RAM, disk).
    pub fn run(&mut self, pooled: &PooledDemand, split_demands: &[SplitDemand]) {
        // Phase 1: seed existing placements onto their reported hosts.
        for split in split_demands {
            let name = split.flavor.original_name.clone();
            self.can_place.insert(name.clone(), true);
            let size = self.effective_size(&split.flavor);
            for host in &split.existing_hosts {
                if !self.place_on_host(host, &name, size, PlacementReason::Used) {
                    warn!(
                        flavor = %name,
                        host = %host,
                        "cannot reproduce existing placement in simulation"
                    );
                }
            }
        }

        // Phase 2: block used pooled capacity, then place used split demand.
        let mut blocked = self.pooled_vector(
            pooled.cores.usage,
            pooled.ram.usage,
            pooled.instances.usage,
        );
        for split in split_demands {
            let name = split.flavor.original_name.clone();
            let size = self.effective_size(&split.flavor);
            let already = self.placement_count(&name) + split.shadowed_count;
            let wanted = split.demand.usage.saturating_sub(already);
            self.place_several(wanted, &name, size, PlacementReason::Used, blocked);
        }

        // Phase 3: unused confirmed commitments.
        blocked = blocked.add(self.pooled_vector(
            pooled.cores.unused_commitments,
            pooled.ram.unused_commitments,
            pooled.instances.unused_commitments,
        ));
        for split in split_demands {
            let name = split.flavor.original_name.clone();
            let size = self.effective_size(&split.flavor);
            self.place_several(
                split.demand.unused_commitments,
                &name,
                size,
                PlacementReason::Committed,
                blocked,
            );
        }

        // Phase 4: pending commitments.
        blocked = blocked.add(self.pooled_vector(
            pooled.cores.pending_commitments,
            pooled.ram.pending_commitments,
            pooled.instances.pending_commitments,
        ));
        for split in split_demands {
            let name = split.flavor.original_name.clone();
            let size = self.effective_size(&split.flavor);
            self.place_several(
                split.demand.pending_commitments,
                &name,
                size,
                PlacementReason::Pending,
                blocked,
            );
        }

        self.run_padding(pooled, blocked, split_demands);
    }

    /// Phase 5: proportional fair fill.
    ///
    /// The remaining space is filled with split-flavor instances in the same
    /// ratio as the demand placed so far, using the Sainte-Laguë method. The
    /// blocked capacity is rescaled first so the pooled share of the full
    /// cluster matches the pooled share of current usage.
    fn run_padding(
        &mut self,
        pooled: &PooledDemand,
        blocked: BinpackVector<u64>,
        split_demands: &[SplitDemand],
    ) {
        let initial_counts: BTreeMap<String, u64> = split_demands
            .iter()
            .map(|split| {
                let name = split.flavor.original_name.clone();
                let count = self.placement_count(&name);
                (name, count)
            })
            .collect();

        // With pooled demand present and not a single split placement, the
        // proportional rescale below would degenerate; skip padding entirely.
        if pooled.is_present() && initial_counts.values().all(|count| *count == 0) {
            return;
        }

        let split_usage = self.placed_split_usage();
        let total_usage = blocked.add(split_usage);
        let mut blocked = blocked;
        if !total_usage.any_is_zero() {
            // blocked / total_capacity == pooled_usage / total_usage
            let total_capacity = self.total_capacity().to_float();
            let ratio = blocked.to_float().div(total_usage.to_float());
            blocked = BinpackVector::new(
                (total_capacity.vcpus * ratio.vcpus) as u64,
                (total_capacity.memory_mb * ratio.memory_mb) as u64,
                (total_capacity.local_gb * ratio.local_gb) as u64,
            );
        }

        // The vote of each flavor is its pre-padding placement count, with a
        // floor so flavors without initial placements keep a small chance.
        let votes: BTreeMap<&str, f64> = initial_counts
            .iter()
            .map(|(name, count)| (name.as_str(), (*count as f64).max(0.1)))
            .collect();
        let mut seats: BTreeMap<&str, u64> = initial_counts
            .iter()
            .map(|(name, count)| (name.as_str(), *count))
            .collect();

        loop {
            let mut best: Option<(&SplitDemand, f64)> = None;
            for split in split_demands {
                let name = split.flavor.original_name.as_str();
                if !self.can_place(name) {
                    continue;
                }
                let score = votes[name] / (2 * seats[name] + 1) as f64;
                if best.is_none_or(|(_, best_score)| score > best_score) {
                    best = Some((split, score));
                }
            }
            let Some((split, _)) = best else {
                return;
            };

            let name = split.flavor.original_name.clone();
            let size = self.effective_size(&split.flavor);
            if self.place_one(&name, size, PlacementReason::Padding, blocked) {
                *seats.get_mut(name.as_str()).expect("seat entry exists") += 1;
            } else {
                self.can_place.insert(name, false);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binpack::hypervisor::{HypervisorInventory, InventoryMetric};
    use crate::binpack::node::PlacementReason;
    use std::collections::BTreeMap as Map;

    fn flavor(name: &str, vcpus: u64, memory_mib: u64, disk_gib: u64) -> FlavorInfo {
        FlavorInfo {
            original_name: name.into(),
            vcpus,
            memory_mib,
            disk_gib,
            extra_specs: Map::new(),
        }
    }

    fn single_node_hypervisor(name: &str) -> BinpackHypervisor {
        let inventory = HypervisorInventory {
            vcpus: InventoryMetric {
                total: 8,
                reserved: 0,
                max_unit: 8,
            },
            memory_mb: InventoryMetric {
                total: 16384,
                reserved: 0,
                max_unit: 16384,
            },
            local_gb: InventoryMetric {
                total: 40,
                reserved: 0,
                max_unit: 40,
            },
        };
        BinpackHypervisor::new(name, &inventory).unwrap()
    }

    fn demand(usage: u64) -> ResourceDemand {
        ResourceDemand {
            usage,
            unused_commitments: 0,
            pending_commitments: 0,
        }
    }

    fn split(flavor: FlavorInfo, usage: u64) -> SplitDemand {
        SplitDemand {
            flavor,
            demand: demand(usage),
            existing_hosts: Vec::new(),
            shadowed_count: 0,
        }
    }

    #[test]
    fn places_demanded_instances_as_used() {
        let mut sim = AzSimulation::new(
            vec![single_node_hypervisor("hv1")],
            OvercommitFactor::default(),
            0,
        );
        let splits = vec![split(flavor("a", 4, 8192, 20), 2)];

        sim.run(&PooledDemand::default(), &splits);

        assert_eq!(sim.placement_count("a"), 2);
        assert!(sim.can_place("a"));
        let node = &sim.hypervisors()[0].nodes[0];
        assert_eq!(node.usage(), BinpackVector::new(8, 16384, 40));
        assert!(node
            .instances
            .iter()
            .all(|instance| instance.reason == PlacementReason::Used));
    }

    #[test]
    fn saturation_marks_flavor_unplaceable() {
        let mut sim = AzSimulation::new(
            vec![single_node_hypervisor("hv1")],
            OvercommitFactor::default(),
            0,
        );
        let splits = vec![split(flavor("b", 8, 16384, 40), 2)];

        sim.run(&PooledDemand::default(), &splits);

        assert_eq!(sim.placement_count("b"), 1);
        assert!(!sim.can_place("b"));
    }

    #[test]
    fn node_usage_never_exceeds_capacity() {
        let mut sim = AzSimulation::new(
            vec![single_node_hypervisor("hv1"), single_node_hypervisor("hv2")],
            OvercommitFactor::default(),
            0,
        );
        let splits = vec![
            split(flavor("big", 8, 16384, 40), 3),
            split(flavor("small", 2, 4096, 10), 5),
        ];

        sim.run(&PooledDemand::default(), &splits);

        for hv in sim.hypervisors() {
            for node in &hv.nodes {
                assert!(node.usage().fits_in(node.capacity));
            }
        }
    }

    #[test]
    fn existing_placements_seed_their_hosts() {
        let mut sim = AzSimulation::new(
            vec![single_node_hypervisor("hv1"), single_node_hypervisor("hv2")],
            OvercommitFactor::default(),
            0,
        );
        let splits = vec![SplitDemand {
            flavor: flavor("a", 4, 8192, 20),
            demand: demand(1),
            existing_hosts: vec!["hv2".into()],
            shadowed_count: 0,
        }];

        sim.run(&PooledDemand::default(), &splits);

        // The single demanded instance is the seeded one; nothing extra.
        assert_eq!(sim.hypervisors()[1].placement_count("a"), 1);
        assert_eq!(sim.hypervisors()[0].placement_count("a"), 0);
    }

    #[test]
    fn shadowed_instances_reduce_simulated_demand() {
        let mut sim = AzSimulation::new(
            vec![single_node_hypervisor("hv1")],
            OvercommitFactor::default(),
            0,
        );
        let splits = vec![SplitDemand {
            flavor: flavor("a", 4, 8192, 20),
            demand: demand(2),
            existing_hosts: Vec::new(),
            shadowed_count: 1,
        }];

        sim.run(&PooledDemand::default(), &splits);
        assert_eq!(sim.placement_count("a"), 1);
    }

    #[test]
    fn pooled_usage_blocks_capacity() {
        let mut sim = AzSimulation::new(
            vec![single_node_hypervisor("hv1")],
            OvercommitFactor::default(),
            10,
        );
        // Pooled usage blocks (4 cores, 8192 MiB, 2 instances * 10 GB).
        let pooled = PooledDemand {
            cores: demand(4),
            ram: demand(8192),
            instances: demand(2),
        };
        // One instance fits next to the blocked capacity, a second does not.
        let splits = vec![split(flavor("a", 4, 8192, 20), 2)];

        sim.run(&pooled, &splits);

        assert_eq!(sim.placement_count("a"), 1);
        assert!(!sim.can_place("a"));
    }

    #[test]
    fn overcommit_shrinks_core_consumption() {
        let mut sim = AzSimulation::new(
            vec![single_node_hypervisor("hv1")],
            OvercommitFactor(4.0),
            0,
        );
        // 8 logical cores consume only 2 physical ones; memory is now the
        // binding constraint (16384 / 4096 = 4 instances).
        let splits = vec![split(flavor("a", 8, 4096, 10), 6)];

        sim.run(&PooledDemand::default(), &splits);
        assert_eq!(sim.placement_count("a"), 4);
        assert!(!sim.can_place("a"));
    }

    #[test]
    fn padding_fills_remaining_space_proportionally() {
        let mut sim = AzSimulation::new(
            vec![
                single_node_hypervisor("hv1"),
                single_node_hypervisor("hv2"),
                single_node_hypervisor("hv3"),
                single_node_hypervisor("hv4"),
            ],
            OvercommitFactor::default(),
            0,
        );
        let splits = vec![
            split(flavor("a", 4, 8192, 20), 2),
            split(flavor("b", 2, 4096, 10), 1),
        ];

        sim.run(&PooledDemand::default(), &splits);

        let padded: u64 = sim
            .hypervisors()
            .iter()
            .flat_map(|hv| &hv.nodes)
            .flat_map(|node| &node.instances)
            .filter(|instance| instance.reason == PlacementReason::Padding)
            .count() as u64;
        assert!(padded > 0, "padding should fill the empty hypervisors");
        // Flavor a got two initial placements versus one for b, so padding
        // should keep it ahead.
        assert!(sim.placement_count("a") >= sim.placement_count("b"));
    }

    #[test]
    fn padding_is_skipped_without_any_split_placements() {
        let mut sim = AzSimulation::new(
            vec![single_node_hypervisor("hv1")],
            OvercommitFactor::default(),
            10,
        );
        let pooled = PooledDemand {
            cores: demand(2),
            ram: demand(4096),
            instances: demand(1),
        };
        let splits = vec![split(flavor("a", 4, 8192, 20), 0)];

        sim.run(&pooled, &splits);
        assert_eq!(sim.placement_count("a"), 0);
    }

    #[test]
    fn simulation_is_deterministic() {
        let run = || {
            let mut sim = AzSimulation::new(
                vec![single_node_hypervisor("hv1"), single_node_hypervisor("hv2")],
                OvercommitFactor::default(),
                0,
            );
            let splits = vec![
                split(flavor("a", 4, 8192, 20), 1),
                split(flavor("b", 2, 4096, 10), 2),
            ];
            sim.run(&PooledDemand::default(), &splits);
            sim.hypervisors()
                .iter()
                .map(|hv| {
                    hv.nodes
                        .iter()
                        .map(|node| {
                            node.instances
                                .iter()
                                .map(|i| (i.flavor_name.clone(), i.reason))
                                .collect::<Vec<_>>()
                        })
                        .collect::<Vec<_>>()
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }
}
