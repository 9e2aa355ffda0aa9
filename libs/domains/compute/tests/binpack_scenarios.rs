//! End-to-end placement scenarios against the public binpack API.

use std::collections::BTreeMap;

use core_model::ResourceDemand;
use domain_compute::binpack::{
    AzSimulation, BinpackHypervisor, BinpackVector, HypervisorInventory, InventoryMetric,
    OvercommitFactor, PooledDemand, SplitDemand,
};
use domain_compute::flavors::{sort_for_placement, FlavorInfo};

fn metric(total: u64, max_unit: u64) -> InventoryMetric {
    InventoryMetric {
        total,
        reserved: 0,
        max_unit,
    }
}

fn hypervisor(name: &str, nodes: u64) -> BinpackHypervisor {
    let inventory = HypervisorInventory {
        vcpus: metric(8 * nodes, 8),
        memory_mb: metric(16384 * nodes, 16384),
        local_gb: metric(40 * nodes, 40),
    };
    BinpackHypervisor::new(name, &inventory).unwrap()
}

fn flavor(name: &str, vcpus: u64, memory_mib: u64, disk_gib: u64) -> FlavorInfo {
    FlavorInfo {
        original_name: name.into(),
        vcpus,
        memory_mib,
        disk_gib,
        extra_specs: BTreeMap::new(),
    }
}

fn used(usage: u64) -> ResourceDemand {
    ResourceDemand {
        usage,
        unused_commitments: 0,
        pending_commitments: 0,
    }
}

#[test]
fn demand_that_fits_is_placed_fully() {
    let mut sim = AzSimulation::new(
        vec![hypervisor("hv1", 1)],
        OvercommitFactor::default(),
        0,
    );
    let splits = vec![SplitDemand {
        flavor: flavor("a", 4, 8192, 20),
        demand: used(2),
        existing_hosts: Vec::new(),
        shadowed_count: 0,
    }];

    sim.run(&PooledDemand::default(), &splits);

    assert_eq!(sim.placement_count("a"), 2);
    assert!(sim.can_place("a"));
    assert_eq!(
        sim.hypervisors()[0].nodes[0].usage(),
        BinpackVector::new(8, 16384, 40)
    );
}

#[test]
fn demand_beyond_capacity_saturates() {
    let mut sim = AzSimulation::new(
        vec![hypervisor("hv1", 1)],
        OvercommitFactor::default(),
        0,
    );
    let splits = vec![SplitDemand {
        flavor: flavor("b", 8, 16384, 40),
        demand: used(2),
        existing_hosts: Vec::new(),
        shadowed_count: 0,
    }];

    sim.run(&PooledDemand::default(), &splits);

    assert_eq!(sim.placement_count("b"), 1);
    assert!(!sim.can_place("b"));
}

#[test]
fn commitments_reserve_capacity_ahead_of_padding() {
    let mut sim = AzSimulation::new(
        vec![hypervisor("hv1", 2)],
        OvercommitFactor::default(),
        0,
    );
    let splits = vec![SplitDemand {
        flavor: flavor("a", 4, 8192, 20),
        demand: ResourceDemand {
            usage: 1,
            unused_commitments: 1,
            pending_commitments: 1,
        },
        existing_hosts: Vec::new(),
        shadowed_count: 0,
    }];

    sim.run(&PooledDemand::default(), &splits);

    // One used, one committed, one pending, plus padding up to the four
    // slots the two nodes offer.
    assert_eq!(sim.placement_count("a"), 4);
}

#[test]
fn placement_priority_is_biggest_flavor_first() {
    let mut flavors = vec![
        flavor("small", 2, 4096, 10),
        flavor("large", 8, 16384, 40),
    ];
    sort_for_placement(&mut flavors);

    let mut sim = AzSimulation::new(
        vec![hypervisor("hv1", 1)],
        OvercommitFactor::default(),
        0,
    );
    let splits: Vec<SplitDemand> = flavors
        .into_iter()
        .map(|flavor| SplitDemand {
            flavor,
            demand: used(1),
            existing_hosts: Vec::new(),
            shadowed_count: 0,
        })
        .collect();

    sim.run(&PooledDemand::default(), &splits);

    // The large flavor went first and filled the node; the small one lost.
    assert_eq!(sim.placement_count("large"), 1);
    assert_eq!(sim.placement_count("small"), 0);
    assert!(!sim.can_place("small"));
}

#[test]
fn capacity_rollup_subtracts_split_consumption() {
    let builder = test_utils::TestDataBuilder::from_test_name("capacity_rollup");
    let flavor_name = builder.name("flavor", "split");

    let mut sim = AzSimulation::new(
        vec![hypervisor("hv1", 2)],
        OvercommitFactor(2.0),
        0,
    );
    let splits = vec![SplitDemand {
        flavor: flavor(&flavor_name, 8, 8192, 20),
        demand: used(2),
        existing_hosts: Vec::new(),
        shadowed_count: 0,
    }];

    sim.run(&PooledDemand::default(), &splits);

    // 8 logical VCPUs consume 4 physical cores each under overcommit 2.0.
    let placed = sim.placement_count(&flavor_name);
    assert!(placed >= 2);
    let total = sim.total_capacity();
    assert_eq!(total, BinpackVector::new(16, 32768, 80));
    let logical_total = OvercommitFactor(2.0).apply_to(total.vcpus);
    assert_eq!(logical_total, 32);
}
