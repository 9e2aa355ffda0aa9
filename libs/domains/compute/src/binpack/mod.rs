//! The hypervisor binpacking capacity engine.
//!
//! Capacity for compute resources cannot be read off an API: it depends on
//! how demanded instances of heterogeneous flavors fit onto hypervisor
//! nodes. This module simulates that placement deterministically, so that
//! capacity reports stay stable for unchanged inputs.

pub mod engine;
pub mod hypervisor;
pub mod node;
pub mod vector;

pub use engine::{AzSimulation, PooledDemand, SplitDemand};
pub use hypervisor::{BinpackHypervisor, HypervisorInventory, InventoryMetric};
pub use node::{BinpackInstance, BinpackNode, PlacementReason};
pub use vector::{BinpackVector, OvercommitFactor};
