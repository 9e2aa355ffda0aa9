//! Quota and capacity collection for the compute service.

pub mod capacity;
pub mod client;
pub mod quota;

pub use capacity::NovaCapacityPlugin;
pub use client::{ComputeBackend, HttpComputeBackend};
pub use quota::NovaQuotaPlugin;
