//! Storage collectors.
//!
//! Quota/usage and capacity collection for the shared-filesystem service
//! (share types, replicas, capacity-balance split) and the block-storage
//! service (volume types, pool-summed capacity).

pub mod blockstorage;
pub mod sharedfs;

pub use blockstorage::{BlockStorageCapacityPlugin, BlockStorageQuotaPlugin};
pub use sharedfs::{SharedFsCapacityPlugin, SharedFsQuotaPlugin};
