//! The block-storage service: volume types, snapshots, pool capacity.

pub mod capacity;
pub mod client;
pub mod quota;

pub use capacity::BlockStorageCapacityPlugin;
pub use client::{BlockStorageBackend, HttpBlockStorageBackend};
pub use quota::BlockStorageQuotaPlugin;
