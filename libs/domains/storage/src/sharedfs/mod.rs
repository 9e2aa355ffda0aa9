//! The shared-filesystem service: share types, replicas, snapshots.

pub mod capacity;
pub mod client;
pub mod quota;

pub use capacity::SharedFsCapacityPlugin;
pub use client::{HttpSharedFsBackend, SharedFsBackend};
pub use quota::SharedFsQuotaPlugin;
