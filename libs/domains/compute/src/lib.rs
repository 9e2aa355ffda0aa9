//! Compute collectors.
//!
//! Quota/usage collection for the compute service, capacity derived from a
//! deterministic binpacking simulation over hypervisor nodes, and baremetal
//! node capacity.

pub mod baremetal;
pub mod binpack;
pub mod flavors;
pub mod nova;

pub use baremetal::BaremetalCapacityPlugin;
pub use flavors::{FlavorInfo, FlavorTranslationTable};
pub use nova::capacity::NovaCapacityPlugin;
pub use nova::quota::NovaQuotaPlugin;
