//! Shared test utilities for the collector crates
//!
//! This crate provides reusable test infrastructure:
//! - `TestDataBuilder`: Deterministic test data generation
//! - `fixtures`: Keystone domain/project and AZ fixtures
//! - `assertions`: Custom assertion helpers
//!
//! # Usage
//!
//! ```rust
//! use test_utils::{fixtures, TestDataBuilder};
//!
//! let builder = TestDataBuilder::from_test_name("my_test");
//! let project = fixtures::project("p1", "demo");
//! let azs = fixtures::azs(&["az-1", "az-2"]);
//! ```

use uuid::Uuid;

/// Builder for test data with deterministic randomization
///
/// This ensures tests are reproducible by using seeded random data.
pub struct TestDataBuilder {
    seed: u64,
}

impl TestDataBuilder {
    /// Create a new builder with a seed (for deterministic tests)
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Create from test name (generates seed from test name hash)
    ///
    /// This is the recommended way to create a builder for consistent test data.
    pub fn from_test_name(name: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self::new(hasher.finish())
    }

    /// Generate a deterministic UUID for testing
    pub fn project_id(&self) -> Uuid {
        let bytes = self.seed.to_le_bytes();
        let mut uuid_bytes = [0u8; 16];
        uuid_bytes[..8].copy_from_slice(&bytes);
        uuid_bytes[8..16].copy_from_slice(&bytes);
        Uuid::from_bytes(uuid_bytes)
    }

    /// Generate a unique name for testing
    ///
    /// # Arguments
    ///
    /// * `prefix` - The type of thing (e.g., "project", "flavor")
    /// * `suffix` - A unique identifier within the test (e.g., "main", "backup")
    pub fn name(&self, prefix: &str, suffix: &str) -> String {
        format!("test-{}-{}-{}", prefix, self.seed, suffix)
    }
}

/// Ready-made domain objects for collector tests
pub mod fixtures {
    use core_model::{AvailabilityZone, KeystoneDomain, KeystoneProject};

    /// A domain named `default` with uuid `d1`
    pub fn domain() -> KeystoneDomain {
        KeystoneDomain {
            uuid: "d1".into(),
            name: "default".into(),
        }
    }

    /// A project inside [`domain`]
    pub fn project(uuid: &str, name: &str) -> KeystoneProject {
        KeystoneProject::new(uuid, name, domain())
    }

    /// An AZ list from labels
    pub fn azs(labels: &[&str]) -> Vec<AvailabilityZone> {
        labels.iter().map(|label| AvailabilityZone::from(*label)).collect()
    }
}

/// Test assertion helpers
pub mod assertions {
    use core_model::{AvailabilityZone, PerAz, UsageData};

    /// Assert that an optional value is Some
    pub fn assert_some<T>(value: Option<T>, context: &str) -> T {
        value.unwrap_or_else(|| panic!("{}: expected Some, got None", context))
    }

    /// Assert the usage recorded for one AZ
    pub fn assert_az_usage(per_az: &PerAz<UsageData>, az: &str, expected: u64, context: &str) {
        let zone = AvailabilityZone::from(az);
        let data = per_az
            .get(&zone)
            .unwrap_or_else(|| panic!("{}: no entry for AZ {}", context, az));
        assert_eq!(
            data.usage, expected,
            "{}: expected usage {} in AZ {}, got {}",
            context, expected, az, data.usage
        );
    }
}

/// Initialize tracing for a test run. Safe to call repeatedly.
pub fn init_test_tracing() {
    core_config::tracing::init_tracing(&core_config::Environment::Development);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_builder_deterministic() {
        let builder1 = TestDataBuilder::new(42);
        let builder2 = TestDataBuilder::new(42);

        assert_eq!(builder1.project_id(), builder2.project_id());
        assert_eq!(
            builder1.name("project", "test"),
            builder2.name("project", "test")
        );
    }

    #[test]
    fn test_data_builder_different_names() {
        let builder1 = TestDataBuilder::from_test_name("test1");
        let builder2 = TestDataBuilder::from_test_name("test2");

        // Different test names should generate different data
        assert_ne!(builder1.project_id(), builder2.project_id());
    }

    #[test]
    fn fixtures_build_consistent_projects() {
        let project = fixtures::project("p1", "demo");
        assert_eq!(project.parent_uuid, "d1");
        assert_eq!(project.domain.name, "default");
    }
}
