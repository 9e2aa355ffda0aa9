//! Flavor metadata and flavor-name handling.

use std::collections::BTreeMap;
use std::sync::Mutex;

use core_model::ResourceName;
use serde::{Deserialize, Serialize};

/// The extra spec that gives a flavor its own instance quota instead of
/// drawing from the pooled cores/instances/ram resources.
pub const SEPARATE_QUOTA_EXTRA_SPEC: &str = "quota:separate";

/// A named instance sizing template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlavorInfo {
    pub original_name: String,
    pub vcpus: u64,
    pub memory_mib: u64,
    pub disk_gib: u64,
    #[serde(default)]
    pub extra_specs: BTreeMap<String, String>,
}

impl FlavorInfo {
    /// Whether this flavor carries its own per-flavor instance quota.
    pub fn has_separate_instance_quota(&self) -> bool {
        self.extra_specs
            .get(SEPARATE_QUOTA_EXTRA_SPEC)
            .is_some_and(|value| value == "true")
    }

    /// The baremetal resource class this flavor requests, if any.
    pub fn resource_class(&self) -> Option<&str> {
        self.extra_specs
            .iter()
            .find_map(|(key, value)| {
                key.strip_prefix("resources:CUSTOM_")
                    .filter(|_| value == "1")
            })
            .or_else(|| {
                self.extra_specs
                    .get("capabilities:resource_class")
                    .map(String::as_str)
            })
    }
}

/// Orders split flavors for placement: big ones first, so the binpacking
/// simulation fills awkward shapes before convenient ones.
pub fn sort_for_placement(flavors: &mut [FlavorInfo]) {
    flavors.sort_by(|a, b| {
        b.vcpus
            .cmp(&a.vcpus)
            .then(b.memory_mib.cmp(&a.memory_mib))
            .then(b.disk_gib.cmp(&a.disk_gib))
            .then(a.original_name.cmp(&b.original_name))
    });
}

/// Translates between flavor names and the resource names derived from them.
///
/// Some flavors are known to the quota backend under an alias. The table is
/// filled once while listing flavors during init and only read afterwards.
#[derive(Debug, Default)]
pub struct FlavorTranslationTable {
    aliases: Mutex<BTreeMap<String, String>>,
}

impl FlavorTranslationTable {
    pub fn new(aliases: BTreeMap<String, String>) -> Self {
        Self {
            aliases: Mutex::new(aliases),
        }
    }

    /// Records an alias discovered during flavor listing.
    pub fn record_alias(&self, alias: impl Into<String>, canonical: impl Into<String>) {
        self.aliases
            .lock()
            .expect("flavor translation table poisoned")
            .insert(alias.into(), canonical.into());
    }

    /// The canonical flavor name behind a possibly aliased one.
    pub fn canonical_name(&self, name: &str) -> String {
        self.aliases
            .lock()
            .expect("flavor translation table poisoned")
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    /// The resource name under which a flavor's instances are counted.
    pub fn resource_name(&self, flavor_name: &str) -> ResourceName {
        ResourceName::from(format!("instances_{}", self.canonical_name(flavor_name)))
    }

    /// The flavor name behind an `instances_<flavor>` resource, if it is one.
    pub fn flavor_of_resource(resource: &ResourceName) -> Option<&str> {
        resource.as_str().strip_prefix("instances_")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flavor(name: &str, vcpus: u64, memory_mib: u64, disk_gib: u64) -> FlavorInfo {
        FlavorInfo {
            original_name: name.into(),
            vcpus,
            memory_mib,
            disk_gib,
            extra_specs: BTreeMap::new(),
        }
    }

    #[test]
    fn placement_order_is_biggest_first() {
        let mut flavors = vec![
            flavor("small", 2, 4096, 20),
            flavor("huge", 16, 65536, 200),
            flavor("wide", 16, 32768, 200),
        ];
        sort_for_placement(&mut flavors);
        let names: Vec<_> = flavors.iter().map(|f| f.original_name.as_str()).collect();
        assert_eq!(names, vec!["huge", "wide", "small"]);
    }

    #[test]
    fn separate_quota_flag_comes_from_extra_specs() {
        let mut f = flavor("bm", 8, 16384, 100);
        assert!(!f.has_separate_instance_quota());
        f.extra_specs
            .insert(SEPARATE_QUOTA_EXTRA_SPEC.into(), "true".into());
        assert!(f.has_separate_instance_quota());
    }

    #[test]
    fn translation_table_resolves_aliases() {
        let table = FlavorTranslationTable::default();
        table.record_alias("bm_old", "bm");
        assert_eq!(table.canonical_name("bm_old"), "bm");
        assert_eq!(table.canonical_name("bm"), "bm");
        assert_eq!(
            table.resource_name("bm_old"),
            ResourceName::from("instances_bm")
        );
        assert_eq!(
            FlavorTranslationTable::flavor_of_resource(&ResourceName::from("instances_bm")),
            Some("bm")
        );
    }

    #[test]
    fn resource_class_from_custom_resources_spec() {
        let mut f = flavor("bm.large", 0, 0, 0);
        f.extra_specs
            .insert("resources:CUSTOM_BM_LARGE".into(), "1".into());
        assert_eq!(f.resource_class(), Some("BM_LARGE"));
    }
}
