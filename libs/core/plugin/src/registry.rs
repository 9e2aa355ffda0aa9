//! Registries of plugin factories keyed by type id.
//!
//! Registries are explicit objects the orchestrator builds at startup and
//! passes where plugins are instantiated. There is no process-wide mutable
//! registry and no load-time registration ordering to reason about.

use std::collections::BTreeMap;

use crate::contracts::{CapacityPlugin, DiscoveryPlugin, QuotaPlugin};
use crate::error::{CollectorError, CollectorResult};

type Factory<P> = Box<dyn Fn(serde_json::Value) -> CollectorResult<Box<P>> + Send + Sync>;

/// Maps stable plugin type ids to factories.
///
/// The factory receives the plugin's free-form parameter block and
/// deserializes it itself; a bad block fails with `Misconfigured`.
pub struct PluginRegistry<P: ?Sized> {
    factories: BTreeMap<&'static str, Factory<P>>,
}

impl<P: ?Sized> Default for PluginRegistry<P> {
    fn default() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }
}

impl<P: ?Sized> PluginRegistry<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory under a type id.
    ///
    /// Panics on a duplicate id: that is a wiring bug, not a runtime
    /// condition.
    pub fn register<F>(&mut self, type_id: &'static str, factory: F)
    where
        F: Fn(serde_json::Value) -> CollectorResult<Box<P>> + Send + Sync + 'static,
    {
        let previous = self.factories.insert(type_id, Box::new(factory));
        assert!(
            previous.is_none(),
            "plugin type id {type_id:?} registered twice"
        );
    }

    /// Instantiates the plugin registered under `type_id` with its parameter
    /// block.
    pub fn instantiate(
        &self,
        type_id: &str,
        params: serde_json::Value,
    ) -> CollectorResult<Box<P>> {
        let factory = self.factories.get(type_id).ok_or_else(|| {
            CollectorError::Misconfigured(format!("no plugin registered under type id {type_id:?}"))
        })?;
        factory(params)
    }

    pub fn type_ids(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }
}

pub type QuotaPluginRegistry = PluginRegistry<dyn QuotaPlugin>;
pub type CapacityPluginRegistry = PluginRegistry<dyn CapacityPlugin>;
pub type DiscoveryPluginRegistry = PluginRegistry<dyn DiscoveryPlugin>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::StaticDiscovery;

    fn registry() -> DiscoveryPluginRegistry {
        let mut registry = DiscoveryPluginRegistry::new();
        registry.register(StaticDiscovery::TYPE_ID, |params| {
            Ok(Box::new(StaticDiscovery::from_params(params)?))
        });
        registry
    }

    #[test]
    fn instantiates_registered_plugins() {
        let registry = registry();
        let params = serde_json::json!({
            "domains": [{
                "id": "d1", "name": "default",
                "projects": [{"id": "p1", "name": "demo", "parent_id": "d1"}],
            }],
        });
        let plugin = registry.instantiate(StaticDiscovery::TYPE_ID, params).unwrap();
        assert_eq!(plugin.plugin_type_id(), StaticDiscovery::TYPE_ID);
    }

    #[test]
    fn unknown_type_id_is_misconfiguration() {
        let registry = registry();
        let result = registry.instantiate("no-such-plugin", serde_json::json!({}));
        assert!(matches!(result, Err(CollectorError::Misconfigured(_))));
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn duplicate_registration_panics() {
        let mut registry = registry();
        registry.register(StaticDiscovery::TYPE_ID, |params| {
            Ok(Box::new(StaticDiscovery::from_params(params)?))
        });
    }
}
