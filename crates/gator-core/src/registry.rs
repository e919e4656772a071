use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::AppError;
use crate::plugin::{Plugin, PluginInfo};

/// Thread-safe plugin lookup by name and by source type.
///
/// Plugins are kept in registration order. When several plugins declare the
/// same source type, the one registered first wins; the order of `register`
/// calls at startup is therefore significant.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: RwLock<Vec<Arc<dyn Plugin>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<dyn Plugin>>> {
        self.plugins.read().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned plugin registry lock");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Arc<dyn Plugin>>> {
        self.plugins.write().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned plugin registry lock");
            poisoned.into_inner()
        })
    }

    pub fn register(&self, plugin: Arc<dyn Plugin>) -> Result<(), AppError> {
        let mut plugins = self.write();
        if plugins.iter().any(|p| p.name() == plugin.name()) {
            return Err(AppError::DuplicatePlugin(plugin.name().to_string()));
        }
        tracing::debug!(
            plugin = plugin.name(),
            types = ?plugin.supported_types(),
            "Registered plugin"
        );
        plugins.push(plugin);
        Ok(())
    }

    /// First registered plugin whose declared types include `source_type`.
    pub fn get_plugin_for_type(&self, source_type: &str) -> Result<Arc<dyn Plugin>, AppError> {
        self.read()
            .iter()
            .find(|p| p.supports(source_type))
            .cloned()
            .ok_or_else(|| AppError::NoPluginFound(source_type.to_string()))
    }

    pub fn get_plugin(&self, name: &str) -> Result<Arc<dyn Plugin>, AppError> {
        self.read()
            .iter()
            .find(|p| p.name() == name)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("plugin {name}")))
    }

    pub fn list_plugins(&self) -> Vec<PluginInfo> {
        self.read().iter().map(|p| PluginInfo::of(p.as_ref())).collect()
    }

    /// Every declared source type, deduplicated, in registration order.
    pub fn list_supported_types(&self) -> Vec<String> {
        let mut types: Vec<String> = Vec::new();
        for plugin in self.read().iter() {
            for t in plugin.supported_types() {
                if !types.iter().any(|seen| seen.eq_ignore_ascii_case(t)) {
                    types.push(t.to_string());
                }
            }
        }
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockPlugin;

    #[test]
    fn test_duplicate_name_rejected() {
        let registry = PluginRegistry::new();
        registry
            .register(Arc::new(MockPlugin::new("shopify", &["SHOPIFY"])))
            .unwrap();
        let err = registry
            .register(Arc::new(MockPlugin::new("shopify", &["OTHER"])))
            .unwrap_err();
        assert!(matches!(err, AppError::DuplicatePlugin(name) if name == "shopify"));
    }

    #[test]
    fn test_lookup_by_type() {
        let registry = PluginRegistry::new();
        registry
            .register(Arc::new(MockPlugin::new("html", &["STACKS", "STACKSKB"])))
            .unwrap();

        let plugin = registry.get_plugin_for_type("STACKSKB").unwrap();
        assert!(plugin.supported_types().contains(&"STACKSKB"));
        assert!(matches!(
            registry.get_plugin_for_type("WIX"),
            Err(AppError::NoPluginFound(t)) if t == "WIX"
        ));
    }

    #[test]
    fn test_first_registered_wins() {
        let registry = PluginRegistry::new();
        registry
            .register(Arc::new(MockPlugin::new("first", &["SHARED"])))
            .unwrap();
        registry
            .register(Arc::new(MockPlugin::new("second", &["SHARED", "OWN"])))
            .unwrap();

        assert_eq!(registry.get_plugin_for_type("SHARED").unwrap().name(), "first");
        assert_eq!(registry.get_plugin_for_type("OWN").unwrap().name(), "second");
        assert_eq!(registry.list_supported_types(), vec!["SHARED", "OWN"]);
        assert_eq!(registry.list_plugins().len(), 2);
    }

    #[test]
    fn test_get_plugin_by_name() {
        let registry = PluginRegistry::new();
        registry
            .register(Arc::new(MockPlugin::new("shopify", &["SHOPIFY"])))
            .unwrap();
        assert!(registry.get_plugin("shopify").is_ok());
        assert!(matches!(
            registry.get_plugin("missing"),
            Err(AppError::NotFound(_))
        ));
    }
}
