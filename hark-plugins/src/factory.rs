use std::collections::HashMap;
use std::sync::Arc;

use tracing::Span;

use crate::api::PluginApi;
use crate::plugin::{Plugin, PluginManifest};

/// Everything a plugin is constructed with.
#[derive(Clone)]
pub struct PluginContext {
    pub manifest: PluginManifest,
    pub api: PluginApi,
    /// Span carrying the plugin's name and version; lifecycle calls run inside it.
    pub span: Span,
}

impl PluginContext {
    pub fn name(&self) -> &str {
        &self.manifest.name
    }
}

pub type PluginFactory = Arc<dyn Fn(PluginContext) -> anyhow::Result<Arc<dyn Plugin>> + Send + Sync>;

/// Constructors for plugins discovered on disk, keyed by manifest entry.
#[derive(Clone, Default)]
pub struct PluginFactories {
    factories: HashMap<String, PluginFactory>,
}

impl PluginFactories {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, key: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(PluginContext) -> anyhow::Result<Arc<dyn Plugin>> + Send + Sync + 'static,
    {
        self.factories.insert(key.into(), Arc::new(factory));
        self
    }

    pub fn with<F>(mut self, key: impl Into<String>, factory: F) -> Self
    where
        F: Fn(PluginContext) -> anyhow::Result<Arc<dyn Plugin>> + Send + Sync + 'static,
    {
        self.register(key, factory);
        self
    }

    pub fn get(&self, key: &str) -> Option<&PluginFactory> {
        self.factories.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }

    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}
