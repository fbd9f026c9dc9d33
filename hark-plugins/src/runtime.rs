use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hark_core::{
    bail_hark, HarkConfigSnapshot, HarkError, HarkEventHub, HarkResult, HubEvent, RuntimeConfig, TenantContext,
};
use hark_tenant::{CacheStore, TenantStore};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{error, info, info_span, instrument, warn, Instrument, Span};

use crate::api::{PluginApi, RuntimeShared, Services};
use crate::factory::{PluginContext, PluginFactories};
use crate::hooks::HookTable;
use crate::manifest::{discover, load_manifest};
use crate::plugin::{DomainEvent, EventKind, Plugin, PluginId, PluginManifest};
use crate::registry::{DispatchSummary, PluginRecord, PluginRegistry};

struct LoadedPlugin {
    id: PluginId,
    plugin: Arc<dyn Plugin>,
    span: Span,
}

/// Hosts plugins: loads them from disk, wires their hooks and capability
/// API, and routes events through hooks, the event hub and the registry.
pub struct PluginRuntime {
    config: RuntimeConfig,
    registry: Arc<PluginRegistry>,
    hooks: Arc<HookTable>,
    shared: Arc<RuntimeShared>,
    factories: PluginFactories,
    loaded: RwLock<HashMap<String, LoadedPlugin>>,
    initialized: AtomicBool,
    // Serializes initialize/register/unregister/shutdown.
    ops: tokio::sync::Mutex<()>,
}

impl PluginRuntime {
    pub fn new(config: RuntimeConfig, factories: PluginFactories) -> Self {
        Self::with_event_hub(config, factories, Arc::new(HarkEventHub::new()))
    }

    pub fn with_event_hub(config: RuntimeConfig, factories: PluginFactories, events: Arc<HarkEventHub>) -> Self {
        Self {
            hooks: Arc::new(HookTable::new(config.mode)),
            config,
            registry: Arc::new(PluginRegistry::new()),
            shared: Arc::new(RuntimeShared::new(events)),
            factories,
            loaded: RwLock::new(HashMap::new()),
            initialized: AtomicBool::new(false),
            ops: tokio::sync::Mutex::new(()),
        }
    }

    pub fn from_config(snapshot: &HarkConfigSnapshot, factories: PluginFactories) -> HarkResult<Self> {
        Ok(Self::new(RuntimeConfig::from_snapshot(snapshot)?, factories))
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn hooks(&self) -> &Arc<HookTable> {
        &self.hooks
    }

    pub fn events(&self) -> &Arc<HarkEventHub> {
        &self.shared.events
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Names and ids of plugins loaded through this runtime, ordered by name.
    pub fn loaded_plugins(&self) -> Vec<PluginId> {
        let mut ids: Vec<PluginId> = self.loaded.read().values().map(|p| p.id.clone()).collect();
        ids.sort();
        ids
    }

    pub fn plugin_id(&self, name: &str) -> Option<PluginId> {
        self.loaded.read().get(name).map(|p| p.id.clone())
    }

    /// Build the construction context for a plugin registered by hand.
    pub fn context_for(&self, manifest: PluginManifest) -> PluginContext {
        PluginContext {
            api: PluginApi::new(manifest.name.clone(), self.shared.clone()),
            span: plugin_span(&manifest),
            manifest,
        }
    }

    /// Make tenant storage reachable through `PluginApi::data`.
    pub fn wire_services(&self, store: Arc<dyn TenantStore>, cache: Arc<dyn CacheStore>) {
        self.shared.wire(Services { store, cache });
        info!("storage services wired into plugin runtime");
    }

    /// Discover and load every plugin under the configured directory.
    ///
    /// Runs once; later calls log a warning and return an empty list. In
    /// development mode the first plugin that fails aborts the whole run and
    /// unloads whatever this run had loaded. In production a failing plugin
    /// is logged and skipped.
    #[instrument(skip_all, fields(dir = %self.config.plugins_dir.display(), mode = ?self.config.mode))]
    pub async fn initialize(&self) -> HarkResult<Vec<PluginId>> {
        let _ops = self.ops.lock().await;
        if self.initialized.swap(true, Ordering::SeqCst) {
            warn!("plugin runtime already initialized");
            return Ok(Vec::new());
        }
        if !self.config.auto_load {
            info!("plugin auto-load disabled");
            return Ok(Vec::new());
        }

        let dirs = match discover(&self.config.plugins_dir).await {
            Ok(dirs) => dirs,
            Err(e) => {
                self.initialized.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let mut loaded = Vec::new();
        for dir in dirs {
            match self.load_from_dir(&dir).await {
                Ok(id) => loaded.push(id),
                Err(e) if self.config.mode.is_development() => {
                    error!(plugin_dir = %dir.display(), error = %e, "plugin failed to load; aborting initialization");
                    for id in loaded.iter().rev() {
                        if let Err(unload) = self.unload_locked(id.name()).await {
                            warn!(plugin = %id, error = %unload, "rollback unload failed");
                        }
                    }
                    self.initialized.store(false, Ordering::SeqCst);
                    return Err(e);
                }
                Err(e) => {
                    warn!(plugin_dir = %dir.display(), error = %e, "plugin failed to load; skipping");
                }
            }
        }

        info!(count = loaded.len(), "plugin runtime initialized");
        Ok(loaded)
    }

    async fn load_from_dir(&self, dir: &Path) -> HarkResult<PluginId> {
        let manifest = load_manifest(dir).await?;
        let key = manifest.entry_key().to_string();
        let factory = self.factories.get(&key).cloned().ok_or_else(|| {
            HarkError::configuration(format!(
                "No factory registered for plugin '{}' (entry '{key}')",
                manifest.name
            ))
        })?;

        let ctx = self.context_for(manifest.clone());
        let span = ctx.span.clone();
        let plugin = span.in_scope(|| factory(ctx)).map_err(|e| {
            HarkError::activation(format!("Plugin '{}' could not be constructed: {e}", manifest.name)).with_source(e)
        })?;

        if plugin.manifest().name != manifest.name || plugin.manifest().version != manifest.version {
            return Err(HarkError::validation(format!(
                "Factory for '{}' produced plugin '{}'",
                manifest.id(),
                plugin.manifest().id()
            )));
        }

        self.install_locked(plugin, span, manifest.config.clone(), self.config.auto_activate)
            .await
    }

    /// Register a plugin built by the host. The plugin is left `Installed`.
    pub async fn register_plugin(&self, plugin: Arc<dyn Plugin>, config: Value) -> HarkResult<PluginId> {
        let _ops = self.ops.lock().await;
        let span = plugin_span(plugin.manifest());
        self.install_locked(plugin, span, config, false).await
    }

    async fn install_locked(
        &self,
        plugin: Arc<dyn Plugin>,
        span: Span,
        config: Value,
        activate: bool,
    ) -> HarkResult<PluginId> {
        let manifest = plugin.manifest().clone();
        if self.loaded.read().contains_key(&manifest.name) {
            bail_hark!(already_registered, "Plugin '{}' is already loaded", manifest.name);
        }

        let hooks = plugin.hooks();
        if let Some(undeclared) = hooks.iter().find(|spec| !manifest.declares_hook(&spec.hook)) {
            bail_hark!(
                validation,
                "Plugin '{}' attaches to undeclared hook '{}'",
                manifest.name,
                undeclared.hook
            );
        }

        plugin.initialize().instrument(span.clone()).await.map_err(|e| {
            HarkError::activation(format!("Plugin '{}' failed to initialize: {e}", manifest.name)).with_source(e)
        })?;

        let id = match self.registry.register(plugin.clone(), config).instrument(span.clone()).await {
            Ok(id) => id,
            Err(e) => {
                if let Err(destroy) = plugin.destroy().instrument(span.clone()).await {
                    warn!(plugin = %manifest.name, error = %destroy, "destroy after failed registration");
                }
                return Err(e);
            }
        };

        for spec in hooks {
            self.hooks
                .register_with_priority(&spec.hook, &manifest.name, spec.priority, spec.handler);
        }
        self.shared.publish_manifest(manifest.clone());
        self.loaded.write().insert(
            manifest.name.clone(),
            LoadedPlugin {
                id: id.clone(),
                plugin,
                span: span.clone(),
            },
        );
        span.in_scope(|| info!("plugin loaded"));

        if activate {
            if let Err(e) = self.registry.activate(&id).instrument(span).await {
                if self.config.mode.is_development() {
                    if let Err(unload) = self.unload_locked(&manifest.name).await {
                        warn!(plugin = %id, error = %unload, "unload after failed activation");
                    }
                    return Err(e);
                }
                warn!(plugin = %id, error = %e, "plugin left in error state");
            }
        }
        Ok(id)
    }

    /// Detach a plugin's hooks and listeners, then deactivate, uninstall and
    /// destroy it.
    pub async fn unregister_plugin(&self, name: &str) -> HarkResult<PluginRecord> {
        let _ops = self.ops.lock().await;
        self.unload_locked(name).await
    }

    async fn unload_locked(&self, name: &str) -> HarkResult<PluginRecord> {
        let loaded = self
            .loaded
            .write()
            .remove(name)
            .ok_or_else(|| HarkError::not_found(format!("Plugin '{name}' is not loaded")))?;

        let hooks_removed = self.hooks.unregister_all(name);
        let listeners_removed = self.shared.release_listeners(name);
        self.shared.withdraw_manifest(name);

        let record = self.registry.unregister(&loaded.id).instrument(loaded.span.clone()).await;
        if let Err(e) = loaded.plugin.destroy().instrument(loaded.span.clone()).await {
            warn!(plugin = %loaded.id, error = %e, "destroy hook failed");
        }

        info!(plugin = %loaded.id, hooks_removed, listeners_removed, "plugin unloaded");
        record
    }

    /// Run the transformation chain for `hook`.
    pub async fn execute_hooks(&self, hook: &str, payload: Value, tenant: Option<&TenantContext>) -> HarkResult<Value> {
        self.hooks.run(hook, payload, tenant).await
    }

    /// Transform `payload` through the hooks named `event`, then publish the
    /// result on the event hub. Returns the transformed payload.
    pub async fn emit_event(&self, event: &str, payload: Value, tenant: Option<TenantContext>) -> HarkResult<Value> {
        let payload = self.hooks.run(event, payload, tenant.as_ref()).await?;
        let mut hub_event = HubEvent::new(event, payload.clone());
        hub_event.tenant = tenant;
        self.shared.events.emit(hub_event).await;
        Ok(payload)
    }

    /// Transform `payload` through the hooks named after `kind`, then deliver
    /// it to every active plugin that handles `kind`.
    pub async fn dispatch(
        &self,
        kind: impl Into<EventKind>,
        payload: Value,
        tenant: Option<TenantContext>,
    ) -> HarkResult<DispatchSummary> {
        let kind = kind.into();
        let payload = self.hooks.run(kind.as_str(), payload, tenant.as_ref()).await?;
        let event = DomainEvent::new(kind, payload).with_tenant(tenant);
        Ok(self.registry.emit(&event).await)
    }

    /// Destroy every loaded plugin and clear hooks, listeners and records.
    ///
    /// Destroy failures are logged. The runtime may be initialized again.
    #[instrument(skip_all)]
    pub async fn shutdown(&self) -> usize {
        let _ops = self.ops.lock().await;
        let drained: Vec<(String, LoadedPlugin)> = self.loaded.write().drain().collect();
        let count = drained.len();

        for (name, loaded) in drained {
            self.hooks.unregister_all(&name);
            if let Err(e) = loaded.plugin.destroy().instrument(loaded.span.clone()).await {
                warn!(plugin = %loaded.id, error = %e, "destroy hook failed during shutdown");
            }
            self.registry.forget(&loaded.id);
        }
        self.shared.clear();
        self.initialized.store(false, Ordering::SeqCst);

        info!(count, "plugin runtime shut down");
        count
    }
}

fn plugin_span(manifest: &PluginManifest) -> Span {
    info_span!("plugin", name = %manifest.name, version = %manifest.version)
}
