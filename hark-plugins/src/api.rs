use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use hark_core::{EventListener, HarkError, HarkEventHub, HarkResult, HubEvent, ListenerId, TenantContext};
use hark_tenant::{CacheStore, TenantData, TenantStore};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::plugin::PluginManifest;

/// Storage handles made available to plugins once the host wires them.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn TenantStore>,
    pub cache: Arc<dyn CacheStore>,
}

/// State shared between the runtime and every [`PluginApi`] it hands out.
pub(crate) struct RuntimeShared {
    pub(crate) events: Arc<HarkEventHub>,
    catalog: RwLock<BTreeMap<String, PluginManifest>>,
    services: RwLock<Option<Services>>,
    listeners: Mutex<HashMap<String, Vec<ListenerId>>>,
}

impl RuntimeShared {
    pub(crate) fn new(events: Arc<HarkEventHub>) -> Self {
        Self {
            events,
            catalog: RwLock::new(BTreeMap::new()),
            services: RwLock::new(None),
            listeners: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn publish_manifest(&self, manifest: PluginManifest) {
        self.catalog.write().insert(manifest.name.clone(), manifest);
    }

    pub(crate) fn withdraw_manifest(&self, name: &str) {
        self.catalog.write().remove(name);
    }

    pub(crate) fn wire(&self, services: Services) {
        *self.services.write() = Some(services);
    }

    /// Remove every hub listener `plugin` subscribed through its API.
    pub(crate) fn release_listeners(&self, plugin: &str) -> usize {
        let ids = self.listeners.lock().remove(plugin).unwrap_or_default();
        ids.into_iter().filter(|id| self.events.off(*id)).count()
    }

    pub(crate) fn clear(&self) {
        let owners: Vec<String> = self.listeners.lock().keys().cloned().collect();
        for owner in owners {
            self.release_listeners(&owner);
        }
        self.catalog.write().clear();
    }
}

/// Capabilities a plugin receives from the runtime.
///
/// Cheap to clone. Listeners registered through [`PluginApi::on`] are owned
/// by the plugin and removed when it is unloaded.
#[derive(Clone)]
pub struct PluginApi {
    plugin: String,
    shared: Arc<RuntimeShared>,
}

impl PluginApi {
    pub(crate) fn new(plugin: impl Into<String>, shared: Arc<RuntimeShared>) -> Self {
        Self {
            plugin: plugin.into(),
            shared,
        }
    }

    pub fn plugin_name(&self) -> &str {
        &self.plugin
    }

    /// Publish on the event hub; returns how many listeners ran.
    pub async fn emit(&self, event: &str, payload: Value, tenant: Option<TenantContext>) -> usize {
        let mut hub_event = HubEvent::new(event, payload);
        hub_event.tenant = tenant;
        self.shared.events.emit(hub_event).await
    }

    pub fn on(&self, pattern: &str, listener: EventListener) -> HarkResult<ListenerId> {
        let id = self
            .shared
            .events
            .on(pattern, listener)
            .map_err(|e| HarkError::validation(e.to_string()))?;
        self.shared
            .listeners
            .lock()
            .entry(self.plugin.clone())
            .or_default()
            .push(id);
        Ok(id)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        if let Some(owned) = self.shared.listeners.lock().get_mut(&self.plugin) {
            owned.retain(|l| *l != id);
        }
        self.shared.events.off(id)
    }

    /// Manifest of another loaded plugin.
    pub fn plugin(&self, name: &str) -> Option<PluginManifest> {
        self.shared.catalog.read().get(name).cloned()
    }

    pub fn plugins(&self) -> Vec<PluginManifest> {
        self.shared.catalog.read().values().cloned().collect()
    }

    /// Tenant-scoped data access; fails until the host wires storage.
    pub fn data(&self, tenant: &TenantContext) -> HarkResult<TenantData> {
        let services = self.services()?;
        Ok(TenantData::new(services.store, tenant.clone()))
    }

    pub fn cache(&self) -> HarkResult<Arc<dyn CacheStore>> {
        Ok(self.services()?.cache)
    }

    fn services(&self) -> HarkResult<Services> {
        self.shared
            .services
            .read()
            .clone()
            .ok_or_else(|| HarkError::not_initialized("Storage services have not been wired into the plugin runtime"))
    }

    pub fn generate_id(&self) -> String {
        generate_id()
    }

    pub fn slugify(&self, input: &str) -> String {
        slugify(input)
    }

    pub fn hash(&self, input: &str) -> String {
        hash(input)
    }

    /// Await `fut`, failing with a handler error once `limit` elapses.
    pub async fn with_timeout<T, F>(&self, limit: Duration, fut: F) -> HarkResult<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match tokio::time::timeout(limit, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(HarkError::normalize(e, hark_core::ErrorKind::Handler)),
            Err(_) => Err(HarkError::handler(format!(
                "Plugin '{}' operation timed out after {}ms",
                self.plugin,
                limit.as_millis()
            ))),
        }
    }
}

pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// Lowercase ASCII, runs of anything else collapsed to a single `-`.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    for c in input.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Hex SHA-256.
pub fn hash(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hark_core::{listener, ErrorKind, OrganizationId, PlanTier};
    use hark_tenant::{MemoryCache, MemoryTenantStore};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn api(name: &str) -> (PluginApi, Arc<RuntimeShared>) {
        let shared = Arc::new(RuntimeShared::new(Arc::new(HarkEventHub::new())));
        (PluginApi::new(name, shared.clone()), shared)
    }

    #[test]
    fn utilities() {
        assert_eq!(slugify("  Hello, World -- 2024! "), "hello-world-2024");
        assert_eq!(slugify("***"), "");
        assert_eq!(
            hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_ne!(generate_id(), generate_id());
    }

    #[tokio::test]
    async fn listeners_are_released_with_their_plugin() {
        let (api, shared) = api("notifier");
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        api.on(
            "issue.*",
            listener(move |_event| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        )
        .unwrap();

        assert_eq!(api.emit("issue.created", Value::Null, None).await, 1);
        assert_eq!(shared.release_listeners("notifier"), 1);
        assert_eq!(api.emit("issue.created", Value::Null, None).await, 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn bad_pattern_is_a_validation_error() {
        let (api, _) = api("p");
        let err = api.on("is*ue", listener(|_e| async { Ok(()) })).unwrap_err();
        assert!(err.is(ErrorKind::Validation));
    }

    #[tokio::test]
    async fn data_requires_wired_services() {
        let (api, shared) = api("p");
        let tenant = TenantContext::new(OrganizationId::new(), "acme", PlanTier::Free, None);
        assert!(api.data(&tenant).unwrap_err().is(ErrorKind::NotInitialized));
        assert!(api.cache().is_err());

        shared.wire(Services {
            store: Arc::new(MemoryTenantStore::new()),
            cache: Arc::new(MemoryCache::new()),
        });
        assert_eq!(api.data(&tenant).unwrap().tenant().schema(), "org_acme");
    }

    #[tokio::test]
    async fn with_timeout_bounds_slow_work() {
        let (api, _) = api("slow");
        let err = api
            .with_timeout(Duration::from_millis(10), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(err.is(ErrorKind::Handler));
        assert!(err.message.contains("timed out"));

        let value = api
            .with_timeout(Duration::from_secs(1), async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn catalog_lists_published_manifests() {
        let (api, shared) = api("p");
        shared.publish_manifest(PluginManifest::new("b", "1.0.0", "d"));
        shared.publish_manifest(PluginManifest::new("a", "1.0.0", "d"));
        let names: Vec<String> = api.plugins().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(api.plugin("a").is_some());
        shared.withdraw_manifest("a");
        assert!(api.plugin("a").is_none());
    }
}
