use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::FutureExt;
use hark_core::{bail_hark, HarkError, HarkResult};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::manifest::validate_manifest;
use crate::plugin::{DomainEvent, EventKind, Plugin, PluginId, PluginManifest, PluginStatus};

/// Lifecycle notifications published by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RegistryEvent {
    Registered { id: PluginId, at: DateTime<Utc> },
    Activated { id: PluginId, at: DateTime<Utc> },
    Deactivated { id: PluginId, at: DateTime<Utc> },
    Failed { id: PluginId, error: String, at: DateTime<Utc> },
    Unregistered { id: PluginId, at: DateTime<Utc> },
}

impl RegistryEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Registered { .. } => "plugin.registered",
            Self::Activated { .. } => "plugin.activated",
            Self::Deactivated { .. } => "plugin.deactivated",
            Self::Failed { .. } => "plugin.error",
            Self::Unregistered { .. } => "plugin.unregistered",
        }
    }

    pub fn plugin_id(&self) -> &PluginId {
        match self {
            Self::Registered { id, .. }
            | Self::Activated { id, .. }
            | Self::Deactivated { id, .. }
            | Self::Failed { id, .. }
            | Self::Unregistered { id, .. } => id,
        }
    }
}

/// Point-in-time view of one registered plugin.
#[derive(Debug, Clone, Serialize)]
pub struct PluginRecord {
    pub id: PluginId,
    pub manifest: PluginManifest,
    pub status: PluginStatus,
    pub last_error: Option<String>,
    pub handled_events: Vec<EventKind>,
    pub config: Value,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PluginHealth {
    pub healthy: usize,
    pub unhealthy: usize,
    pub total: usize,
}

/// Outcome of one [`PluginRegistry::emit`].
#[derive(Debug, Clone, Default)]
pub struct DispatchSummary {
    pub event: String,
    pub delivered: usize,
    pub succeeded: usize,
    pub failed: Vec<(PluginId, String)>,
}

impl DispatchSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

struct SlotState {
    status: PluginStatus,
    last_error: Option<String>,
    updated_at: DateTime<Utc>,
}

struct PluginSlot {
    id: PluginId,
    plugin: Arc<dyn Plugin>,
    manifest: PluginManifest,
    handled: HashSet<EventKind>,
    config: Value,
    registered_at: DateTime<Utc>,
    state: Mutex<SlotState>,
    // Serializes activate/deactivate/unregister for this plugin.
    lifecycle: tokio::sync::Mutex<()>,
}

impl PluginSlot {
    fn status(&self) -> PluginStatus {
        self.state.lock().status
    }

    fn set_status(&self, status: PluginStatus, error: Option<String>) {
        let mut state = self.state.lock();
        state.status = status;
        state.last_error = error;
        state.updated_at = Utc::now();
    }

    /// Move an `Active` plugin to `Error`. Returns false, leaving the state
    /// untouched, when the plugin has left `Active` in the meantime.
    fn fail_if_active(&self, error: String) -> bool {
        let mut state = self.state.lock();
        if state.status != PluginStatus::Active {
            return false;
        }
        state.status = PluginStatus::Error;
        state.last_error = Some(error);
        state.updated_at = Utc::now();
        true
    }

    fn record(&self) -> PluginRecord {
        let state = self.state.lock();
        let mut handled_events: Vec<EventKind> = self.handled.iter().cloned().collect();
        handled_events.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        PluginRecord {
            id: self.id.clone(),
            manifest: self.manifest.clone(),
            status: state.status,
            last_error: state.last_error.clone(),
            handled_events,
            config: self.config.clone(),
            registered_at: self.registered_at,
            updated_at: state.updated_at,
        }
    }
}

/// Authoritative store of plugin records and their lifecycle state.
///
/// Event dispatch works on a snapshot of eligible plugins taken before any
/// handler runs; no lock is held while plugin code executes.
pub struct PluginRegistry {
    plugins: RwLock<HashMap<PluginId, Arc<PluginSlot>>>,
    registration: tokio::sync::Mutex<()>,
    event_broadcaster: broadcast::Sender<RegistryEvent>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        let (event_broadcaster, _) = broadcast::channel(256);
        Self {
            plugins: RwLock::new(HashMap::new()),
            registration: tokio::sync::Mutex::new(()),
            event_broadcaster,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_broadcaster.subscribe()
    }

    fn publish(&self, event: RegistryEvent) {
        let _ = self.event_broadcaster.send(event);
    }

    fn slot(&self, id: &PluginId) -> HarkResult<Arc<PluginSlot>> {
        self.plugins
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| HarkError::not_found(format!("Plugin '{id}' is not registered")))
    }

    /// Validate, install and record a plugin with status `Installed`.
    ///
    /// Names are unique: a second registration under the same name fails
    /// whatever its version. If the install hook fails nothing is recorded.
    #[instrument(skip_all, fields(plugin = %plugin.manifest().id()))]
    pub async fn register(&self, plugin: Arc<dyn Plugin>, config: Value) -> HarkResult<PluginId> {
        let manifest = plugin.manifest().clone();
        validate_manifest(&manifest)?;
        let id = manifest.id();

        if !plugin.validate_config(&config) {
            bail_hark!(validation, "Invalid configuration for plugin '{}'", id);
        }

        let _registering = self.registration.lock().await;
        if self.plugins.read().keys().any(|existing| existing.name() == manifest.name) {
            bail_hark!(already_registered, "Plugin '{}' is already registered", manifest.name);
        }

        plugin.install(&config).await.map_err(|e| {
            HarkError::activation(format!("Plugin '{id}' failed to install: {e}")).with_source(e)
        })?;

        let now = Utc::now();
        let slot = PluginSlot {
            id: id.clone(),
            handled: plugin.handled_events().into_iter().collect(),
            plugin,
            manifest,
            config,
            registered_at: now,
            state: Mutex::new(SlotState {
                status: PluginStatus::Installed,
                last_error: None,
                updated_at: now,
            }),
            lifecycle: tokio::sync::Mutex::new(()),
        };
        self.plugins.write().insert(id.clone(), Arc::new(slot));

        info!("plugin registered");
        self.publish(RegistryEvent::Registered { id: id.clone(), at: now });
        Ok(id)
    }

    /// Run the activate hook. Activating an active plugin is a no-op; a
    /// plugin in `Error` may be activated again.
    #[instrument(skip_all, fields(plugin = %id))]
    pub async fn activate(&self, id: &PluginId) -> HarkResult<()> {
        let slot = self.slot(id)?;
        let _transition = slot.lifecycle.lock().await;
        if slot.status() == PluginStatus::Active {
            debug!("plugin already active");
            return Ok(());
        }

        match slot.plugin.activate().await {
            Ok(()) => {
                slot.set_status(PluginStatus::Active, None);
                info!("plugin activated");
                self.publish(RegistryEvent::Activated { id: id.clone(), at: Utc::now() });
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                slot.set_status(PluginStatus::Error, Some(message.clone()));
                warn!(error = %message, "plugin activation failed");
                self.publish(RegistryEvent::Failed {
                    id: id.clone(),
                    error: message.clone(),
                    at: Utc::now(),
                });
                Err(HarkError::activation(format!("Plugin '{id}' failed to activate: {message}")).with_source(e))
            }
        }
    }

    /// Run the deactivate hook for an `Active` or `Error` plugin; otherwise a no-op.
    #[instrument(skip_all, fields(plugin = %id))]
    pub async fn deactivate(&self, id: &PluginId) -> HarkResult<()> {
        let slot = self.slot(id)?;
        let _transition = slot.lifecycle.lock().await;
        self.deactivate_locked(&slot).await
    }

    async fn deactivate_locked(&self, slot: &PluginSlot) -> HarkResult<()> {
        if !matches!(slot.status(), PluginStatus::Active | PluginStatus::Error) {
            debug!(status = %slot.status(), "nothing to deactivate");
            return Ok(());
        }

        match slot.plugin.deactivate().await {
            Ok(()) => {
                slot.set_status(PluginStatus::Inactive, None);
                info!("plugin deactivated");
                self.publish(RegistryEvent::Deactivated {
                    id: slot.id.clone(),
                    at: Utc::now(),
                });
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                slot.set_status(PluginStatus::Error, Some(message.clone()));
                warn!(error = %message, "plugin deactivation failed");
                self.publish(RegistryEvent::Failed {
                    id: slot.id.clone(),
                    error: message.clone(),
                    at: Utc::now(),
                });
                Err(HarkError::activation(format!(
                    "Plugin '{}' failed to deactivate: {message}",
                    slot.id
                ))
                .with_source(e))
            }
        }
    }

    /// Deliver `event` to every active plugin that handles its kind.
    ///
    /// Handlers run concurrently and every one is awaited. A failing or
    /// panicking handler moves its plugin to `Error` without affecting the
    /// others; the caller never sees a plugin failure.
    #[instrument(skip_all, fields(event = %event.name()))]
    pub async fn emit(&self, event: &DomainEvent) -> DispatchSummary {
        let targets: Vec<Arc<PluginSlot>> = self
            .plugins
            .read()
            .values()
            .filter(|slot| slot.handled.contains(&event.kind) && slot.status() == PluginStatus::Active)
            .cloned()
            .collect();

        let mut summary = DispatchSummary {
            event: event.name().to_string(),
            delivered: targets.len(),
            ..DispatchSummary::default()
        };
        if targets.is_empty() {
            return summary;
        }

        let outcomes = join_all(targets.iter().map(|slot| async move {
            let outcome = AssertUnwindSafe(slot.plugin.handle_event(event))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(panic) => Err(format!("handler panicked: {}", panic_message(panic.as_ref()))),
            }
        }))
        .await;

        for (slot, outcome) in targets.iter().zip(outcomes) {
            match outcome {
                Ok(()) => summary.succeeded += 1,
                Err(message) => {
                    warn!(plugin = %slot.id, error = %message, "plugin event handler failed");
                    if slot.fail_if_active(message.clone()) {
                        self.publish(RegistryEvent::Failed {
                            id: slot.id.clone(),
                            error: message.clone(),
                            at: Utc::now(),
                        });
                    } else {
                        debug!(plugin = %slot.id, "plugin left active state during dispatch; status kept");
                    }
                    summary.failed.push((slot.id.clone(), message));
                }
            }
        }
        summary
    }

    pub fn health_check(&self) -> PluginHealth {
        let plugins = self.plugins.read();
        let mut health = PluginHealth {
            healthy: 0,
            unhealthy: 0,
            total: plugins.len(),
        };
        for slot in plugins.values() {
            match slot.status() {
                PluginStatus::Active => health.healthy += 1,
                PluginStatus::Error => health.unhealthy += 1,
                _ => {}
            }
        }
        health
    }

    pub fn get(&self, id: &PluginId) -> Option<PluginRecord> {
        self.plugins.read().get(id).map(|slot| slot.record())
    }

    pub fn find_by_name(&self, name: &str) -> Option<PluginId> {
        self.plugins.read().keys().find(|id| id.name() == name).cloned()
    }

    pub fn status(&self, id: &PluginId) -> Option<PluginStatus> {
        self.plugins.read().get(id).map(|slot| slot.status())
    }

    /// All records, ordered by id.
    pub fn list(&self) -> Vec<PluginRecord> {
        let mut records: Vec<PluginRecord> = self.plugins.read().values().map(|slot| slot.record()).collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    pub fn len(&self) -> usize {
        self.plugins.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.read().is_empty()
    }

    /// Deactivate (if needed), run the uninstall hook and drop the record.
    ///
    /// Hook failures are logged; the record is removed regardless. Only the
    /// runtime calls this, after it has detached the plugin's hooks.
    pub(crate) async fn unregister(&self, id: &PluginId) -> HarkResult<PluginRecord> {
        let slot = self.slot(id)?;
        let _transition = slot.lifecycle.lock().await;

        if let Err(e) = self.deactivate_locked(&slot).await {
            warn!(plugin = %id, error = %e, "deactivate failed during unregister");
        }
        if let Err(e) = slot.plugin.uninstall().await {
            warn!(plugin = %id, error = %e, "uninstall hook failed");
        }

        let record = slot.record();
        self.plugins.write().remove(id);
        info!(plugin = %id, "plugin unregistered");
        self.publish(RegistryEvent::Unregistered {
            id: id.clone(),
            at: Utc::now(),
        });
        Ok(record)
    }

    /// Drop the record without running any lifecycle hook.
    pub(crate) fn forget(&self, id: &PluginId) -> Option<PluginRecord> {
        let slot = self.plugins.write().remove(id)?;
        Some(slot.record())
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hark_core::ErrorKind;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Tracker {
        manifest: PluginManifest,
        handles: Vec<EventKind>,
        fail_install: bool,
        fail_activate: bool,
        fail_handler: bool,
        activations: AtomicUsize,
        deactivations: AtomicUsize,
        handled: AtomicUsize,
    }

    impl Tracker {
        fn new(name: &str) -> Self {
            Self {
                manifest: PluginManifest::new(name, "1.0.0", "test plugin"),
                handles: vec![EventKind::IssueCreated],
                fail_install: false,
                fail_activate: false,
                fail_handler: false,
                activations: AtomicUsize::new(0),
                deactivations: AtomicUsize::new(0),
                handled: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Plugin for Tracker {
        fn manifest(&self) -> &PluginManifest {
            &self.manifest
        }

        fn handled_events(&self) -> Vec<EventKind> {
            self.handles.clone()
        }

        fn validate_config(&self, config: &Value) -> bool {
            config.get("reject").is_none()
        }

        async fn install(&self, _config: &Value) -> anyhow::Result<()> {
            if self.fail_install {
                anyhow::bail!("disk full");
            }
            Ok(())
        }

        async fn activate(&self) -> anyhow::Result<()> {
            self.activations.fetch_add(1, Ordering::SeqCst);
            if self.fail_activate {
                anyhow::bail!("missing token");
            }
            Ok(())
        }

        async fn deactivate(&self) -> anyhow::Result<()> {
            self.deactivations.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn handle_event(&self, _event: &DomainEvent) -> anyhow::Result<()> {
            self.handled.fetch_add(1, Ordering::SeqCst);
            if self.fail_handler {
                anyhow::bail!("webhook unreachable");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn lifecycle_transitions() {
        let registry = PluginRegistry::new();
        let tracker = Arc::new(Tracker::new("p"));
        let id = registry.register(tracker.clone(), json!({})).await.unwrap();
        assert_eq!(registry.status(&id), Some(PluginStatus::Installed));

        registry.activate(&id).await.unwrap();
        registry.activate(&id).await.unwrap();
        assert_eq!(tracker.activations.load(Ordering::SeqCst), 1);
        assert_eq!(registry.status(&id), Some(PluginStatus::Active));

        registry.deactivate(&id).await.unwrap();
        registry.deactivate(&id).await.unwrap();
        assert_eq!(tracker.deactivations.load(Ordering::SeqCst), 1);
        assert_eq!(registry.status(&id), Some(PluginStatus::Inactive));
    }

    #[tokio::test]
    async fn deactivating_installed_plugin_is_noop() {
        let registry = PluginRegistry::new();
        let tracker = Arc::new(Tracker::new("p"));
        let id = registry.register(tracker.clone(), Value::Null).await.unwrap();
        registry.deactivate(&id).await.unwrap();
        assert_eq!(tracker.deactivations.load(Ordering::SeqCst), 0);
        assert_eq!(registry.status(&id), Some(PluginStatus::Installed));
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected() {
        let registry = PluginRegistry::new();
        registry.register(Arc::new(Tracker::new("p")), Value::Null).await.unwrap();

        let mut newer = Tracker::new("p");
        newer.manifest.version = "2.0.0".into();
        let err = registry.register(Arc::new(newer), Value::Null).await.unwrap_err();
        assert!(err.is(ErrorKind::AlreadyRegistered));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn rejected_config_and_failed_install_leave_no_record() {
        let registry = PluginRegistry::new();
        let err = registry
            .register(Arc::new(Tracker::new("p")), json!({ "reject": true }))
            .await
            .unwrap_err();
        assert!(err.is(ErrorKind::Validation));

        let mut broken = Tracker::new("p");
        broken.fail_install = true;
        let err = registry.register(Arc::new(broken), Value::Null).await.unwrap_err();
        assert!(err.is(ErrorKind::Activation));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn activate_unknown_plugin_fails() {
        let registry = PluginRegistry::new();
        let err = registry.activate(&PluginId::new("ghost", "1.0.0")).await.unwrap_err();
        assert!(err.is(ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn failed_activation_records_error_and_allows_retry() {
        let registry = PluginRegistry::new();
        let mut tracker = Tracker::new("p");
        tracker.fail_activate = true;
        let id = registry.register(Arc::new(tracker), Value::Null).await.unwrap();

        let err = registry.activate(&id).await.unwrap_err();
        assert!(err.is(ErrorKind::Activation));
        let record = registry.get(&id).unwrap();
        assert_eq!(record.status, PluginStatus::Error);
        assert_eq!(record.last_error.as_deref(), Some("missing token"));
        assert_eq!(registry.health_check(), PluginHealth { healthy: 0, unhealthy: 1, total: 1 });

        assert!(registry.activate(&id).await.is_err());
    }

    #[tokio::test]
    async fn emit_reaches_only_active_subscribers() {
        let registry = PluginRegistry::new();
        let active = Arc::new(Tracker::new("active"));
        let idle = Arc::new(Tracker::new("idle"));
        let mut other = Tracker::new("other");
        other.handles = vec![EventKind::CommentCreated];
        let other = Arc::new(other);

        for plugin in [active.clone(), idle.clone(), other.clone()] {
            registry.register(plugin, Value::Null).await.unwrap();
        }
        registry.activate(&PluginId::new("active", "1.0.0")).await.unwrap();
        registry.activate(&PluginId::new("other", "1.0.0")).await.unwrap();

        let summary = registry.emit(&DomainEvent::new(EventKind::IssueCreated, json!({}))).await;
        assert_eq!(summary.delivered, 1);
        assert!(summary.all_succeeded());
        assert_eq!(active.handled.load(Ordering::SeqCst), 1);
        assert_eq!(idle.handled.load(Ordering::SeqCst), 0);
        assert_eq!(other.handled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failing_handler_is_isolated() {
        let registry = PluginRegistry::new();
        let mut broken = Tracker::new("broken");
        broken.fail_handler = true;
        let broken = Arc::new(broken);
        let healthy = Arc::new(Tracker::new("healthy"));
        registry.register(broken.clone(), Value::Null).await.unwrap();
        registry.register(healthy.clone(), Value::Null).await.unwrap();
        registry.activate(&PluginId::new("broken", "1.0.0")).await.unwrap();
        registry.activate(&PluginId::new("healthy", "1.0.0")).await.unwrap();

        let mut events = registry.subscribe();
        let summary = registry.emit(&DomainEvent::new("issue.created", json!({ "id": 1 }))).await;

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(healthy.handled.load(Ordering::SeqCst), 1);
        assert_eq!(
            registry.status(&PluginId::new("broken", "1.0.0")),
            Some(PluginStatus::Error)
        );
        assert_eq!(
            registry.status(&PluginId::new("healthy", "1.0.0")),
            Some(PluginStatus::Active)
        );
        let event = events.recv().await.unwrap();
        assert_eq!(event.event_name(), "plugin.error");
        assert_eq!(event.plugin_id().name(), "broken");

        // An errored plugin no longer receives events until reactivated.
        registry.emit(&DomainEvent::new("issue.created", json!({}))).await;
        assert_eq!(broken.handled.load(Ordering::SeqCst), 1);
    }

    struct Panicky(PluginManifest);

    #[async_trait]
    impl Plugin for Panicky {
        fn manifest(&self) -> &PluginManifest {
            &self.0
        }

        fn handled_events(&self) -> Vec<EventKind> {
            vec![EventKind::IssueCreated]
        }

        async fn handle_event(&self, _event: &DomainEvent) -> anyhow::Result<()> {
            panic!("index out of bounds");
        }
    }

    #[tokio::test]
    async fn panicking_handler_is_contained() {
        let registry = PluginRegistry::new();
        let id = registry
            .register(Arc::new(Panicky(PluginManifest::new("panicky", "0.1.0", "d"))), Value::Null)
            .await
            .unwrap();
        registry.activate(&id).await.unwrap();

        let summary = registry.emit(&DomainEvent::new(EventKind::IssueCreated, json!({}))).await;
        assert_eq!(summary.failed.len(), 1);
        assert!(summary.failed[0].1.contains("index out of bounds"));
        assert_eq!(registry.status(&id), Some(PluginStatus::Error));
    }

    #[tokio::test]
    async fn health_counts_only_active_as_healthy() {
        let registry = PluginRegistry::new();
        let id = registry.register(Arc::new(Tracker::new("p")), Value::Null).await.unwrap();
        assert_eq!(registry.health_check(), PluginHealth { healthy: 0, unhealthy: 0, total: 1 });

        registry.activate(&id).await.unwrap();
        assert_eq!(registry.health_check(), PluginHealth { healthy: 1, unhealthy: 0, total: 1 });

        registry.deactivate(&id).await.unwrap();
        assert_eq!(registry.health_check(), PluginHealth { healthy: 0, unhealthy: 0, total: 1 });
    }

    struct Stalled {
        manifest: PluginManifest,
        started: Arc<tokio::sync::Notify>,
        release: Arc<tokio::sync::Notify>,
    }

    #[async_trait]
    impl Plugin for Stalled {
        fn manifest(&self) -> &PluginManifest {
            &self.manifest
        }

        fn handled_events(&self) -> Vec<EventKind> {
            vec![EventKind::IssueCreated]
        }

        async fn handle_event(&self, _event: &DomainEvent) -> anyhow::Result<()> {
            self.started.notify_one();
            self.release.notified().await;
            anyhow::bail!("upstream timed out")
        }
    }

    #[tokio::test]
    async fn failure_after_deactivation_keeps_inactive_status() {
        let registry = Arc::new(PluginRegistry::new());
        let started = Arc::new(tokio::sync::Notify::new());
        let release = Arc::new(tokio::sync::Notify::new());
        let id = registry
            .register(
                Arc::new(Stalled {
                    manifest: PluginManifest::new("slow", "1.0.0", "d"),
                    started: started.clone(),
                    release: release.clone(),
                }),
                Value::Null,
            )
            .await
            .unwrap();
        registry.activate(&id).await.unwrap();

        let mut events = registry.subscribe();
        let dispatch = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.emit(&DomainEvent::new(EventKind::IssueCreated, json!({}))).await })
        };
        started.notified().await;
        registry.deactivate(&id).await.unwrap();
        release.notify_one();

        let summary = dispatch.await.unwrap();
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(registry.status(&id), Some(PluginStatus::Inactive));
        assert_eq!(events.recv().await.unwrap().event_name(), "plugin.deactivated");
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn unregister_deactivates_and_removes() {
        let registry = PluginRegistry::new();
        let tracker = Arc::new(Tracker::new("p"));
        let id = registry.register(tracker.clone(), Value::Null).await.unwrap();
        registry.activate(&id).await.unwrap();

        let record = registry.unregister(&id).await.unwrap();
        assert_eq!(record.status, PluginStatus::Inactive);
        assert_eq!(tracker.deactivations.load(Ordering::SeqCst), 1);
        assert!(registry.get(&id).is_none());
        assert!(registry.unregister(&id).await.unwrap_err().is(ErrorKind::NotFound));
    }
}
