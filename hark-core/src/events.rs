use std::future::Future;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, warn};

use crate::tenant::TenantContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// An event delivered to in-process subscribers.
#[derive(Debug, Clone)]
pub struct HubEvent {
    pub name: String,
    pub payload: Value,
    pub tenant: Option<TenantContext>,
}

impl HubEvent {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
            tenant: None,
        }
    }

    pub fn with_tenant(mut self, tenant: TenantContext) -> Self {
        self.tenant = Some(tenant);
        self
    }
}

/// Listener signature (async, owned event).
pub type EventListener = Arc<dyn Fn(HubEvent) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Build an [`EventListener`] from an async closure.
pub fn listener<F, Fut>(f: F) -> EventListener
where
    F: Fn(HubEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |event| Box::pin(f(event)))
}

/// Which event names a listener wants.
///
/// Event names are dotted, `resource.action` (`issue.created`). Patterns are
/// `*`, `resource.*` or an exact name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventPattern {
    Any,
    Resource(String),
    Exact(String),
}

impl EventPattern {
    pub fn parse(input: &str) -> anyhow::Result<Self> {
        let s = input.trim();
        if s.is_empty() {
            return Err(anyhow::anyhow!("Invalid event pattern: empty"));
        }
        if s == "*" || s == "*.*" {
            return Ok(EventPattern::Any);
        }
        if let Some(resource) = s.strip_suffix(".*") {
            if resource.is_empty() || resource.contains('*') {
                return Err(anyhow::anyhow!("Invalid event pattern '{s}'"));
            }
            return Ok(EventPattern::Resource(resource.to_string()));
        }
        if s.contains('*') {
            return Err(anyhow::anyhow!(
                "Invalid event pattern '{s}'. Expected '*', 'resource.*' or an exact name."
            ));
        }
        Ok(EventPattern::Exact(s.to_string()))
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            EventPattern::Any => true,
            EventPattern::Exact(e) => e == name,
            EventPattern::Resource(r) => name
                .split_once('.')
                .map(|(resource, _)| resource == r)
                .unwrap_or(false),
        }
    }
}

#[derive(Clone)]
struct ListenerEntry {
    id: ListenerId,
    pattern: EventPattern,
    listener: EventListener,
    once: bool,
}

/// In-process publish/subscribe hub for non-plugin listeners.
///
/// Owned by the plugin runtime and handed to plugins through their capability
/// API. Emission never holds the lock across `.await`:
/// 1) snapshot matching listeners under a read lock
/// 2) await listeners with no lock held
/// 3) drop fired `once` listeners under a write lock
pub struct HarkEventHub {
    listeners: RwLock<Vec<ListenerEntry>>,
    next_id: AtomicU64,
}

impl Default for HarkEventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl HarkEventHub {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn next_listener_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn on(&self, pattern: &str, listener: EventListener) -> anyhow::Result<ListenerId> {
        let pattern = EventPattern::parse(pattern)?;
        Ok(self.on_pattern(pattern, listener, false))
    }

    pub fn once(&self, pattern: &str, listener: EventListener) -> anyhow::Result<ListenerId> {
        let pattern = EventPattern::parse(pattern)?;
        Ok(self.on_pattern(pattern, listener, true))
    }

    pub fn on_pattern(&self, pattern: EventPattern, listener: EventListener, once: bool) -> ListenerId {
        let id = self.next_listener_id();
        self.listeners.write().push(ListenerEntry {
            id,
            pattern,
            listener,
            once,
        });
        id
    }

    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|e| e.id != id);
        before != listeners.len()
    }

    /// Remove every listener, or only those registered with `pattern`.
    pub fn remove_all(&self, pattern: Option<&EventPattern>) -> usize {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        match pattern {
            Some(p) => listeners.retain(|e| &e.pattern != p),
            None => listeners.clear(),
        }
        before - listeners.len()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    fn snapshot(&self, name: &str) -> (Vec<EventListener>, Vec<ListenerId>) {
        let listeners = self.listeners.read();
        let mut to_call = Vec::new();
        let mut once_ids = Vec::new();
        for entry in listeners.iter() {
            if entry.pattern.matches(name) {
                to_call.push(entry.listener.clone());
                if entry.once {
                    once_ids.push(entry.id);
                }
            }
        }
        (to_call, once_ids)
    }

    /// Deliver `event` to every matching listener, in subscription order.
    ///
    /// Listener errors are logged and do not stop delivery. Returns how many
    /// listeners completed successfully.
    pub async fn emit(&self, event: HubEvent) -> usize {
        let (listeners, once_ids) = self.snapshot(&event.name);

        let mut delivered = 0;
        for f in &listeners {
            match f(event.clone()).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!(event = %event.name, error = %e, "event listener failed"),
            }
        }

        if !once_ids.is_empty() {
            self.listeners.write().retain(|e| !once_ids.contains(&e.id));
        }

        debug!(event = %event.name, listeners = listeners.len(), delivered, "event emitted");
        delivered
    }
}
