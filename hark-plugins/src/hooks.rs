use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use hark_core::{ExecutionMode, HarkError, HarkResult, TenantContext};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::registry::panic_message;

pub const DEFAULT_PRIORITY: i32 = 100;

/// Context passed to hook handlers.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub hook: String,
    pub tenant: Option<TenantContext>,
    pub mode: ExecutionMode,
}

impl HookContext {
    pub fn new(hook: impl Into<String>, tenant: Option<TenantContext>, mode: ExecutionMode) -> Self {
        Self {
            hook: hook.into(),
            tenant,
            mode,
        }
    }
}

/// A handler attached to a named hook.
///
/// Returning `Some(value)` replaces the payload seen by later handlers;
/// `None` leaves it unchanged.
#[async_trait]
pub trait PluginHook: Send + Sync {
    async fn call(&self, payload: &Value, ctx: &HookContext) -> anyhow::Result<Option<Value>>;
}

struct FnHook<F>(F);

#[async_trait]
impl<F, Fut> PluginHook for FnHook<F>
where
    F: Fn(Value, HookContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Option<Value>>> + Send + 'static,
{
    async fn call(&self, payload: &Value, ctx: &HookContext) -> anyhow::Result<Option<Value>> {
        (self.0)(payload.clone(), ctx.clone()).await
    }
}

/// Build a hook handler from an async closure.
pub fn hook_fn<F, Fut>(f: F) -> Arc<dyn PluginHook>
where
    F: Fn(Value, HookContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Option<Value>>> + Send + 'static,
{
    Arc::new(FnHook(f))
}

/// A hook handler a plugin asks the runtime to attach.
#[derive(Clone)]
pub struct HookSpec {
    pub hook: String,
    pub priority: i32,
    pub handler: Arc<dyn PluginHook>,
}

impl HookSpec {
    pub fn new(hook: impl Into<String>, handler: Arc<dyn PluginHook>) -> Self {
        Self {
            hook: hook.into(),
            priority: DEFAULT_PRIORITY,
            handler,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[derive(Clone)]
struct HookEntry {
    plugin: String,
    priority: i32,
    seq: u64,
    handler: Arc<dyn PluginHook>,
}

/// Ordered, priority-based transformation chains keyed by hook name.
///
/// Handlers run sequentially in ascending priority; equal priorities keep
/// registration order. In development mode the first failure aborts the
/// chain, in production it is logged and the chain continues with the
/// payload as it stood.
pub struct HookTable {
    mode: ExecutionMode,
    entries: RwLock<HashMap<String, Vec<HookEntry>>>,
    next_seq: AtomicU64,
}

impl HookTable {
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            mode,
            entries: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn register(&self, hook: &str, plugin: &str, handler: Arc<dyn PluginHook>) {
        self.register_with_priority(hook, plugin, DEFAULT_PRIORITY, handler);
    }

    pub fn register_with_priority(&self, hook: &str, plugin: &str, priority: i32, handler: Arc<dyn PluginHook>) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries.write();
        let chain = entries.entry(hook.to_string()).or_default();
        chain.push(HookEntry {
            plugin: plugin.to_string(),
            priority,
            seq,
            handler,
        });
        chain.sort_by_key(|e| (e.priority, e.seq));
        debug!(hook, plugin, priority, "hook handler registered");
    }

    /// Thread `payload` through every handler registered for `hook`.
    ///
    /// A panicking handler counts as a failed one.
    pub async fn run(&self, hook: &str, payload: Value, tenant: Option<&TenantContext>) -> HarkResult<Value> {
        let chain = match self.entries.read().get(hook) {
            Some(chain) => chain.clone(),
            None => return Ok(payload),
        };

        let ctx = HookContext::new(hook, tenant.cloned(), self.mode);
        let mut current = payload;
        for entry in chain {
            let outcome = match AssertUnwindSafe(entry.handler.call(&current, &ctx))
                .catch_unwind()
                .await
            {
                Ok(outcome) => outcome,
                Err(panic) => Err(anyhow::anyhow!("handler panicked: {}", panic_message(panic.as_ref()))),
            };
            match outcome {
                Ok(Some(next)) => current = next,
                Ok(None) => {}
                Err(e) if self.mode.is_development() => {
                    error!(hook, plugin = %entry.plugin, error = %e, "hook handler failed; aborting chain");
                    return Err(HarkError::handler(format!(
                        "Hook '{hook}' handler from plugin '{}' failed: {e}",
                        entry.plugin
                    ))
                    .with_source(e));
                }
                Err(e) => {
                    warn!(hook, plugin = %entry.plugin, error = %e, "hook handler failed; continuing");
                }
            }
        }
        Ok(current)
    }

    /// Drop every handler owned by `plugin`, returning how many were removed.
    pub fn unregister_all(&self, plugin: &str) -> usize {
        let mut entries = self.entries.write();
        let mut removed = 0;
        for chain in entries.values_mut() {
            let before = chain.len();
            chain.retain(|e| e.plugin != plugin);
            removed += before - chain.len();
        }
        entries.retain(|_, chain| !chain.is_empty());
        removed
    }

    /// `(plugin, priority)` pairs for `hook`, in execution order.
    pub fn registered(&self, hook: &str) -> Vec<(String, i32)> {
        self.entries
            .read()
            .get(hook)
            .map(|chain| chain.iter().map(|e| (e.plugin.clone(), e.priority)).collect())
            .unwrap_or_default()
    }

    pub fn owned_by(&self, plugin: &str) -> usize {
        self.entries
            .read()
            .values()
            .map(|chain| chain.iter().filter(|e| e.plugin == plugin).count())
            .sum()
    }

    pub fn hook_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hark_core::ErrorKind;
    use serde_json::json;

    fn appender(tag: &'static str) -> Arc<dyn PluginHook> {
        hook_fn(move |mut payload: Value, _ctx| async move {
            if let Some(trail) = payload["trail"].as_array_mut() {
                trail.push(json!(tag));
            }
            Ok(Some(payload))
        })
    }

    fn failing() -> Arc<dyn PluginHook> {
        hook_fn(|_payload, _ctx| async { Err(anyhow::anyhow!("boom")) })
    }

    fn panicking() -> Arc<dyn PluginHook> {
        hook_fn(|_payload, _ctx| async {
            let labels: Vec<Value> = Vec::new();
            Ok(Some(labels[3].clone()))
        })
    }

    #[tokio::test]
    async fn runs_in_priority_order_with_stable_ties() {
        let table = HookTable::new(ExecutionMode::Production);
        table.register_with_priority("issue.beforeCreate", "c", 50, appender("c"));
        table.register_with_priority("issue.beforeCreate", "a", 5, appender("a"));
        table.register_with_priority("issue.beforeCreate", "b", 10, appender("b"));
        table.register("issue.beforeCreate", "d1", appender("d1"));
        table.register("issue.beforeCreate", "d2", appender("d2"));

        let out = table.run("issue.beforeCreate", json!({ "trail": [] }), None).await.unwrap();
        assert_eq!(out["trail"], json!(["a", "b", "c", "d1", "d2"]));
        assert_eq!(table.registered("issue.beforeCreate")[3], ("d1".to_string(), DEFAULT_PRIORITY));
    }

    #[tokio::test]
    async fn none_result_keeps_payload() {
        let table = HookTable::new(ExecutionMode::Production);
        table.register("h", "observer", hook_fn(|_p, _c| async { Ok(None) }));
        table.register("h", "writer", appender("w"));
        let out = table.run("h", json!({ "trail": ["x"] }), None).await.unwrap();
        assert_eq!(out["trail"], json!(["x", "w"]));
    }

    #[tokio::test]
    async fn unknown_hook_returns_payload_unchanged() {
        let table = HookTable::new(ExecutionMode::Development);
        let out = table.run("nothing.here", json!({ "n": 1 }), None).await.unwrap();
        assert_eq!(out, json!({ "n": 1 }));
    }

    #[tokio::test]
    async fn development_mode_aborts_on_failure() {
        let table = HookTable::new(ExecutionMode::Development);
        table.register_with_priority("h", "first", 1, appender("first"));
        table.register_with_priority("h", "broken", 2, failing());
        table.register_with_priority("h", "last", 3, appender("last"));

        let err = table.run("h", json!({ "trail": [] }), None).await.unwrap_err();
        assert!(err.is(ErrorKind::Handler));
        assert!(err.message.contains("broken"));
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn development_abort_is_logged() {
        let table = HookTable::new(ExecutionMode::Development);
        table.register("h", "broken", failing());

        assert!(table.run("h", json!({}), None).await.is_err());
        assert!(logs_contain("aborting chain"));
        assert!(logs_contain("broken"));
    }

    #[tokio::test]
    async fn production_mode_skips_panicking_handler() {
        let table = HookTable::new(ExecutionMode::Production);
        table.register_with_priority("h", "first", 1, appender("first"));
        table.register_with_priority("h", "panicky", 2, panicking());
        table.register_with_priority("h", "last", 3, appender("last"));

        let out = table.run("h", json!({ "trail": [] }), None).await.unwrap();
        assert_eq!(out["trail"], json!(["first", "last"]));
    }

    #[tokio::test]
    async fn development_mode_reports_panicking_handler() {
        let table = HookTable::new(ExecutionMode::Development);
        table.register("h", "panicky", panicking());

        let err = table.run("h", json!({}), None).await.unwrap_err();
        assert!(err.is(ErrorKind::Handler));
        assert!(err.message.contains("index out of bounds"));
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn production_mode_skips_failed_handler() {
        let table = HookTable::new(ExecutionMode::Production);
        table.register_with_priority("h", "first", 1, appender("first"));
        table.register_with_priority("h", "broken", 2, failing());
        table.register_with_priority("h", "last", 3, appender("last"));

        let out = table.run("h", json!({ "trail": [] }), None).await.unwrap();
        assert_eq!(out["trail"], json!(["first", "last"]));
        assert!(logs_contain("hook handler failed"));
    }

    #[test]
    fn unregister_all_removes_only_that_plugin() {
        let table = HookTable::new(ExecutionMode::Production);
        table.register("a", "p", appender("1"));
        table.register("b", "p", appender("2"));
        table.register("b", "q", appender("3"));

        assert_eq!(table.unregister_all("p"), 2);
        assert_eq!(table.owned_by("p"), 0);
        assert_eq!(table.hook_names(), vec!["b".to_string()]);
        assert_eq!(table.unregister_all("p"), 0);
    }
}
