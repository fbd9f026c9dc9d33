//! # hark-plugins
//!
//! Runtime that hosts third-party plugins next to the Hark core.
//!
//! - [`PluginRegistry`] owns plugin records and lifecycle state and
//!   dispatches domain events to active subscribers, isolating failures.
//! - [`HookTable`] runs ordered transformation chains over payloads.
//! - [`PluginRuntime`] discovers plugins on disk (`<dir>/<plugin>/plugin.json`),
//!   constructs them through [`PluginFactories`] and hands each one a
//!   [`PluginApi`].
//!
//! ```rust
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use hark_core::RuntimeConfig;
//! use hark_plugins::{DomainEvent, EventKind, Plugin, PluginFactories, PluginManifest, PluginRuntime};
//!
//! struct Audit(PluginManifest);
//!
//! #[async_trait]
//! impl Plugin for Audit {
//!     fn manifest(&self) -> &PluginManifest {
//!         &self.0
//!     }
//!
//!     fn handled_events(&self) -> Vec<EventKind> {
//!         vec![EventKind::IssueCreated]
//!     }
//!
//!     async fn handle_event(&self, event: &DomainEvent) -> anyhow::Result<()> {
//!         tracing::info!(event = %event.name(), "audited");
//!         Ok(())
//!     }
//! }
//!
//! # tokio_block_on(async {
//! hark_core::logging::init("info", hark_core::logging::LogFormat::Pretty);
//!
//! let runtime = PluginRuntime::new(RuntimeConfig::default().with_auto_load(false), PluginFactories::new());
//! let id = runtime
//!     .register_plugin(Arc::new(Audit(PluginManifest::new("audit", "1.0.0", "Audit log"))), serde_json::Value::Null)
//!     .await?;
//! runtime.registry().activate(&id).await?;
//!
//! let summary = runtime.dispatch(EventKind::IssueCreated, serde_json::json!({ "id": 1 }), None).await?;
//! assert_eq!(summary.succeeded, 1);
//! # Ok::<(), hark_core::HarkError>(())
//! # });
//! # fn tokio_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

pub mod api;
pub mod factory;
pub mod hooks;
pub mod manifest;
pub mod plugin;
pub mod registry;
pub mod runtime;

pub use api::{PluginApi, Services};
pub use factory::{PluginContext, PluginFactories, PluginFactory};
pub use hooks::{hook_fn, HookContext, HookSpec, HookTable, PluginHook, DEFAULT_PRIORITY};
pub use manifest::{is_semver, validate_manifest, KNOWN_FRAMEWORKS, MANIFEST_FILE};
pub use plugin::{DomainEvent, EventKind, Plugin, PluginId, PluginManifest, PluginStatus};
pub use registry::{DispatchSummary, PluginHealth, PluginRecord, PluginRegistry, RegistryEvent};
pub use runtime::PluginRuntime;
