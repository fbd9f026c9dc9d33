use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hark_core::{HarkError, TenantContext};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::hooks::HookSpec;

/// Descriptive metadata for a plugin, as found in `plugin.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// UI framework the plugin ships a frontend for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    /// Factory key; defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Hook names this plugin may attach handlers to.
    #[serde(default)]
    pub hooks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_schema: Option<Value>,
    /// Configuration used when the plugin is loaded from disk.
    #[serde(default)]
    pub config: Value,
}

impl PluginManifest {
    pub fn new(name: impl Into<String>, version: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
            author: None,
            framework: None,
            entry: None,
            permissions: Vec::new(),
            hooks: Vec::new(),
            config_schema: None,
            config: Value::Null,
        }
    }

    pub fn with_hooks<I, S>(mut self, hooks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hooks = hooks.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_framework(mut self, framework: impl Into<String>) -> Self {
        self.framework = Some(framework.into());
        self
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn id(&self) -> PluginId {
        PluginId::new(&self.name, &self.version)
    }

    pub fn entry_key(&self) -> &str {
        self.entry.as_deref().unwrap_or(&self.name)
    }

    pub fn declares_hook(&self, hook: &str) -> bool {
        self.hooks.iter().any(|h| h == hook)
    }
}

/// Registry key: `name@version`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginId(String);

impl PluginId {
    pub fn new(name: &str, version: &str) -> Self {
        Self(format!("{name}@{version}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn name(&self) -> &str {
        self.0.rsplit_once('@').map(|(name, _)| name).unwrap_or(&self.0)
    }

    pub fn version(&self) -> &str {
        self.0.rsplit_once('@').map(|(_, version)| version).unwrap_or("")
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PluginId {
    type Err = HarkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once('@') {
            Some((name, version)) if !name.is_empty() && !version.is_empty() => Ok(Self::new(name, version)),
            _ => Err(HarkError::validation(format!(
                "Invalid plugin id '{s}'. Expected 'name@version'."
            ))),
        }
    }
}

/// Lifecycle status of a registered plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginStatus {
    Installed,
    Active,
    Inactive,
    Error,
}

impl PluginStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginStatus::Installed => "installed",
            PluginStatus::Active => "active",
            PluginStatus::Inactive => "inactive",
            PluginStatus::Error => "error",
        }
    }
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain event kinds a plugin can subscribe to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum EventKind {
    IssueCreated,
    IssueUpdated,
    IssueResolved,
    IssueDeleted,
    CommentCreated,
    ProjectCreated,
    FeedbackSubmitted,
    Custom(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::IssueCreated => "issue.created",
            EventKind::IssueUpdated => "issue.updated",
            EventKind::IssueResolved => "issue.resolved",
            EventKind::IssueDeleted => "issue.deleted",
            EventKind::CommentCreated => "comment.created",
            EventKind::ProjectCreated => "project.created",
            EventKind::FeedbackSubmitted => "feedback.submitted",
            EventKind::Custom(name) => name,
        }
    }
}

impl From<&str> for EventKind {
    fn from(name: &str) -> Self {
        match name {
            "issue.created" => EventKind::IssueCreated,
            "issue.updated" => EventKind::IssueUpdated,
            "issue.resolved" => EventKind::IssueResolved,
            "issue.deleted" => EventKind::IssueDeleted,
            "comment.created" => EventKind::CommentCreated,
            "project.created" => EventKind::ProjectCreated,
            "feedback.submitted" => EventKind::FeedbackSubmitted,
            other => EventKind::Custom(other.to_string()),
        }
    }
}

impl From<String> for EventKind {
    fn from(name: String) -> Self {
        EventKind::from(name.as_str())
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event dispatched to plugin handlers through the registry.
#[derive(Debug, Clone)]
pub struct DomainEvent {
    pub kind: EventKind,
    pub payload: Value,
    pub tenant: Option<TenantContext>,
    pub occurred_at: DateTime<Utc>,
}

impl DomainEvent {
    pub fn new(kind: impl Into<EventKind>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            tenant: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_tenant(mut self, tenant: Option<TenantContext>) -> Self {
        self.tenant = tenant;
        self
    }

    pub fn name(&self) -> &str {
        self.kind.as_str()
    }
}

/// A unit of third-party functionality hosted by the runtime.
///
/// Every lifecycle hook is optional. Event handling is opt-in: a plugin lists
/// the kinds it handles in [`Plugin::handled_events`] (read once, at
/// registration) and only receives those.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn manifest(&self) -> &PluginManifest;

    fn handled_events(&self) -> Vec<EventKind> {
        Vec::new()
    }

    /// Hook handlers to attach when the runtime loads this plugin.
    fn hooks(&self) -> Vec<HookSpec> {
        Vec::new()
    }

    fn validate_config(&self, _config: &Value) -> bool {
        true
    }

    async fn install(&self, _config: &Value) -> anyhow::Result<()> {
        Ok(())
    }

    async fn activate(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn deactivate(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn uninstall(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called by the runtime right after construction.
    async fn initialize(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called by the runtime on unload and shutdown.
    async fn destroy(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn handle_event(&self, event: &DomainEvent) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("no handler for '{}'", event.name()))
    }
}
