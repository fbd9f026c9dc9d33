//! # Configuration
//!
//! Hark keeps configuration in a flat string key/value store, layered by the
//! host application however it likes, then read into typed settings
//! ([`RuntimeConfig`], [`TenantConfig`]) from an immutable snapshot.
//!
//! ```rust
//! use hark_core::config::{HarkConfig, RuntimeConfig, ExecutionMode};
//!
//! let mut cfg = HarkConfig::new();
//! cfg.set("app.mode", "development");
//! cfg.set("plugins.dir", "./plugins");
//!
//! let runtime = RuntimeConfig::from_snapshot(&cfg.snapshot()).unwrap();
//! assert_eq!(runtime.mode, ExecutionMode::Development);
//! ```
//!
//! Environment overrides use a prefix and `__` as the path separator:
//!
//! ```bash
//! export HARK__PLUGINS__DIR=/srv/hark/plugins   # -> plugins.dir
//! export HARK__TENANT__CACHE_TTL_SECS=60        # -> tenant.cache_ttl_secs
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::{HarkError, HarkResult};

pub const ENV_PREFIX: &str = "HARK__";

#[derive(Debug, Default)]
pub struct HarkConfig {
    values: HashMap<String, String>,
}

impl HarkConfig {
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    /// Set a configuration key to a string value.
    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Copy every `<prefix>A__B_C` variable into `a.b_c`.
    pub fn load_env(&mut self, prefix: &str) -> usize {
        self.load_vars(prefix, std::env::vars())
    }

    fn load_vars<I>(&mut self, prefix: &str, vars: I) -> usize
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut loaded = 0;
        for (key, value) in vars {
            if let Some(stripped) = key.strip_prefix(prefix) {
                let normalized = stripped.to_lowercase().replace("__", ".");
                self.set(normalized, value);
                loaded += 1;
            }
        }
        loaded
    }

    pub fn snapshot(&self) -> HarkConfigSnapshot {
        HarkConfigSnapshot::new(self.values.clone())
    }
}

#[derive(Debug, Clone, Default)]
pub struct HarkConfigSnapshot {
    map: HashMap<String, String>,
}

impl HarkConfigSnapshot {
    pub(crate) fn new(map: HashMap<String, String>) -> Self {
        Self { map }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(|s| s.as_str())
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.map.get(key).cloned()
    }

    pub fn get_u64(&self, key: &str) -> HarkResult<Option<u64>> {
        self.parse(key)
    }

    pub fn get_bool(&self, key: &str) -> HarkResult<Option<bool>> {
        self.parse(key)
    }

    fn parse<T: FromStr>(&self, key: &str) -> HarkResult<Option<T>> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
                HarkError::configuration(format!("invalid value '{raw}' for config key '{key}'"))
            }),
        }
    }
}

/// How strictly the runtime treats plugin failures.
///
/// Development fails fast (hook errors abort the chain, a broken plugin
/// aborts startup); production logs and keeps going.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    Development,
    #[default]
    Production,
}

impl ExecutionMode {
    pub fn is_development(&self) -> bool {
        matches!(self, ExecutionMode::Development)
    }
}

impl FromStr for ExecutionMode {
    type Err = HarkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(ExecutionMode::Development),
            "production" | "prod" => Ok(ExecutionMode::Production),
            other => Err(HarkError::configuration(format!(
                "unknown execution mode '{other}'"
            ))),
        }
    }
}

/// Settings for the plugin runtime.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub mode: ExecutionMode,
    /// Root directory scanned for plugin packages.
    pub plugins_dir: PathBuf,
    /// Scan `plugins_dir` during `initialize()`.
    pub auto_load: bool,
    /// Activate disk-loaded plugins right after they are registered.
    pub auto_activate: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Production,
            plugins_dir: PathBuf::from("plugins"),
            auto_load: true,
            auto_activate: true,
        }
    }
}

impl RuntimeConfig {
    pub fn from_snapshot(snapshot: &HarkConfigSnapshot) -> HarkResult<Self> {
        let defaults = Self::default();
        let mode = match snapshot.get("app.mode") {
            Some(raw) => raw.parse()?,
            None => defaults.mode,
        };
        Ok(Self {
            mode,
            plugins_dir: snapshot
                .get_string("plugins.dir")
                .map(PathBuf::from)
                .unwrap_or(defaults.plugins_dir),
            auto_load: snapshot.get_bool("plugins.auto_load")?.unwrap_or(defaults.auto_load),
            auto_activate: snapshot
                .get_bool("plugins.auto_activate")?
                .unwrap_or(defaults.auto_activate),
        })
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_plugins_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.plugins_dir = dir.into();
        self
    }

    pub fn with_auto_load(mut self, auto_load: bool) -> Self {
        self.auto_load = auto_load;
        self
    }

    pub fn with_auto_activate(mut self, auto_activate: bool) -> Self {
        self.auto_activate = auto_activate;
        self
    }
}

/// Settings for tenant resolution.
#[derive(Debug, Clone)]
pub struct TenantConfig {
    pub cache_ttl: Duration,
    pub cache_prefix: String,
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(300),
            cache_prefix: "tenant:org:".to_string(),
        }
    }
}

impl TenantConfig {
    pub fn from_snapshot(snapshot: &HarkConfigSnapshot) -> HarkResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            cache_ttl: snapshot
                .get_u64("tenant.cache_ttl_secs")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_ttl),
            cache_prefix: snapshot
                .get_string("tenant.cache_prefix")
                .unwrap_or(defaults.cache_prefix),
        })
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }
}
