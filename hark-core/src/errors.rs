//! # Errors
//!
//! Hark exposes one structured error type, [`HarkError`], with a stable
//! [`ErrorKind`] that every frontend (CLI, HTTP API, operational tooling)
//! can surface without knowing which subsystem produced it.
//!
//! - kinds carry a stable `name`, `class_name` and a suggested status code
//! - a `HarkError` can travel inside `anyhow::Error` (plugin code returns
//!   `anyhow::Result`) and be recovered losslessly with [`HarkError::normalize`]
//! - `to_json()` gives a transport-agnostic payload

use std::fmt;

use anyhow::Error as AnyError;
use serde_json::Value;

/// Result type for Hark core APIs.
pub type HarkResult<T> = std::result::Result<T, HarkError>;

/// Stable error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad plugin config, bad manifest, bad slug.
    Validation,
    /// Unknown plugin or organization.
    NotFound,
    /// A plugin with the same `name@version` is already registered.
    AlreadyRegistered,
    /// Unique constraint violated (e.g. organization slug taken).
    Conflict,
    /// Acting user has no membership in the tenant.
    Forbidden,
    /// A plugin lifecycle hook failed.
    Activation,
    /// A plugin event or hook handler failed.
    Handler,
    /// Runtime/directory service used before it was wired.
    NotInitialized,
    /// Static configuration is wrong (unknown plan tier, bad config value).
    Configuration,
    /// The relational or cache store failed.
    Storage,
}

impl ErrorKind {
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::AlreadyRegistered | ErrorKind::Conflict => 409,
            ErrorKind::Activation | ErrorKind::Handler => 500,
            ErrorKind::Configuration | ErrorKind::Storage => 500,
            ErrorKind::NotInitialized => 503,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "ValidationError",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::AlreadyRegistered => "AlreadyRegistered",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::Forbidden => "Forbidden",
            ErrorKind::Activation => "ActivationError",
            ErrorKind::Handler => "HandlerError",
            ErrorKind::NotInitialized => "NotInitialized",
            ErrorKind::Configuration => "ConfigurationError",
            ErrorKind::Storage => "StorageError",
        }
    }

    /// Kebab-cased class name, stable across releases.
    pub fn class_name(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation-error",
            ErrorKind::NotFound => "not-found",
            ErrorKind::AlreadyRegistered => "already-registered",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Activation => "activation-error",
            ErrorKind::Handler => "handler-error",
            ErrorKind::NotInitialized => "not-initialized",
            ErrorKind::Configuration => "configuration-error",
            ErrorKind::Storage => "storage-error",
        }
    }
}

/// A structured Hark error.
///
/// `source` keeps the underlying plugin or driver error for logging; it is
/// dropped by [`HarkError::sanitize_for_client`].
#[derive(Debug)]
pub struct HarkError {
    pub kind: ErrorKind,
    pub message: String,
    pub data: Option<Value>,
    pub source: Option<AnyError>,
}

impl HarkError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            data: None,
            source: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_source(mut self, source: AnyError) -> Self {
        self.source = Some(source);
        self
    }

    pub fn code(&self) -> u16 {
        self.kind.status_code()
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn class_name(&self) -> &'static str {
        self.kind.class_name()
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    pub fn into_anyhow(self) -> AnyError {
        AnyError::new(self)
    }

    pub fn from_anyhow(err: &AnyError) -> Option<&HarkError> {
        err.downcast_ref::<HarkError>()
    }

    /// Turn any error into a `HarkError`, keeping it as-is when it already is
    /// one and wrapping it under `fallback` otherwise.
    pub fn normalize(err: AnyError, fallback: ErrorKind) -> HarkError {
        match err.downcast::<HarkError>() {
            Ok(hark) => hark,
            Err(other) => HarkError::new(fallback, format!("{other:#}")).with_source(other),
        }
    }

    pub fn sanitize_for_client(&self) -> HarkError {
        HarkError {
            kind: self.kind,
            message: self.message.clone(),
            data: self.data.clone(),
            source: None,
        }
    }

    pub fn to_json(&self) -> Value {
        let mut base = serde_json::json!({
            "name": self.name(),
            "message": self.message,
            "code": self.code(),
            "className": self.class_name(),
        });
        if let Some(d) = &self.data {
            base["data"] = d.clone();
        }
        base
    }

    // ---- Constructors ----

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, msg)
    }
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, msg)
    }
    pub fn already_registered(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyRegistered, msg)
    }
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, msg)
    }
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, msg)
    }
    pub fn activation(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Activation, msg)
    }
    pub fn handler(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Handler, msg)
    }
    pub fn not_initialized(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotInitialized, msg)
    }
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, msg)
    }
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Storage, msg)
    }
}

impl fmt::Display for HarkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.name(), self.code(), self.message)
    }
}

impl std::error::Error for HarkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Bail out of a function returning `HarkResult` with a `HarkError`.
#[macro_export]
macro_rules! bail_hark {
    ($ctor:ident, $msg:expr) => {
        return Err($crate::errors::HarkError::$ctor($msg))
    };
    ($ctor:ident, $fmt:expr, $($arg:tt)*) => {
        return Err($crate::errors::HarkError::$ctor(format!($fmt, $($arg)*)))
    };
}
