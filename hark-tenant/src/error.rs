use hark_core::{ErrorKind, HarkError};
use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by relational and cache backends
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("Unknown tenant table: {0}")]
    UnknownTable(String),

    #[error("Schema not found: {0}")]
    SchemaNotFound(String),

    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    #[error("Storage backend error: {source}")]
    Backend {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl StoreError {
    /// Create a backend error from any driver error
    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            source: Box::new(error),
        }
    }

    pub fn unavailable<S: Into<String>>(reason: S) -> Self {
        Self::Unavailable(reason.into())
    }
}

impl From<StoreError> for HarkError {
    fn from(err: StoreError) -> Self {
        let kind = match &err {
            StoreError::UniqueViolation(_) => ErrorKind::Conflict,
            StoreError::UnknownTable(_) | StoreError::InvalidData(_) => ErrorKind::Validation,
            StoreError::SchemaNotFound(_) => ErrorKind::NotFound,
            _ => ErrorKind::Storage,
        };
        HarkError::new(kind, err.to_string()).with_source(anyhow::Error::new(err))
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if db.is_unique_violation() {
                return Self::UniqueViolation(db.message().to_string());
            }
        }
        Self::backend(err)
    }
}
