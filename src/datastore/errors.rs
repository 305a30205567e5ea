//! # Request Error Types
//!
//! Every failure of a query, lock or id-navigation request surfaces as a
//! [`DatastoreError`]. Nothing is retried internally.
//!
//! ## Error Categories
//!
//! - **Backend failures**: connectivity, malformed generated SQL, constraint
//!   violations. Always carry the generated SQL text.
//! - **Inconsistent mapping**: the stored data no longer matches the schema
//!   mapping (NULL identifier or disambiguation column, unknown type tag).
//! - **Unsupported capability**: the backend cannot perform something the
//!   request needs (coordinate transform, bbox predicate, ...).
//! - **Invalid request**: the request itself references unknown types,
//!   aliases or malformed feature ids.

use thiserror::Error;

use crate::feature_catalog::errors::CatalogError;

/// Failure reported by a [`Connection`](super::Connection) implementation
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message}")]
pub struct BackendError {
    pub message: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for BackendError {
    fn from(err: rusqlite::Error) -> Self {
        BackendError::new(err.to_string())
    }
}

/// Coarse classification of a [`DatastoreError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BackendFailure,
    InconsistentMapping,
    UnsupportedCapability,
    InvalidRequest,
    Catalog,
}

#[derive(Debug, Error)]
pub enum DatastoreError {
    #[error("Backend failure while executing `{sql}`: {source}")]
    Backend {
        sql: String,
        #[source]
        source: BackendError,
    },

    #[error("Inconsistent mapping: {0}")]
    InconsistentMapping(String),

    #[error("Unsupported capability: {0}")]
    UnsupportedCapability(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Cannot resolve special variable `{variable}`: {source}")]
    SpecialVariable {
        variable: String,
        #[source]
        source: Box<DatastoreError>,
    },

    #[error(transparent)]
    Catalog(CatalogError),
}

impl DatastoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DatastoreError::Backend { .. } => ErrorKind::BackendFailure,
            DatastoreError::InconsistentMapping(_) => ErrorKind::InconsistentMapping,
            DatastoreError::UnsupportedCapability(_) => ErrorKind::UnsupportedCapability,
            DatastoreError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            DatastoreError::SpecialVariable { source, .. } => source.kind(),
            DatastoreError::Catalog(_) => ErrorKind::Catalog,
        }
    }

    /// Create an UnsupportedCapability error naming the backend that lacks it
    pub fn unsupported_with_context(
        capability: impl Into<String>,
        backend: impl Into<String>,
    ) -> Self {
        DatastoreError::UnsupportedCapability(format!(
            "{} (backend: {})",
            capability.into(),
            backend.into()
        ))
    }
}

impl From<CatalogError> for DatastoreError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NullIdentifier { .. } => {
                DatastoreError::InconsistentMapping(err.to_string())
            }
            CatalogError::MalformedFeatureId { .. } => {
                DatastoreError::InvalidRequest(err.to_string())
            }
            other => DatastoreError::Catalog(other),
        }
    }
}
