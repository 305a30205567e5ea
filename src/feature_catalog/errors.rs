//! # Feature Catalog Error Types
//!
//! Errors raised while loading, validating or querying the feature type
//! catalog (feature types, property types and table relations).
//!
//! ## Usage Patterns
//!
//! Use the context helpers to say where a lookup failed:
//!
//! ```ignore
//! CatalogError::unknown_type_with_context("Road", "While resolving nested property 'Street/road'")
//! ```

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CatalogError {
    #[error("No feature type `{type_name}` in catalog")]
    UnknownFeatureType { type_name: String },
    #[error("Feature type `{type_name}` has no property `{property}`")]
    UnknownProperty { type_name: String, property: String },
    #[error("Invalid table relation for property `{property}`: {message}")]
    InvalidRelation { property: String, message: String },
    #[error("Feature id column `{column}` of table `{table}` (feature type `{type_name}`) is NULL")]
    NullIdentifier {
        table: String,
        type_name: String,
        column: String,
    },
    #[error("Malformed feature id `{id}`: {reason}")]
    MalformedFeatureId { id: String, reason: String },
    #[error("Failed to read catalog file: {error}")]
    ConfigReadError { error: String },
    #[error("Failed to parse catalog: {error}")]
    ConfigParseError { error: String },
    #[error("Invalid catalog configuration: {message}")]
    InvalidConfig { message: String },
}

impl CatalogError {
    /// Create an UnknownFeatureType error with context information
    pub fn unknown_type_with_context(
        type_name: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        CatalogError::UnknownFeatureType {
            type_name: format!("{}\n  Context: {}", type_name.into(), context.into()),
        }
    }

    /// Create an InvalidConfig error naming the offending definition
    pub fn config_error_with_context(
        definition: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        CatalogError::InvalidConfig {
            message: format!("{}: {}", definition.into(), message.into()),
        }
    }
}
