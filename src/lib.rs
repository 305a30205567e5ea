//! Featurestore - schema-driven feature storage over relational databases
//!
//! This crate maps typed, nested features onto ordinary relational tables:
//! - Query translation from filters and property paths into parameterized SQL
//! - Feature assembly across several statements, including cycles and
//!   polymorphic (substitutable) feature properties
//! - Pagination, counting and coordinate transforms
//! - Lock set computation over subfeatures and superfeatures

pub mod config;
pub mod datastore;
pub mod feature;
pub mod feature_catalog;
pub mod feature_store;
pub mod filter;
pub mod request_handler;
pub mod sql_builder;

#[cfg(test)]
mod testing;

pub use feature_store::FeatureStore;
