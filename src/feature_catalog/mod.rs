//! Feature type catalog: feature types, their properties and the table
//! relations that reach each property's storage.

pub mod config;
pub mod errors;
pub mod feature_id;
pub mod schema;

pub use config::FeatureCatalogConfig;
pub use errors::CatalogError;
pub use feature_id::FeatureId;
pub use schema::{
    ConstantContent, FeatureCatalog, FeatureType, FunctionCall, FunctionParam, MappedGmlId,
    MappingField, PropertyContent, PropertyType, RelationPath, SimpleContent, SpecialVariable,
    TableRelation, TemplatePart, EXTERNAL_SUFFIX, FT_COLUMN, FT_PREFIX,
};
