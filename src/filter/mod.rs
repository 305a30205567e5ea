//! Boolean filter expressions and their compilation into SQL fragments.
//!
//! A [`FilterCompiler`] turns a [`Filter`] plus sort criteria into the join
//! table list, WHERE clause and ORDER BY clause of a statement over the
//! requested feature types' root tables. The engine only depends on the
//! trait; [`RootTableWhereBuilder`] is the built-in implementation.

pub mod where_builder;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::datastore::{DatastoreError, Envelope, SqlValue};
use crate::feature_catalog::{CatalogError, FeatureCatalog, FeatureType};
use crate::request_handler::virtual_content::VirtualContentProvider;
use crate::sql_builder::{StatementBuffer, TableAliasGenerator};

pub use where_builder::RootTableWhereBuilder;

/// Property reference, optionally qualified by a type name or alias (`r/name`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct PropertyName {
    pub qualifier: Option<String>,
    pub name: String,
}

impl PropertyName {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            qualifier: None,
            name: name.into(),
        }
    }

    pub fn qualified(qualifier: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            qualifier: Some(qualifier.into()),
            name: name.into(),
        }
    }
}

impl From<String> for PropertyName {
    fn from(value: String) -> Self {
        match value.split_once('/') {
            Some((qualifier, name)) => PropertyName::qualified(qualifier, name),
            None => PropertyName::new(value),
        }
    }
}

impl From<&str> for PropertyName {
    fn from(value: &str) -> Self {
        PropertyName::from(value.to_string())
    }
}

impl From<PropertyName> for String {
    fn from(value: PropertyName) -> Self {
        value.to_string()
    }
}

impl fmt::Display for PropertyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.qualifier {
            Some(q) => write!(f, "{}/{}", q, self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl ComparisonOp {
    pub fn sql(self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::Ne => "<>",
            ComparisonOp::Lt => "<",
            ComparisonOp::Le => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::Ge => ">=",
        }
    }
}

/// Right-hand side of a comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    Property { property: PropertyName },
    Literal(SqlValue),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Comparison {
        property: PropertyName,
        op: ComparisonOp,
        value: Operand,
    },
    IsNull {
        property: PropertyName,
    },
    /// SQL `LIKE` with `%` and `_` wildcards
    Like {
        property: PropertyName,
        pattern: String,
    },
    /// Feature ids in `Type:value` form
    FeatureIds {
        ids: Vec<String>,
    },
    #[serde(rename = "bbox")]
    BBox {
        property: PropertyName,
        envelope: Envelope,
    },
}

impl Filter {
    pub fn eq(property: impl Into<PropertyName>, value: impl Into<SqlValue>) -> Self {
        Filter::Comparison {
            property: property.into(),
            op: ComparisonOp::Eq,
            value: Operand::Literal(value.into()),
        }
    }

    /// The first bounding box constraint outside of negations, if any
    pub fn bounding_box(&self) -> Option<&Envelope> {
        match self {
            Filter::BBox { envelope, .. } => Some(envelope),
            Filter::And(parts) | Filter::Or(parts) => parts.iter().find_map(Filter::bounding_box),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortProperty {
    pub property: PropertyName,
    #[serde(default)]
    pub descending: bool,
}

/// Everything a compiler needs to know about the statement it contributes to
#[derive(Debug, Clone, Copy)]
pub struct FilterScope<'a> {
    pub catalog: &'a FeatureCatalog,
    /// Root feature types of the statement, in request order
    pub feature_types: &'a [&'a FeatureType],
    /// Request aliases of the feature types, if the request names them
    pub aliases: Option<&'a [String]>,
    pub filter: Option<&'a Filter>,
    pub sort: &'a [SortProperty],
}

/// SQL fragments produced by a [`FilterCompiler`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledFilter {
    /// Table alias of each root feature type, in request order
    pub root_aliases: Vec<String>,
    /// Join table list following `FROM`
    pub from_clause: StatementBuffer,
    /// ` WHERE ...`, or empty
    pub where_clause: StatementBuffer,
    /// ` ORDER BY ...`, or empty
    pub order_by: StatementBuffer,
}

impl CompiledFilter {
    pub fn root_alias(&self, index: usize) -> Option<&str> {
        self.root_aliases.get(index).map(String::as_str)
    }
}

pub trait FilterCompiler {
    fn compile(
        &self,
        scope: &FilterScope<'_>,
        alias_generator: &mut TableAliasGenerator,
        content: &VirtualContentProvider<'_>,
    ) -> Result<CompiledFilter, FilterError>;
}

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("Unknown type name or alias `{0}` in filter")]
    UnknownQualifier(String),
    #[error("Property `{0}` cannot be resolved against the requested feature types")]
    UnresolvedProperty(String),
    #[error("Filter on `{property}` is not supported: {reason}")]
    Unsupported { property: String, reason: String },
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Datastore(#[from] DatastoreError),
}

impl FilterError {
    pub fn unsupported_with_context(property: impl ToString, reason: impl Into<String>) -> Self {
        FilterError::Unsupported {
            property: property.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<FilterError> for DatastoreError {
    fn from(err: FilterError) -> Self {
        match err {
            FilterError::Unsupported { .. } => DatastoreError::UnsupportedCapability(err.to_string()),
            FilterError::Catalog(inner) => DatastoreError::from(inner),
            FilterError::Datastore(inner) => inner,
            other => DatastoreError::InvalidRequest(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_name_parsing() {
        assert_eq!(PropertyName::from("r/name"), PropertyName::qualified("r", "name"));
        assert_eq!(PropertyName::from("name"), PropertyName::new("name"));
        assert_eq!(PropertyName::qualified("r", "name").to_string(), "r/name");
    }

    #[test]
    fn test_filter_from_json() {
        let json = r#"{"and": [
            {"comparison": {"property": "Road/lanes", "op": "ge", "value": 2}},
            {"bbox": {"property": "geom", "envelope": {"min_x": 0, "min_y": 0, "max_x": 5, "max_y": 5}}}
        ]}"#;
        let filter: Filter = serde_json::from_str(json).unwrap();
        match &filter {
            Filter::And(parts) => {
                assert_eq!(parts.len(), 2);
                assert_eq!(
                    parts[0],
                    Filter::Comparison {
                        property: PropertyName::qualified("Road", "lanes"),
                        op: ComparisonOp::Ge,
                        value: Operand::Literal(SqlValue::Integer(2)),
                    }
                );
            }
            other => panic!("unexpected filter {:?}", other),
        }
        assert_eq!(filter.bounding_box().map(|e| e.max_x), Some(5.0));
    }

    #[test]
    fn test_negated_bbox_is_not_the_query_bbox() {
        let filter = Filter::Not(Box::new(Filter::BBox {
            property: PropertyName::new("geom"),
            envelope: Envelope::new(0.0, 0.0, 1.0, 1.0),
        }));
        assert!(filter.bounding_box().is_none());
    }

    #[test]
    fn test_unsupported_filter_maps_to_capability_error() {
        let err: DatastoreError =
            FilterError::unsupported_with_context("owner/name", "related property").into();
        assert_eq!(err.kind(), crate::datastore::ErrorKind::UnsupportedCapability);
    }
}
