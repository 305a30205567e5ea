//! Feature identifiers.
//!
//! A [`FeatureId`] is a concrete feature type name plus the ordered values of
//! that type's identifier columns. Its string form is `Type:value` for single
//! column ids and `Type:v1|v2|...` for composite ids.

use std::fmt;

use serde::{Serialize, Serializer};

use super::errors::CatalogError;
use super::schema::{FeatureCatalog, FeatureType};
use crate::datastore::SqlValue;

pub const TYPE_SEPARATOR: char = ':';
pub const VALUE_SEPARATOR: char = '|';

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeatureId {
    feature_type: String,
    values: Vec<SqlValue>,
}

impl FeatureId {
    /// Build an id from values read for `ft`'s identifier columns.
    ///
    /// A NULL component means the stored rows no longer match the mapping.
    pub fn new(ft: &FeatureType, values: Vec<SqlValue>) -> Result<Self, CatalogError> {
        let id_fields = ft.id_fields();
        if values.len() != id_fields.len() {
            return Err(CatalogError::MalformedFeatureId {
                id: format!("{}{}{}", ft.name, TYPE_SEPARATOR, join_values(&values)),
                reason: format!(
                    "expected {} identifier values, got {}",
                    id_fields.len(),
                    values.len()
                ),
            });
        }
        if let Some(pos) = values.iter().position(SqlValue::is_null) {
            return Err(CatalogError::NullIdentifier {
                table: ft.table.clone(),
                type_name: ft.name.clone(),
                column: id_fields[pos].column.clone(),
            });
        }
        Ok(Self {
            feature_type: ft.name.clone(),
            values,
        })
    }

    /// Parse `Type:v1|v2` against the catalog, typing each value by its id column
    pub fn parse(catalog: &FeatureCatalog, id: &str) -> Result<Self, CatalogError> {
        let (type_name, raw_values) =
            id.split_once(TYPE_SEPARATOR)
                .ok_or_else(|| CatalogError::MalformedFeatureId {
                    id: id.to_string(),
                    reason: format!("missing '{}' after the feature type name", TYPE_SEPARATOR),
                })?;
        let ft = catalog.feature_type(type_name)?;
        if ft.is_abstract {
            return Err(CatalogError::MalformedFeatureId {
                id: id.to_string(),
                reason: format!("feature type '{}' is abstract", type_name),
            });
        }
        let raw: Vec<&str> = raw_values.split(VALUE_SEPARATOR).collect();
        if raw.len() != ft.id_fields().len() {
            return Err(CatalogError::MalformedFeatureId {
                id: id.to_string(),
                reason: format!(
                    "expected {} identifier values, got {}",
                    ft.id_fields().len(),
                    raw.len()
                ),
            });
        }
        let values = raw
            .iter()
            .zip(ft.id_fields())
            .map(|(value, field)| SqlValue::parse_typed(value, field.sql_type))
            .collect();
        Self::new(ft, values)
    }

    pub fn feature_type(&self) -> &str {
        &self.feature_type
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    pub fn value(&self, index: usize) -> Option<&SqlValue> {
        self.values.get(index)
    }
}

fn join_values(values: &[SqlValue]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(&VALUE_SEPARATOR.to_string())
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.feature_type,
            TYPE_SEPARATOR,
            join_values(&self.values)
        )
    }
}

impl Serialize for FeatureId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
