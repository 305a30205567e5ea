
//! Feature catalog configuration.
//!
//! Feature types are defined in YAML with the following structure:
//!
//! ```yaml
//! name: city_model
//! feature_types:
//!   - name: AbstractBuilding       # abstract types have no table
//!     abstract: true
//!   - name: Building
//!     table: building
//!     substitution_group: AbstractBuilding
//!     id: id                       # or [district, number], or [{column: id, sql_type: integer}]
//!     envelope_property: footprint
//!     properties:
//!       - name: height
//!         kind: simple
//!         column: height
//!         sql_type: double
//!       - name: footprint
//!         kind: geometry
//!         column: geom
//!         srs: EPSG:4326
//!         native_srs_code: 4326
//!       - name: owner
//!         kind: feature
//!         feature_type: Person
//!         relations:
//!           - from_table: building
//!             to_table: person
//!             columns: [[owner_id, id]]
//! ```
//!
//! Simple properties take exactly one content source: `column`, `constant`,
//! `function` (a template with `$n` markers and its `params`) or `variable`.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::errors::CatalogError;
use super::schema::{
    ConstantContent, FeatureCatalog, FeatureType, FunctionCall, FunctionParam, MappedGmlId,
    MappingField, PropertyContent, PropertyType, SimpleContent, SpecialVariable, TableRelation,
};
use crate::datastore::SqlType;
use crate::sql_builder::SchemaText;

/// Identifier column, either a bare name or a name with its SQL type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum IdColumn {
    Name(String),
    Typed {
        column: String,
        #[serde(default)]
        sql_type: SqlType,
    },
}

impl IdColumn {
    pub fn column(&self) -> &str {
        match self {
            IdColumn::Name(name) => name,
            IdColumn::Typed { column, .. } => column,
        }
    }

    pub fn sql_type(&self) -> SqlType {
        match self {
            IdColumn::Name(_) => SqlType::Other,
            IdColumn::Typed { sql_type, .. } => *sql_type,
        }
    }
}

/// Identifier supporting both single and composite ids
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Identifier {
    Single(IdColumn),
    Composite(Vec<IdColumn>),
}

impl Identifier {
    pub fn columns(&self) -> Vec<&IdColumn> {
        match self {
            Identifier::Single(col) => vec![col],
            Identifier::Composite(cols) => cols.iter().collect(),
        }
    }
}

impl Default for Identifier {
    fn default() -> Self {
        Identifier::Composite(Vec::new())
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    #[default]
    Simple,
    Geometry,
    Feature,
}

/// Parameter of a function call; exactly one field is set
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FunctionParamDefinition {
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub constant: Option<String>,
    #[serde(default)]
    pub variable: Option<SpecialVariable>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionDefinition {
    /// SQL text with `$1`, `$2`, ... parameter markers
    pub template: String,
    #[serde(default)]
    pub params: Vec<FunctionParamDefinition>,
    #[serde(default)]
    pub result_type: SqlType,
}

/// Join path step; `columns` pairs a from-column with a to-column
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelationDefinition {
    pub from_table: String,
    pub to_table: String,
    pub columns: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PropertyDefinition {
    pub name: String,
    #[serde(default)]
    pub kind: PropertyKind,
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default)]
    pub constant: Option<String>,
    #[serde(default)]
    pub function: Option<FunctionDefinition>,
    #[serde(default)]
    pub variable: Option<SpecialVariable>,
    #[serde(default)]
    pub sql_type: SqlType,
    /// Geometry properties: SRS name the geometry is published in
    #[serde(default)]
    pub srs: Option<String>,
    /// Geometry properties: backend SRS code the column is stored in
    #[serde(default)]
    pub native_srs_code: Option<i32>,
    /// Feature properties: contained (possibly abstract) feature type
    #[serde(default)]
    pub feature_type: Option<String>,
    /// Feature properties: a `<fk>_external` column may carry a URL instead
    #[serde(default)]
    pub external_links: bool,
    #[serde(default)]
    pub relations: Vec<RelationDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureTypeDefinition {
    pub name: String,
    #[serde(default)]
    pub table: String,
    #[serde(default)]
    pub id: Identifier,
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    #[serde(default)]
    pub substitution_group: Option<String>,
    /// Root table shared by several types, disambiguated by a `featuretype` column
    #[serde(default)]
    pub several_implementations: bool,
    #[serde(default)]
    pub envelope_property: Option<String>,
    #[serde(default)]
    pub properties: Vec<PropertyDefinition>,
}

/// Feature catalog configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureCatalogConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub feature_types: Vec<FeatureTypeDefinition>,
}

impl FeatureCatalogConfig {
    /// Load catalog configuration from a YAML file
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let contents = fs::read_to_string(path).map_err(|e| CatalogError::ConfigReadError {
            error: e.to_string(),
        })?;

        Self::from_yaml_str(&contents)
    }

    /// Parse catalog configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self, CatalogError> {
        serde_yaml::from_str(yaml).map_err(|e| CatalogError::ConfigParseError {
            error: e.to_string(),
        })
    }

    fn definition(&self, name: &str) -> Option<&FeatureTypeDefinition> {
        self.feature_types.iter().find(|ft| ft.name == name)
    }

    /// Structural validation of the catalog configuration
    pub fn validate(&self) -> Result<(), CatalogError> {
        if self.feature_types.is_empty() {
            return Err(CatalogError::InvalidConfig {
                message: "Catalog must contain at least one feature type".to_string(),
            });
        }

        let mut seen_names = HashSet::new();
        for ft in &self.feature_types {
            if ft.name.is_empty() {
                return Err(CatalogError::InvalidConfig {
                    message: "Feature type with empty name".to_string(),
                });
            }
            if !seen_names.insert(&ft.name) {
                return Err(CatalogError::InvalidConfig {
                    message: format!("Duplicate feature type: {}", ft.name),
                });
            }
        }

        for ft in &self.feature_types {
            self.validate_feature_type(ft)?;
        }
        self.validate_substitution_groups()?;
        Ok(())
    }

    fn validate_feature_type(&self, ft: &FeatureTypeDefinition) -> Result<(), CatalogError> {
        let context = format!("feature type '{}'", ft.name);
        if !ft.is_abstract {
            if ft.table.is_empty() {
                return Err(CatalogError::config_error_with_context(
                    context,
                    "concrete feature types need a table",
                ));
            }
            if ft.id.columns().is_empty() {
                return Err(CatalogError::config_error_with_context(
                    context,
                    "concrete feature types need at least one id column",
                ));
            }
        }
        if let Some(group) = &ft.substitution_group {
            match self.definition(group) {
                Some(parent) if parent.is_abstract => {}
                Some(_) => {
                    return Err(CatalogError::config_error_with_context(
                        context,
                        format!("substitution group '{}' is not abstract", group),
                    ))
                }
                None => return Err(CatalogError::unknown_type_with_context(group.clone(), context)),
            }
        }

        let mut seen_props = HashSet::new();
        for prop in &ft.properties {
            if !seen_props.insert(&prop.name) {
                return Err(CatalogError::config_error_with_context(
                    context,
                    format!("duplicate property '{}'", prop.name),
                ));
            }
            self.validate_property(ft, prop)?;
        }

        if let Some(envelope) = &ft.envelope_property {
            match ft.properties.iter().find(|p| &p.name == envelope) {
                Some(p) if p.kind == PropertyKind::Geometry => {}
                _ => {
                    return Err(CatalogError::config_error_with_context(
                        context,
                        format!("envelope property '{}' is not a geometry property", envelope),
                    ))
                }
            }
        }
        Ok(())
    }

    fn validate_property(
        &self,
        ft: &FeatureTypeDefinition,
        prop: &PropertyDefinition,
    ) -> Result<(), CatalogError> {
        let context = format!("property '{}/{}'", ft.name, prop.name);

        let mut expected_from = ft.table.as_str();
        for rel in &prop.relations {
            if rel.columns.is_empty() {
                return Err(CatalogError::InvalidRelation {
                    property: prop.name.clone(),
                    message: format!("relation {} -> {} has no columns", rel.from_table, rel.to_table),
                });
            }
            if rel.from_table != expected_from {
                return Err(CatalogError::InvalidRelation {
                    property: prop.name.clone(),
                    message: format!(
                        "relation starts at '{}' but the path is at '{}'",
                        rel.from_table, expected_from
                    ),
                });
            }
            expected_from = rel.to_table.as_str();
        }

        match prop.kind {
            PropertyKind::Simple => {
                let sources = [
                    prop.column.is_some(),
                    prop.constant.is_some(),
                    prop.function.is_some(),
                    prop.variable.is_some(),
                ]
                .iter()
                .filter(|set| **set)
                .count();
                if sources != 1 {
                    return Err(CatalogError::config_error_with_context(
                        context,
                        "simple properties need exactly one of column, constant, function, variable",
                    ));
                }
                if let Some(function) = &prop.function {
                    for param in &function.params {
                        let set = [param.field.is_some(), param.constant.is_some(), param.variable.is_some()]
                            .iter()
                            .filter(|set| **set)
                            .count();
                        if set != 1 {
                            return Err(CatalogError::config_error_with_context(
                                context,
                                "function parameters need exactly one of field, constant, variable",
                            ));
                        }
                    }
                }
                if !prop.relations.is_empty() && prop.column.is_none() {
                    return Err(CatalogError::config_error_with_context(
                        context,
                        "related simple properties must be stored in a column",
                    ));
                }
            }
            PropertyKind::Geometry => {
                if prop.column.is_none() {
                    return Err(CatalogError::config_error_with_context(
                        context,
                        "geometry properties need a column",
                    ));
                }
                if prop.srs.is_none() {
                    return Err(CatalogError::config_error_with_context(
                        context,
                        "geometry properties need an srs",
                    ));
                }
            }
            PropertyKind::Feature => {
                let Some(contained) = &prop.feature_type else {
                    return Err(CatalogError::config_error_with_context(
                        context,
                        "feature properties need a feature_type",
                    ));
                };
                if self.definition(contained).is_none() {
                    return Err(CatalogError::unknown_type_with_context(contained.clone(), context));
                }
                if prop.external_links && prop.relations.is_empty() {
                    return Err(CatalogError::config_error_with_context(
                        context,
                        "external links need a relation holding the foreign key",
                    ));
                }
                let concrete = self.concrete_substitution_count(contained);
                if concrete > 1 {
                    match prop.relations.len() {
                        1 if prop.relations[0].columns.len() != 1 => {
                            return Err(CatalogError::InvalidRelation {
                                property: prop.name.clone(),
                                message: "polymorphic single relations need a single key column"
                                    .to_string(),
                            })
                        }
                        0 | 1 | 2 => {}
                        n => {
                            return Err(CatalogError::InvalidRelation {
                                property: prop.name.clone(),
                                message: format!(
                                    "polymorphic feature properties support at most 2 relations, got {}",
                                    n
                                ),
                            })
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn validate_substitution_groups(&self) -> Result<(), CatalogError> {
        for ft in &self.feature_types {
            let mut visited = HashSet::new();
            let mut current = Some(ft.name.as_str());
            while let Some(name) = current {
                if !visited.insert(name) {
                    return Err(CatalogError::config_error_with_context(
                        format!("feature type '{}'", ft.name),
                        "cyclic substitution groups",
                    ));
                }
                current = self
                    .definition(name)
                    .and_then(|d| d.substitution_group.as_deref());
            }
        }
        Ok(())
    }

    fn concrete_substitution_count(&self, name: &str) -> usize {
        self.feature_types
            .iter()
            .filter(|ft| !ft.is_abstract && self.substitutes(name, &ft.name))
            .count()
    }

    fn substitutes(&self, target: &str, candidate: &str) -> bool {
        let mut current = Some(candidate);
        let mut steps = 0;
        while let Some(name) = current {
            if name == target {
                return true;
            }
            steps += 1;
            if steps > self.feature_types.len() {
                return false;
            }
            current = self.definition(name).and_then(|d| d.substitution_group.as_deref());
        }
        false
    }

    /// Validate and convert into the immutable catalog
    pub fn build(&self) -> Result<FeatureCatalog, CatalogError> {
        self.validate()?;

        // declared id column types, used to type join columns that point at them
        let mut column_types: HashMap<(&str, &str), SqlType> = HashMap::new();
        for ft in &self.feature_types {
            for col in ft.id.columns() {
                column_types.insert((ft.table.as_str(), col.column()), col.sql_type());
            }
        }

        let mut types = Vec::with_capacity(self.feature_types.len());
        for def in &self.feature_types {
            let id = MappedGmlId {
                fields: def
                    .id
                    .columns()
                    .into_iter()
                    .map(|c| MappingField::new(def.table.clone(), c.column(), c.sql_type()))
                    .collect(),
            };
            let properties = def
                .properties
                .iter()
                .map(|p| build_property(def, p, &column_types))
                .collect::<Result<Vec<_>, _>>()?;
            types.push(FeatureType {
                name: def.name.clone(),
                table: def.table.clone(),
                id,
                is_abstract: def.is_abstract,
                substitution_group: def.substitution_group.clone(),
                several_implementations: def.several_implementations,
                envelope_property: def.envelope_property.clone(),
                properties,
            });
        }
        log::debug!(
            "Built feature catalog {} with {} feature types",
            self.name.as_deref().unwrap_or("<unnamed>"),
            types.len()
        );
        Ok(FeatureCatalog::new(types))
    }
}

fn build_relation(
    def: &RelationDefinition,
    column_types: &HashMap<(&str, &str), SqlType>,
) -> TableRelation {
    let lookup = |table: &str, column: &str| {
        column_types
            .get(&(table, column))
            .copied()
            .unwrap_or_default()
    };
    let mut from_fields = Vec::with_capacity(def.columns.len());
    let mut to_fields = Vec::with_capacity(def.columns.len());
    for (from, to) in &def.columns {
        // a foreign key has the type of the key it references
        let to_type = lookup(&def.to_table, to);
        let from_type = match lookup(&def.from_table, from) {
            SqlType::Other => to_type,
            declared => declared,
        };
        from_fields.push(MappingField::new(def.from_table.clone(), from.clone(), from_type));
        to_fields.push(MappingField::new(def.to_table.clone(), to.clone(), to_type));
    }
    TableRelation {
        from_table: def.from_table.clone(),
        to_table: def.to_table.clone(),
        from_fields,
        to_fields,
    }
}

fn build_property(
    ft: &FeatureTypeDefinition,
    def: &PropertyDefinition,
    column_types: &HashMap<(&str, &str), SqlType>,
) -> Result<PropertyType, CatalogError> {
    let relations: Vec<TableRelation> = def
        .relations
        .iter()
        .map(|r| build_relation(r, column_types))
        .collect();
    let content_table = relations
        .last()
        .map(|r| r.to_table.clone())
        .unwrap_or_else(|| ft.table.clone());
    let field = |column: &str, sql_type: SqlType| MappingField::new(content_table.clone(), column, sql_type);
    let context = || format!("property '{}/{}'", ft.name, def.name);

    let content = match def.kind {
        PropertyKind::Simple => {
            let simple = if let Some(column) = &def.column {
                SimpleContent::Field(field(column, def.sql_type))
            } else if let Some(constant) = &def.constant {
                SimpleContent::Constant(ConstantContent {
                    value: SchemaText::new(constant.clone()),
                })
            } else if let Some(function) = &def.function {
                let params = function
                    .params
                    .iter()
                    .map(|p| {
                        if let Some(column) = &p.field {
                            Ok(FunctionParam::Field(field(column, SqlType::Other)))
                        } else if let Some(constant) = &p.constant {
                            Ok(FunctionParam::Constant(ConstantContent {
                                value: SchemaText::new(constant.clone()),
                            }))
                        } else if let Some(variable) = p.variable {
                            Ok(FunctionParam::Variable(variable))
                        } else {
                            Err(CatalogError::config_error_with_context(
                                context(),
                                "empty function parameter",
                            ))
                        }
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let result_type = match function.result_type {
                    SqlType::Other => def.sql_type,
                    declared => declared,
                };
                SimpleContent::FunctionCall(FunctionCall::new(function.template.clone(), params, result_type)?)
            } else if let Some(variable) = def.variable {
                SimpleContent::Variable(variable)
            } else {
                return Err(CatalogError::config_error_with_context(context(), "missing content"));
            };
            PropertyContent::Simple(simple)
        }
        PropertyKind::Geometry => {
            let column = def
                .column
                .as_deref()
                .ok_or_else(|| CatalogError::config_error_with_context(context(), "missing column"))?;
            PropertyContent::Geometry {
                field: field(column, SqlType::Geometry),
                srs: def.srs.clone().unwrap_or_default(),
                native_srs_code: def.native_srs_code,
            }
        }
        PropertyKind::Feature => PropertyContent::Feature {
            feature_type: def
                .feature_type
                .clone()
                .ok_or_else(|| CatalogError::config_error_with_context(context(), "missing feature_type"))?,
            external_links: def.external_links,
        },
    };

    Ok(PropertyType {
        name: def.name.clone(),
        content,
        relations,
    })
}
