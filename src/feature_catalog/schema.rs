use std::collections::HashMap;
use std::fmt;

use super::errors::CatalogError;
use crate::datastore::SqlType;
use crate::sql_builder::SchemaText;

/// Type tag column of a join table that disambiguates concrete subfeature types
pub const FT_COLUMN: &str = "featuretype";

/// Prefix of the type tag column that accompanies a foreign key column
pub const FT_PREFIX: &str = "FT_";

/// Suffix of the column holding an external URL for externally linked properties
pub const EXTERNAL_SUFFIX: &str = "_external";

/// A table column together with its declared SQL type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MappingField {
    pub table: String,
    pub column: String,
    pub sql_type: SqlType,
}

impl MappingField {
    pub fn new(table: impl Into<String>, column: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            sql_type,
        }
    }
}

/// A literal from the mapping, spliced into SQL or returned as property value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConstantContent {
    pub value: SchemaText,
}

/// Request-scoped value resolved while building a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialVariable {
    /// Bounding box of the active filter
    QueryBbox,
}

impl fmt::Display for SpecialVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpecialVariable::QueryBbox => f.write_str("$QUERY.BBOX"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FunctionParam {
    Field(MappingField),
    Constant(ConstantContent),
    Variable(SpecialVariable),
}

/// Piece of a split function call template
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TemplatePart {
    Text(SchemaText),
    /// 1-based parameter marker (`$1`, `$2`, ...)
    Param(usize),
}

/// SQL function call with positional parameter slots, e.g. `ST_Transform($1,$2)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionCall {
    pub template: String,
    pub parts: Vec<TemplatePart>,
    pub params: Vec<FunctionParam>,
    pub result_type: SqlType,
}

impl FunctionCall {
    /// Split `template` at its `$n` markers and check every marker has a parameter
    pub fn new(
        template: impl Into<String>,
        params: Vec<FunctionParam>,
        result_type: SqlType,
    ) -> Result<Self, CatalogError> {
        let template = template.into();
        let parts = split_template(&template);
        for part in &parts {
            if let TemplatePart::Param(n) = part {
                if *n == 0 || *n > params.len() {
                    return Err(CatalogError::config_error_with_context(
                        format!("function call '{}'", template),
                        format!("marker ${} has no parameter ({} given)", n, params.len()),
                    ));
                }
            }
        }
        Ok(Self {
            template,
            parts,
            params,
            result_type,
        })
    }
}

lazy_static::lazy_static! {
    static ref PARAM_MARKER: regex::Regex = regex::Regex::new(r"\$(\d+)").expect("valid marker regex");
}

fn split_template(template: &str) -> Vec<TemplatePart> {
    let mut parts = Vec::new();
    let mut last = 0;
    for caps in PARAM_MARKER.captures_iter(template) {
        let Some(marker) = caps.get(0) else {
            continue;
        };
        if marker.start() > last {
            parts.push(TemplatePart::Text(SchemaText::new(&template[last..marker.start()])));
        }
        // digits only, so parsing can only fail on overflow
        let index = caps[1].parse::<usize>().unwrap_or(usize::MAX);
        parts.push(TemplatePart::Param(index));
        last = marker.end();
    }
    if last < template.len() {
        parts.push(TemplatePart::Text(SchemaText::new(&template[last..])));
    }
    parts
}

/// Storage descriptor of a simple value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SimpleContent {
    Field(MappingField),
    Constant(ConstantContent),
    FunctionCall(FunctionCall),
    Variable(SpecialVariable),
}

/// Join path step: `from_table.from_fields = to_table.to_fields`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRelation {
    pub from_table: String,
    pub to_table: String,
    pub from_fields: Vec<MappingField>,
    pub to_fields: Vec<MappingField>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyContent {
    Simple(SimpleContent),
    Geometry {
        field: MappingField,
        srs: String,
        /// Backend code of the SRS the geometry is stored in; `None` if unknown
        native_srs_code: Option<i32>,
    },
    Feature {
        feature_type: String,
        external_links: bool,
    },
}

/// Where a property's content lives relative to its feature's root table
#[derive(Debug, Clone, Copy)]
pub enum RelationPath<'a> {
    /// Content is on the feature's own row
    Inline,
    /// One relation; the foreign key lives in the current table (zero or one match)
    Single(&'a TableRelation),
    /// Two relations through a join table carrying the type tag (zero or many)
    JoinTable(&'a TableRelation, &'a TableRelation),
    /// Longer chains; only supported for non-polymorphic content
    Chain(&'a [TableRelation]),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyType {
    pub name: String,
    pub content: PropertyContent,
    pub relations: Vec<TableRelation>,
}

impl PropertyType {
    pub fn relation_path(&self) -> RelationPath<'_> {
        match self.relations.as_slice() {
            [] => RelationPath::Inline,
            [single] => RelationPath::Single(single),
            [first, second] => RelationPath::JoinTable(first, second),
            chain => RelationPath::Chain(chain),
        }
    }

    pub fn is_feature_property(&self) -> bool {
        matches!(self.content, PropertyContent::Feature { .. })
    }

    /// Name of the contained feature type for feature properties
    pub fn contained_type(&self) -> Option<&str> {
        match &self.content {
            PropertyContent::Feature { feature_type, .. } => Some(feature_type.as_str()),
            _ => None,
        }
    }

    pub fn external_links_allowed(&self) -> bool {
        matches!(
            self.content,
            PropertyContent::Feature {
                external_links: true,
                ..
            }
        )
    }

    /// Column holding the URL of an externally linked feature
    pub fn external_link_field(&self) -> Option<MappingField> {
        if !self.external_links_allowed() {
            return None;
        }
        let fld = self.relations.first()?.from_fields.first()?;
        Some(MappingField::new(
            fld.table.clone(),
            format!("{}{}", fld.column, EXTERNAL_SUFFIX),
            SqlType::Varchar,
        ))
    }
}

/// Identifier definition of a feature type
#[derive(Debug, Clone, PartialEq)]
pub struct MappedGmlId {
    pub fields: Vec<MappingField>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureType {
    pub name: String,
    pub table: String,
    pub id: MappedGmlId,
    pub is_abstract: bool,
    /// Abstract type this type may substitute for
    pub substitution_group: Option<String>,
    /// Root table is shared with other types and carries a `featuretype` column
    pub several_implementations: bool,
    /// Geometry property used to compute the feature's bounding envelope
    pub envelope_property: Option<String>,
    pub properties: Vec<PropertyType>,
}

impl FeatureType {
    pub fn property(&self, name: &str) -> Option<&PropertyType> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn id_fields(&self) -> &[MappingField] {
        &self.id.fields
    }
}

/// Immutable catalog of feature types, valid for the lifetime of a request
#[derive(Debug, Clone, Default)]
pub struct FeatureCatalog {
    types: Vec<FeatureType>,
    by_name: HashMap<String, usize>,
}

impl FeatureCatalog {
    pub fn new(types: Vec<FeatureType>) -> Self {
        let by_name = types
            .iter()
            .enumerate()
            .map(|(i, ft)| (ft.name.clone(), i))
            .collect();
        Self { types, by_name }
    }

    pub fn get(&self, name: &str) -> Option<&FeatureType> {
        self.by_name.get(name).map(|&i| &self.types[i])
    }

    pub fn feature_type(&self, name: &str) -> Result<&FeatureType, CatalogError> {
        self.get(name).ok_or_else(|| CatalogError::UnknownFeatureType {
            type_name: name.to_string(),
        })
    }

    pub fn feature_types(&self) -> impl Iterator<Item = &FeatureType> {
        self.types.iter()
    }

    /// `candidate` may appear where `target` is expected
    pub fn is_valid_substitution(&self, target: &str, candidate: &str) -> bool {
        let mut current = Some(candidate);
        let mut steps = 0;
        while let Some(name) = current {
            if name == target {
                return true;
            }
            // substitution groups are validated acyclic; the bound guards a broken catalog
            steps += 1;
            if steps > self.types.len() {
                return false;
            }
            current = self.get(name).and_then(|ft| ft.substitution_group.as_deref());
        }
        false
    }

    /// Non-abstract types that may appear where `name` is expected, in declaration order
    pub fn concrete_substitutions(&self, name: &str) -> Vec<&FeatureType> {
        self.types
            .iter()
            .filter(|ft| !ft.is_abstract && self.is_valid_substitution(name, &ft.name))
            .collect()
    }

    /// `name` itself and every type it may substitute for
    pub fn substitutables(&self, name: &str) -> Vec<&FeatureType> {
        self.types
            .iter()
            .filter(|ft| self.is_valid_substitution(&ft.name, name))
            .collect()
    }
}
