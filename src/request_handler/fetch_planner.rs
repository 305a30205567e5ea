//! Fetch planning: which columns and expressions to select for a feature type.
//!
//! Contents that read the same column are grouped and selected once. The
//! position map assigns every content of a group the group's index in the
//! SELECT list. Function calls (including coordinate transforms) follow the
//! column groups.

use std::collections::HashMap;

use crate::datastore::{Datastore, DatastoreError, Row, SqlType, SqlValue};
use crate::feature_catalog::{
    FeatureCatalog, FeatureType, FunctionCall, MappingField, PropertyContent, PropertyType,
    SimpleContent,
};
use crate::sql_builder::StatementBuffer;

use super::property_paths::{determine_fetch_properties, determine_sub_property_paths, RequestedProperty};
use super::virtual_content::VirtualContentProvider;

/// Something that occupies one position of a result row
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FetchContent {
    Field(MappingField),
    Function(FunctionCall),
}

impl FetchContent {
    pub fn describe(&self) -> String {
        match self {
            FetchContent::Field(field) => format!("{}.{}", field.table, field.column),
            FetchContent::Function(call) => call.template.clone(),
        }
    }
}

/// Grouped fetch contents plus their result row positions
#[derive(Debug, Clone, Default)]
pub struct FetchPlan {
    groups: Vec<Vec<FetchContent>>,
    positions: HashMap<FetchContent, usize>,
    offset: usize,
}

impl FetchPlan {
    fn from_groups(groups: Vec<Vec<FetchContent>>) -> Self {
        let mut positions = HashMap::new();
        for (i, group) in groups.iter().enumerate() {
            for content in group {
                positions.entry(content.clone()).or_insert(i);
            }
        }
        Self {
            groups,
            positions,
            offset: 0,
        }
    }

    /// Same plan placed after `offset` columns of a joined statement
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Number of selected columns
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn position(&self, content: &FetchContent) -> Option<usize> {
        self.positions.get(content).map(|p| p + self.offset)
    }

    pub fn field_position(&self, field: &MappingField) -> Option<usize> {
        self.position(&FetchContent::Field(field.clone()))
    }

    /// Value of `content` in `row`
    pub fn value<'r>(&self, row: &'r Row, content: &FetchContent) -> Result<&'r SqlValue, DatastoreError> {
        self.position(content)
            .and_then(|pos| row.get(pos))
            .ok_or_else(|| {
                DatastoreError::InconsistentMapping(format!(
                    "'{}' was not fetched for this row",
                    content.describe()
                ))
            })
    }

    pub fn field_value<'r>(&self, row: &'r Row, field: &MappingField) -> Result<&'r SqlValue, DatastoreError> {
        self.value(row, &FetchContent::Field(field.clone()))
    }

    /// Append the SELECT list, qualifying columns with `table_alias`
    pub fn append_select_list(
        &self,
        query: &mut StatementBuffer,
        table_alias: &str,
        content: &VirtualContentProvider<'_>,
    ) -> Result<(), DatastoreError> {
        for (i, group) in self.groups.iter().enumerate() {
            if i > 0 {
                query.push_sql(",");
            }
            match group.first() {
                Some(FetchContent::Field(field)) if field.sql_type == SqlType::Geometry => {
                    content
                        .datastore()
                        .append_geometry_column(query, table_alias, &field.column);
                }
                Some(FetchContent::Field(field)) => {
                    query.push_qualified(table_alias, &field.column);
                }
                Some(FetchContent::Function(call)) => {
                    content.append_function_call(query, table_alias, call)?;
                }
                None => {}
            }
        }
        Ok(())
    }

    pub fn describe(&self) -> Vec<String> {
        self.groups
            .iter()
            .filter_map(|g| g.first())
            .map(FetchContent::describe)
            .collect()
    }
}

/// Per-request coordinate transform decisions, keyed by geometry column
#[derive(Debug, Clone, Default)]
pub struct GeometryTransforms {
    query_srs: Option<String>,
    calls: HashMap<MappingField, FunctionCall>,
}

impl GeometryTransforms {
    pub fn new(query_srs: Option<String>) -> Self {
        Self {
            query_srs,
            calls: HashMap::new(),
        }
    }

    pub fn query_srs(&self) -> Option<&str> {
        self.query_srs.as_deref()
    }

    /// Target SRS if the geometry must be transformed for this request.
    ///
    /// Fails when a different SRS is requested but the stored SRS is unknown.
    pub fn check_transformation(&self, pt: &PropertyType) -> Result<Option<&str>, DatastoreError> {
        let PropertyContent::Geometry {
            srs,
            native_srs_code,
            ..
        } = &pt.content
        else {
            return Ok(None);
        };
        match self.query_srs.as_deref() {
            Some(queried) if queried != srs => {
                if native_srs_code.is_none() {
                    return Err(DatastoreError::UnsupportedCapability(format!(
                        "Cannot transform property '{}' from {} to {}: the stored SRS is not specified",
                        pt.name, srs, queried
                    )));
                }
                Ok(Some(queried))
            }
            _ => Ok(None),
        }
    }

    /// Column or transform call to select for a geometry property
    pub fn fetch_content(
        &mut self,
        pt: &PropertyType,
        field: &MappingField,
        datastore: &dyn Datastore,
    ) -> Result<FetchContent, DatastoreError> {
        let Some(target) = self.check_transformation(pt)? else {
            return Ok(FetchContent::Field(field.clone()));
        };
        let Some(code) = datastore.srs_code(target) else {
            log::warn!(
                "SRS {} is unknown to backend {}; '{}' is returned untransformed",
                target,
                datastore.name(),
                pt.name
            );
            return Ok(FetchContent::Field(field.clone()));
        };
        if let Some(call) = self.calls.get(field) {
            return Ok(FetchContent::Function(call.clone()));
        }
        let call = datastore.build_srs_transform_call(field, code)?;
        self.calls.insert(field.clone(), call.clone());
        Ok(FetchContent::Function(call))
    }

    pub fn transform_for(&self, field: &MappingField) -> Option<&FunctionCall> {
        self.calls.get(field)
    }

    /// SRS of a decoded geometry: the requested one if it was transformed
    pub fn output_srs<'s>(&'s self, field: &MappingField, property_srs: &'s str) -> &'s str {
        match (self.calls.contains_key(field), self.query_srs.as_deref()) {
            (true, Some(queried)) => queried,
            _ => property_srs,
        }
    }
}

pub struct FetchPlanner<'c> {
    catalog: &'c FeatureCatalog,
    datastore: &'c dyn Datastore,
}

#[derive(Default)]
struct ContentCollector {
    columns: Vec<(String, Vec<FetchContent>)>,
    functions: Vec<FetchContent>,
}

impl ContentCollector {
    fn add_column(&mut self, column: &str, content: FetchContent) {
        match self.columns.iter_mut().find(|(c, _)| c == column) {
            Some((_, group)) => {
                if !group.contains(&content) {
                    group.push(content);
                }
            }
            None => self.columns.push((column.to_string(), vec![content])),
        }
    }

    fn add_field(&mut self, field: &MappingField) {
        self.add_column(&field.column, FetchContent::Field(field.clone()));
    }

    fn add_function(&mut self, content: FetchContent) {
        if !self.functions.contains(&content) {
            self.functions.push(content);
        }
    }

    fn into_plan(self) -> FetchPlan {
        let mut groups: Vec<Vec<FetchContent>> = self.columns.into_iter().map(|(_, g)| g).collect();
        groups.extend(self.functions.into_iter().map(|f| vec![f]));
        FetchPlan::from_groups(groups)
    }
}

impl<'c> FetchPlanner<'c> {
    pub fn new(catalog: &'c FeatureCatalog, datastore: &'c dyn Datastore) -> Self {
        Self { catalog, datastore }
    }

    /// Plan the contents of `ft`'s root table needed for `requested`
    pub fn plan(
        &self,
        ft: &FeatureType,
        requested: &[RequestedProperty<'_>],
        transforms: &mut GeometryTransforms,
    ) -> Result<FetchPlan, DatastoreError> {
        let mut collector = ContentCollector::default();
        let mut stack = vec![ft.name.as_str()];
        self.collect(ft, requested, transforms, &mut collector, &mut stack)?;
        Ok(collector.into_plan())
    }

    fn collect<'s>(
        &'s self,
        ft: &FeatureType,
        requested: &[RequestedProperty<'_>],
        transforms: &mut GeometryTransforms,
        collector: &mut ContentCollector,
        stack: &mut Vec<&'s str>,
    ) -> Result<(), DatastoreError> {
        for field in ft.id_fields() {
            collector.add_field(field);
        }

        for requested_property in requested {
            let pt = requested_property.property;
            if let Some(external) = pt.external_link_field() {
                collector.add_field(&external);
            }

            if let Some(first) = pt.relations.first() {
                // key of the related rows, stored in this table
                for field in &first.from_fields {
                    collector.add_field(field);
                }
                continue;
            }

            match &pt.content {
                PropertyContent::Simple(SimpleContent::Field(field)) => collector.add_field(field),
                PropertyContent::Simple(SimpleContent::FunctionCall(call)) => {
                    collector.add_function(FetchContent::Function(call.clone()))
                }
                PropertyContent::Simple(SimpleContent::Constant(_) | SimpleContent::Variable(_)) => {}
                PropertyContent::Geometry { field, .. } => {
                    match transforms.fetch_content(pt, field, self.datastore)? {
                        FetchContent::Field(field) => collector.add_field(&field),
                        function => collector.add_function(function),
                    }
                }
                PropertyContent::Feature { feature_type, .. } => {
                    let sub_ft = self.inline_type(feature_type, &pt.name)?;
                    if stack.contains(&sub_ft.name.as_str()) {
                        return Err(DatastoreError::InconsistentMapping(format!(
                            "Inline feature property '{}' nests feature type '{}' within itself",
                            pt.name, sub_ft.name
                        )));
                    }
                    let sub_paths = determine_sub_property_paths(sub_ft, &requested_property.sub_paths);
                    let sub_requested = determine_fetch_properties(sub_ft, None, &sub_paths, false)?;
                    stack.push(sub_ft.name.as_str());
                    self.collect(sub_ft, &sub_requested, transforms, collector, stack)?;
                    stack.pop();
                }
            }
        }
        Ok(())
    }

    /// Concrete type of a feature property stored in the parent's own row
    pub fn inline_type(&self, contained: &str, property: &str) -> Result<&'c FeatureType, DatastoreError> {
        let substitutions = self.catalog.concrete_substitutions(contained);
        match substitutions.as_slice() {
            [single] => Ok(single),
            [] => Err(DatastoreError::InconsistentMapping(format!(
                "Feature type '{}' of property '{}' has no concrete substitution",
                contained, property
            ))),
            _ => Err(DatastoreError::unsupported_with_context(
                format!(
                    "inline feature property '{}' with several concrete types of '{}'",
                    property, contained
                ),
                self.datastore.name(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::datastore::ErrorKind;
    use crate::request_handler::property_paths::PropertyPath;
    use crate::testing::{sample_catalog, TestDatastore};

    fn plan_for(type_name: &str, paths: &[&str], query_srs: Option<&str>) -> Result<FetchPlan, DatastoreError> {
        let catalog = sample_catalog();
        let ft = catalog.feature_type(type_name).unwrap();
        let paths: Vec<PropertyPath> = paths.iter().map(|p| PropertyPath::parse(p)).collect();
        let requested = determine_fetch_properties(ft, None, &paths, false).unwrap();
        let mut transforms = GeometryTransforms::new(query_srs.map(str::to_string));
        FetchPlanner::new(&catalog, &TestDatastore).plan(ft, &requested, &mut transforms)
    }

    #[test]
    fn test_id_first_and_foreign_key_instead_of_far_columns() {
        let plan = plan_for("Road", &["name", "owner"], None).unwrap();
        assert_eq!(plan.describe(), vec!["road.id", "road.name", "road.owner_id"]);
    }

    #[test]
    fn test_shared_column_is_fetched_once() {
        // `lanes` and `lane_count` both read road.lanes
        let plan = plan_for("Road", &["lanes", "lane_count"], None).unwrap();
        assert_eq!(plan.describe(), vec!["road.id", "road.lanes"]);
        let catalog = sample_catalog();
        let road = catalog.feature_type("Road").unwrap();
        let field = |name: &str| match &road.property(name).unwrap().content {
            PropertyContent::Simple(SimpleContent::Field(f)) => f.clone(),
            other => panic!("unexpected content {:?}", other),
        };
        assert_eq!(plan.field_position(&field("lanes")), Some(1));
        assert_eq!(plan.field_position(&field("lane_count")), Some(1));
    }

    #[test]
    fn test_function_calls_follow_columns() {
        let plan = plan_for("Road", &["label", "name"], None).unwrap();
        assert_eq!(plan.describe(), vec!["road.id", "road.name", "upper($1)"]);
    }

    #[test]
    fn test_transform_call_replaces_geometry_column() {
        let plan = plan_for("Road", &["geom"], Some("EPSG:25832")).unwrap();
        assert_eq!(plan.describe(), vec!["road.id", "ST_Transform($1,$2)"]);

        let plan = plan_for("Road", &["geom"], Some("EPSG:4326")).unwrap();
        assert_eq!(plan.describe(), vec!["road.id", "road.geom"]);
    }

    #[test]
    fn test_transform_without_native_srs_fails() {
        let err = plan_for("Person", &["home"], Some("EPSG:25832")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedCapability);
    }

    #[test]
    fn test_inline_subfeature_contents_are_included() {
        let plan = plan_for("Person", &["address"], None).unwrap();
        assert_eq!(plan.describe(), vec!["person.id", "person.street", "person.city"]);
    }

    #[test]
    fn test_offset_shifts_positions() {
        let plan = plan_for("Road", &["name"], None).unwrap().with_offset(3);
        let catalog = sample_catalog();
        let road = catalog.feature_type("Road").unwrap();
        assert_eq!(plan.field_position(&road.id_fields()[0]), Some(3));
        assert_eq!(plan.len(), 2);
    }

    #[test]
    fn test_select_list() {
        let plan = plan_for("Road", &["name", "label"], None).unwrap();
        let config = EngineConfig::default();
        let content = VirtualContentProvider::new(None, &TestDatastore, &config);
        let mut query = StatementBuffer::new();
        plan.append_select_list(&mut query, "X1", &content).unwrap();
        assert_eq!(query.text(), "X1.id,X1.name,upper(X1.name)");
    }
}
