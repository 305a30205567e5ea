//! Feature assembly from result rows.
//!
//! A [`FeatureFetcher`] turns rows into features. Properties stored in
//! related tables are read with further statements, one per property and
//! parent row; every statement's rows are fully consumed before the next one
//! is issued. Features are assembled at most once per request: a feature that
//! is already complete is reused, one that is still in generation is
//! referenced through a deferred placeholder.

use std::collections::HashSet;

use crate::datastore::{DatastoreError, Row, SqlType, SqlValue};
use crate::feature::{FeatureHandle, FeatureProperty, PropertyValue};
use crate::feature_catalog::{
    FeatureId, FeatureType, PropertyContent, PropertyType, RelationPath, SimpleContent,
    SpecialVariable, TableRelation, FT_COLUMN, FT_PREFIX,
};
use crate::sql_builder::{StatementBuffer, TableAliasGenerator};

use super::context::AssemblyContext;
use super::fetch_planner::{FetchContent, FetchPlan, FetchPlanner, GeometryTransforms};
use super::property_paths::{
    determine_fetch_properties, determine_sub_property_paths, PropertyPath, RequestedProperty,
};
use super::virtual_content::VirtualContentProvider;
use super::{
    append_feature_id_constraint, append_relation_joins, append_root_from, append_type_tag_condition,
    FidExtraction, RequestHandler,
};

pub struct FeatureFetcher<'h, 'a> {
    handler: &'h mut RequestHandler<'a>,
    content: VirtualContentProvider<'a>,
    ctx: AssemblyContext,
}

impl<'h, 'a> FeatureFetcher<'h, 'a> {
    pub fn new(
        handler: &'h mut RequestHandler<'a>,
        content: VirtualContentProvider<'a>,
        transforms: GeometryTransforms,
    ) -> Self {
        Self {
            handler,
            content,
            ctx: AssemblyContext::new(transforms),
        }
    }

    pub fn handler(&mut self) -> &mut RequestHandler<'a> {
        &mut *self.handler
    }

    pub fn content(&self) -> &VirtualContentProvider<'a> {
        &self.content
    }

    pub fn context(&self) -> &AssemblyContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut AssemblyContext {
        &mut self.ctx
    }

    /// Resolve deferred references and hand out the assembled features
    pub fn finish(mut self) -> AssemblyContext {
        self.ctx.resolve_deferred();
        self.ctx
    }

    fn planner(&self) -> FetchPlanner<'a> {
        FetchPlanner::new(self.handler.catalog(), self.handler.datastore())
    }

    pub fn plan(
        &mut self,
        ft: &'a FeatureType,
        requested: &[RequestedProperty<'a>],
    ) -> Result<FetchPlan, DatastoreError> {
        let planner = self.planner();
        planner.plan(ft, requested, &mut self.ctx.transforms)
    }

    pub fn extract_feature_id(
        &self,
        row: &Row,
        plan: &FetchPlan,
        ft: &FeatureType,
    ) -> Result<FeatureId, DatastoreError> {
        let values = ft
            .id_fields()
            .iter()
            .map(|field| plan.field_value(row, field).cloned())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(FeatureId::new(ft, values)?)
    }

    /// Assemble the feature of `ft` whose contents are at `plan`'s positions in `row`
    pub fn extract_feature(
        &mut self,
        row: &Row,
        plan: &FetchPlan,
        ft: &'a FeatureType,
        requested: &[RequestedProperty<'a>],
    ) -> Result<FeatureHandle, DatastoreError> {
        let fid = self.extract_feature_id(row, plan, ft)?;
        self.assemble(fid, row, plan, requested)
    }

    fn assemble(
        &mut self,
        fid: FeatureId,
        row: &Row,
        plan: &FetchPlan,
        requested: &[RequestedProperty<'a>],
    ) -> Result<FeatureHandle, DatastoreError> {
        if let Some(handle) = self.ctx.handle(&fid) {
            return Ok(handle);
        }
        let handle = self.ctx.begin(fid);
        let properties = self.extract_properties(handle, row, plan, requested)?;
        self.ctx.complete(handle, properties);
        Ok(handle)
    }

    fn extract_properties(
        &mut self,
        owner: FeatureHandle,
        row: &Row,
        plan: &FetchPlan,
        requested: &[RequestedProperty<'a>],
    ) -> Result<Vec<FeatureProperty>, DatastoreError> {
        let datastore = self.handler.datastore();
        let mut properties = Vec::new();

        for requested_property in requested {
            let pt = requested_property.property;

            if let Some(external) = pt.external_link_field() {
                let url = plan.field_value(row, &external)?;
                if let Some(url) = url.as_str() {
                    properties.push(FeatureProperty::new(
                        &pt.name,
                        PropertyValue::ExternalReference(url.to_string()),
                    ));
                    continue;
                }
            }

            if !pt.relations.is_empty() {
                self.fetch_related_properties(
                    owner,
                    row,
                    plan,
                    pt,
                    &requested_property.sub_paths,
                    &mut properties,
                )?;
                continue;
            }

            match &pt.content {
                PropertyContent::Simple(SimpleContent::Field(field)) => {
                    let value = plan.field_value(row, field)?.clone();
                    self.push_scalar(&mut properties, pt, value, field.sql_type);
                }
                PropertyContent::Simple(SimpleContent::Constant(constant)) => {
                    properties.push(FeatureProperty::new(
                        &pt.name,
                        PropertyValue::Scalar(SqlValue::Text(constant.value.to_string())),
                    ));
                }
                PropertyContent::Simple(SimpleContent::FunctionCall(call)) => {
                    let value = plan.value(row, &FetchContent::Function(call.clone()))?.clone();
                    self.push_scalar(&mut properties, pt, value, call.result_type);
                }
                PropertyContent::Simple(SimpleContent::Variable(SpecialVariable::QueryBbox)) => {
                    properties.push(FeatureProperty::new(
                        &pt.name,
                        PropertyValue::Envelope(self.content.query_bbox().clone()),
                    ));
                }
                PropertyContent::Geometry { field, srs, .. } => {
                    let content = match self.ctx.transforms.transform_for(field) {
                        Some(call) => FetchContent::Function(call.clone()),
                        None => FetchContent::Field(field.clone()),
                    };
                    let raw = plan.value(row, &content)?;
                    let srs = self.ctx.transforms.output_srs(field, srs).to_string();
                    if let Some(geometry) = datastore.decode_geometry(raw, &srs)? {
                        properties.push(FeatureProperty::new(&pt.name, PropertyValue::Geometry(geometry)));
                    }
                }
                PropertyContent::Feature { feature_type, .. } => {
                    // content is on the current row
                    let sub_ft = self.planner().inline_type(feature_type, &pt.name)?;
                    let values = sub_ft
                        .id_fields()
                        .iter()
                        .map(|field| plan.field_value(row, field).cloned())
                        .collect::<Result<Vec<_>, _>>()?;
                    if values.iter().any(SqlValue::is_null) {
                        continue;
                    }
                    let sub_fid = FeatureId::new(sub_ft, values)?;
                    let value = match self.ctx.reference(owner, &sub_fid) {
                        Some(value) => value,
                        None => {
                            let sub_paths = determine_sub_property_paths(sub_ft, &requested_property.sub_paths);
                            let sub_requested = determine_fetch_properties(sub_ft, None, &sub_paths, false)?;
                            PropertyValue::Feature(self.assemble(sub_fid, row, plan, &sub_requested)?)
                        }
                    };
                    properties.push(FeatureProperty::new(&pt.name, value));
                }
            }
        }
        Ok(properties)
    }

    fn push_scalar(
        &self,
        properties: &mut Vec<FeatureProperty>,
        pt: &PropertyType,
        value: SqlValue,
        sql_type: SqlType,
    ) {
        if value.is_null() {
            return;
        }
        let value = self.handler.datastore().convert_from_db_type(value, sql_type);
        properties.push(FeatureProperty::new(&pt.name, PropertyValue::Scalar(value)));
    }

    /// Read a property stored through table relations, one value per related row
    fn fetch_related_properties(
        &mut self,
        owner: FeatureHandle,
        row: &Row,
        plan: &FetchPlan,
        pt: &'a PropertyType,
        sub_paths: &[PropertyPath],
        properties: &mut Vec<FeatureProperty>,
    ) -> Result<(), DatastoreError> {
        let Some(first) = pt.relations.first() else {
            return Ok(());
        };
        let key = first
            .from_fields
            .iter()
            .map(|field| plan.field_value(row, field).cloned())
            .collect::<Result<Vec<_>, _>>()?;
        if key.iter().any(SqlValue::is_null) {
            return Ok(());
        }
        let datastore = self.handler.datastore();

        match &pt.content {
            PropertyContent::Simple(SimpleContent::Field(field)) => {
                let query = build_subsequent_select(
                    self.handler.fresh_aliases(),
                    &pt.relations,
                    &key,
                    None,
                    |query, alias| {
                        query.push_qualified(alias, &field.column);
                        Ok(())
                    },
                )?;
                for related in self.handler.execute(&query)? {
                    let value = related.into_iter().next().unwrap_or(SqlValue::Null);
                    self.push_scalar(properties, pt, value, field.sql_type);
                }
            }
            PropertyContent::Simple(_) => {
                return Err(DatastoreError::InconsistentMapping(format!(
                    "Related simple property '{}' must be stored in a column",
                    pt.name
                )));
            }
            PropertyContent::Geometry { field, srs, .. } => {
                let content = self.ctx.transforms.fetch_content(pt, field, datastore)?;
                let provider = &self.content;
                let query = build_subsequent_select(
                    self.handler.fresh_aliases(),
                    &pt.relations,
                    &key,
                    None,
                    |query, alias| match &content {
                        FetchContent::Field(field) => {
                            datastore.append_geometry_column(query, alias, &field.column);
                            Ok(())
                        }
                        FetchContent::Function(call) => provider.append_function_call(query, alias, call),
                    },
                )?;
                let srs = self.ctx.transforms.output_srs(field, srs).to_string();
                for related in self.handler.execute(&query)? {
                    let raw = related.first().unwrap_or(&SqlValue::Null);
                    if let Some(geometry) = datastore.decode_geometry(raw, &srs)? {
                        properties.push(FeatureProperty::new(&pt.name, PropertyValue::Geometry(geometry)));
                    }
                }
            }
            PropertyContent::Feature { feature_type, .. } => {
                let catalog = self.handler.catalog();
                let concrete = catalog.concrete_substitutions(feature_type);
                if concrete.len() > 1 {
                    for sub_fid in self.determine_related_fids(pt, feature_type, &key)? {
                        let value = match self.ctx.reference(owner, &sub_fid) {
                            Some(value) => value,
                            None => PropertyValue::Feature(self.fetch_feature(&sub_fid, sub_paths)?),
                        };
                        properties.push(FeatureProperty::new(&pt.name, value));
                    }
                    return Ok(());
                }
                let Some(sub_ft) = concrete.first().copied() else {
                    return Ok(());
                };

                let paths = determine_sub_property_paths(sub_ft, sub_paths);
                let sub_requested = determine_fetch_properties(sub_ft, None, &paths, false)?;
                let sub_plan = self.plan(sub_ft, &sub_requested)?;
                let provider = &self.content;
                let query = build_subsequent_select(
                    self.handler.fresh_aliases(),
                    &pt.relations,
                    &key,
                    Some(sub_ft),
                    |query, alias| sub_plan.append_select_list(query, alias, provider),
                )?;
                for sub_row in self.handler.execute(&query)? {
                    let sub_fid = self.extract_feature_id(&sub_row, &sub_plan, sub_ft)?;
                    let value = match self.ctx.reference(owner, &sub_fid) {
                        Some(value) => value,
                        None => PropertyValue::Feature(self.assemble(sub_fid, &sub_row, &sub_plan, &sub_requested)?),
                    };
                    properties.push(FeatureProperty::new(&pt.name, value));
                }
            }
        }
        Ok(())
    }

    /// Ids of the concrete features a polymorphic property points at.
    ///
    /// The type tag is read first; each feature is then fetched with its own
    /// type's plan.
    fn determine_related_fids(
        &mut self,
        pt: &'a PropertyType,
        contained: &str,
        key: &[SqlValue],
    ) -> Result<Vec<FeatureId>, DatastoreError> {
        let catalog = self.handler.catalog();
        let accepts = |candidate: &FeatureType| catalog.is_valid_substitution(contained, &candidate.name);
        let mut seen = HashSet::new();
        let mut fids = Vec::new();

        match pt.relation_path() {
            RelationPath::Single(relation) => {
                let Some(fk) = relation.from_fields.first() else {
                    return Ok(fids);
                };
                let tag_column = format!("{}{}", FT_PREFIX, fk.column);
                let alias = self.handler.fresh_aliases().generate_unique_alias();
                let mut query = StatementBuffer::new();
                query
                    .push_sql("SELECT DISTINCT ")
                    .push_qualified(&alias, &tag_column)
                    .push_sql(",")
                    .push_qualified(&alias, &fk.column);
                append_root_from(&mut query, &relation.from_table, &alias);
                query
                    .push_sql(" WHERE ")
                    .push_qualified(&alias, &fk.column)
                    .push_sql("=")
                    .push_argument(key[0].clone(), fk.sql_type);

                for row in self.handler.execute(&query)? {
                    let tag = row.first().unwrap_or(&SqlValue::Null);
                    let sub_ft = self
                        .handler
                        .resolve_type_tag(tag, &relation.from_table, &tag_column, accepts)?;
                    let value = row.get(1).cloned().unwrap_or(SqlValue::Null);
                    let sub_fid = FeatureId::new(sub_ft, vec![value])?;
                    if seen.insert(sub_fid.clone()) {
                        fids.push(sub_fid);
                    }
                }
            }
            RelationPath::JoinTable(first, second) => {
                let alias = self.handler.fresh_aliases().generate_unique_alias();
                let mut query = StatementBuffer::new();
                query.push_sql("SELECT ").push_qualified(&alias, FT_COLUMN);
                for field in &second.from_fields {
                    query.push_sql(",").push_qualified(&alias, &field.column);
                }
                append_root_from(&mut query, &first.to_table, &alias);
                append_key_conditions(&mut query, &alias, first, key);

                for row in self.handler.execute(&query)? {
                    let tag = row.first().unwrap_or(&SqlValue::Null);
                    let sub_ft = self
                        .handler
                        .resolve_type_tag(tag, &first.to_table, FT_COLUMN, accepts)?;
                    let sub_fid = self
                        .handler
                        .extract_feature_id(&row[1..], sub_ft, FidExtraction::ForceUnique)?;
                    if seen.insert(sub_fid.clone()) {
                        fids.push(sub_fid);
                    }
                }
            }
            _ => {
                return Err(DatastoreError::unsupported_with_context(
                    format!(
                        "polymorphic feature property '{}' stored through {} relations",
                        pt.name,
                        pt.relations.len()
                    ),
                    self.handler.datastore().name(),
                ))
            }
        }
        Ok(fids)
    }

    /// Fetch a single feature by its id.
    ///
    /// Exactly one row must match; anything else means the stored data does
    /// not match the mapping.
    pub fn fetch_feature(
        &mut self,
        fid: &FeatureId,
        paths: &[PropertyPath],
    ) -> Result<FeatureHandle, DatastoreError> {
        if let Some(handle) = self.ctx.handle(fid) {
            return Ok(handle);
        }
        let ft = self.handler.catalog().feature_type(fid.feature_type())?;
        let paths = determine_sub_property_paths(ft, paths);
        let requested = determine_fetch_properties(ft, None, &paths, false)?;
        let plan = self.plan(ft, &requested)?;

        let alias = self.handler.fresh_aliases().generate_unique_alias();
        let mut query = StatementBuffer::new();
        query.push_sql("SELECT ");
        plan.append_select_list(&mut query, &alias, &self.content)?;
        append_root_from(&mut query, &ft.table, &alias);
        append_feature_id_constraint(&mut query, &alias, ft, fid);
        append_type_tag_condition(&mut query, &alias, ft);

        let rows = self.handler.execute(&query)?;
        match rows.as_slice() {
            [row] => self.assemble(fid.clone(), row, &plan, &requested),
            _ => Err(DatastoreError::InconsistentMapping(format!(
                "Fetching {} by id returned {} rows instead of one: `{}`",
                fid,
                rows.len(),
                query.text()
            ))),
        }
    }
}

/// `X1.to1=? AND X1.to2=?` over the to-side columns of `relation`
fn append_key_conditions(query: &mut StatementBuffer, alias: &str, relation: &TableRelation, key: &[SqlValue]) {
    for (i, (field, value)) in relation.to_fields.iter().zip(key).enumerate() {
        query.push_sql(if i == 0 { " WHERE " } else { " AND " });
        query
            .push_qualified(alias, &field.column)
            .push_sql("=")
            .push_argument(value.clone(), field.sql_type);
    }
}

/// Select from the far end of `relations`, starting at the first relation's
/// to-table constrained by `key`. `select` appends the SELECT list for the
/// alias of the last table, which holds `target` when given.
fn build_subsequent_select(
    aliases: &mut TableAliasGenerator,
    relations: &[TableRelation],
    key: &[SqlValue],
    target: Option<&FeatureType>,
    select: impl FnOnce(&mut StatementBuffer, &str) -> Result<(), DatastoreError>,
) -> Result<StatementBuffer, DatastoreError> {
    let Some(first) = relations.first() else {
        return Err(DatastoreError::InconsistentMapping(
            "Subsequent select without relations".to_string(),
        ));
    };
    let aliases = aliases.generate_unique_aliases(relations.len());
    let last_alias = &aliases[relations.len() - 1];

    let mut query = StatementBuffer::new();
    query.push_sql("SELECT ");
    select(&mut query, last_alias)?;

    let last_table = target.map(|ft| ft.table.as_str());
    let first_table = match last_table {
        Some(table) if relations.len() == 1 => table,
        _ => first.to_table.as_str(),
    };
    append_root_from(&mut query, first_table, &aliases[0]);
    append_relation_joins(&mut query, &relations[1..], &aliases, last_table);
    append_key_conditions(&mut query, &aliases[0], first, key);
    if let Some(ft) = target {
        append_type_tag_condition(&mut query, last_alias, ft);
    }
    Ok(query)
}
