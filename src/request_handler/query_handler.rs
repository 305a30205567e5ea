//! Query execution: counting, single-type assembly and joined tuples.
//!
//! Every query builds one initial statement from the filter compiler's
//! fragments and the fetch plans of the requested types. Rows are then
//! de-duplicated by feature id (or id tuple), paginated and assembled.
//! Deferred references are resolved once all rows are processed.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::datastore::{DatastoreError, SqlType, SqlValue};
use crate::feature::{FeatureCollection, FeatureHandle, FeatureProperty, PropertyValue, QueryResult, TupleCollection};
use crate::feature_catalog::{FeatureId, FeatureType, FT_COLUMN};
use crate::filter::{CompiledFilter, Filter, FilterScope, SortProperty};
use crate::sql_builder::StatementBuffer;

use super::context::AssemblyContext;
use super::feature_fetcher::FeatureFetcher;
use super::fetch_planner::{FetchPlan, FetchPlanner, GeometryTransforms};
use super::property_paths::{determine_fetch_properties, PropertyPath, RequestedProperty};
use super::virtual_content::VirtualContentProvider;
use super::{append_feature_id_columns, RequestHandler};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultType {
    #[default]
    Results,
    /// Only count the matching features
    Hits,
}

/// A feature query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Query {
    /// Requested feature types; two or more make a join query
    pub type_names: Vec<String>,
    /// Alias per requested type, usable as qualifier in filters and paths
    pub aliases: Option<Vec<String>>,
    pub filter: Option<Filter>,
    pub sort: Vec<SortProperty>,
    /// Coordinate system geometries are returned in
    pub srs_name: Option<String>,
    /// 1-based position of the first feature (or tuple) to return
    pub start_position: usize,
    /// Defaults to the configured maximum
    pub max_features: Option<usize>,
    pub result_type: ResultType,
    /// Requested property paths; empty means all properties
    pub property_names: Vec<PropertyPath>,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            type_names: Vec::new(),
            aliases: None,
            filter: None,
            sort: Vec::new(),
            srs_name: None,
            start_position: 1,
            max_features: None,
            result_type: ResultType::Results,
            property_names: Vec::new(),
        }
    }
}

impl Query {
    pub fn for_type(type_name: impl Into<String>) -> Self {
        Self {
            type_names: vec![type_name.into()],
            ..Default::default()
        }
    }
}

/// Initial statement and fetch plans of a query, without executing anything
#[derive(Debug, Clone, Serialize)]
pub struct QueryExplanation {
    pub sql: String,
    pub arguments: Vec<SqlValue>,
    pub plans: Vec<TypePlanExplanation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TypePlanExplanation {
    pub feature_type: String,
    pub columns: Vec<String>,
}

struct PlannedType<'a> {
    ft: &'a FeatureType,
    requested: Vec<RequestedProperty<'a>>,
    plan: FetchPlan,
    /// Envelope geometry property added to the request only for the envelope
    implicit_envelope: bool,
}

struct InitialStatement<'a> {
    query: StatementBuffer,
    types: Vec<PlannedType<'a>>,
}

pub struct QueryHandler<'h, 'a> {
    handler: &'h mut RequestHandler<'a>,
    query: &'h Query,
}

impl<'h, 'a> QueryHandler<'h, 'a> {
    pub fn new(handler: &'h mut RequestHandler<'a>, query: &'h Query) -> Self {
        Self { handler, query }
    }

    pub fn perform(&mut self) -> Result<QueryResult, DatastoreError> {
        let types = self.resolve_types()?;
        match (self.query.result_type, types.len()) {
            (ResultType::Hits, _) => self.count(&types).map(QueryResult::Count),
            (ResultType::Results, 1) => self.perform_simple(&types).map(QueryResult::Features),
            (ResultType::Results, _) => self.perform_joined(&types).map(QueryResult::Tuples),
        }
    }

    pub fn explain(&mut self) -> Result<QueryExplanation, DatastoreError> {
        let types = self.resolve_types()?;
        let content = self.content_provider();
        let (query, plans) = match self.query.result_type {
            ResultType::Hits => (self.build_count_statement(&types, &content)?, Vec::new()),
            ResultType::Results => {
                let mut transforms = GeometryTransforms::new(self.query.srs_name.clone());
                let initial = self.build_initial_statement(&types, &content, &mut transforms)?;
                let plans = initial
                    .types
                    .iter()
                    .map(|planned| TypePlanExplanation {
                        feature_type: planned.ft.name.clone(),
                        columns: planned.plan.describe(),
                    })
                    .collect();
                (initial.query, plans)
            }
        };
        Ok(QueryExplanation {
            sql: query.text().to_string(),
            arguments: query.arguments().iter().map(|a| a.value.clone()).collect(),
            plans,
        })
    }

    fn content_provider(&self) -> VirtualContentProvider<'a> {
        VirtualContentProvider::new(
            self.query.filter.as_ref(),
            self.handler.datastore(),
            self.handler.config(),
        )
    }

    fn max_features(&self) -> usize {
        self.query
            .max_features
            .unwrap_or(self.handler.config().default_max_features)
    }

    fn resolve_types(&self) -> Result<Vec<&'a FeatureType>, DatastoreError> {
        if self.query.type_names.is_empty() {
            return Err(DatastoreError::InvalidRequest(
                "Query does not name a feature type".to_string(),
            ));
        }
        if let Some(aliases) = &self.query.aliases {
            if aliases.len() != self.query.type_names.len() {
                return Err(DatastoreError::InvalidRequest(format!(
                    "{} aliases given for {} feature types",
                    aliases.len(),
                    self.query.type_names.len()
                )));
            }
        }
        let catalog = self.handler.catalog();
        self.query
            .type_names
            .iter()
            .map(|name| match catalog.get(name) {
                Some(ft) if ft.is_abstract => Err(DatastoreError::InvalidRequest(format!(
                    "Feature type '{}' is abstract and cannot be queried",
                    name
                ))),
                Some(ft) => Ok(ft),
                None => Err(DatastoreError::InvalidRequest(format!(
                    "Unknown feature type '{}'",
                    name
                ))),
            })
            .collect()
    }

    fn compile(
        &mut self,
        types: &[&'a FeatureType],
        content: &VirtualContentProvider<'a>,
    ) -> Result<CompiledFilter, DatastoreError> {
        let scope = FilterScope {
            catalog: self.handler.catalog(),
            feature_types: types,
            aliases: self.query.aliases.as_deref(),
            filter: self.query.filter.as_ref(),
            sort: &self.query.sort,
        };
        let compiler = self.handler.filter_compiler();
        let compiled = compiler.compile(&scope, self.handler.fresh_aliases(), content)?;
        if compiled.root_aliases.len() != types.len() {
            return Err(DatastoreError::InconsistentMapping(format!(
                "Filter compiler returned {} table aliases for {} feature types",
                compiled.root_aliases.len(),
                types.len()
            )));
        }
        Ok(compiled)
    }

    /// Add the envelope geometry to `requested` if missing; true if it was added
    fn add_envelope_property(ft: &'a FeatureType, requested: &mut Vec<RequestedProperty<'a>>) -> bool {
        let Some(name) = ft.envelope_property.as_deref() else {
            return false;
        };
        if requested.iter().any(|r| r.property.name == name) {
            return false;
        }
        let Some(index) = ft.properties.iter().position(|p| p.name == name) else {
            return false;
        };
        let declared = |r: &RequestedProperty<'a>| {
            ft.properties
                .iter()
                .position(|p| p.name == r.property.name)
                .unwrap_or(usize::MAX)
        };
        let at = requested
            .iter()
            .position(|r| declared(r) > index)
            .unwrap_or(requested.len());
        requested.insert(
            at,
            RequestedProperty {
                property: &ft.properties[index],
                sub_paths: Vec::new(),
            },
        );
        true
    }

    fn build_initial_statement(
        &mut self,
        types: &[&'a FeatureType],
        content: &VirtualContentProvider<'a>,
        transforms: &mut GeometryTransforms,
    ) -> Result<InitialStatement<'a>, DatastoreError> {
        let compiled = self.compile(types, content)?;
        let planner = FetchPlanner::new(self.handler.catalog(), self.handler.datastore());
        let joined = types.len() > 1;

        let mut planned = Vec::with_capacity(types.len());
        let mut offset = 0;
        for (i, &ft) in types.iter().enumerate() {
            let alias = self
                .query
                .aliases
                .as_ref()
                .and_then(|aliases| aliases.get(i))
                .map(String::as_str);
            let mut requested = determine_fetch_properties(ft, alias, &self.query.property_names, joined)?;
            let implicit_envelope = Self::add_envelope_property(ft, &mut requested);
            let plan = planner.plan(ft, &requested, transforms)?.with_offset(offset);
            offset += plan.len();
            planned.push(PlannedType {
                ft,
                requested,
                plan,
                implicit_envelope,
            });
        }

        let mut query = StatementBuffer::new();
        query.push_sql("SELECT ");
        for (i, planned_type) in planned.iter().enumerate() {
            if i > 0 {
                query.push_sql(",");
            }
            planned_type
                .plan
                .append_select_list(&mut query, &compiled.root_aliases[i], content)?;
        }
        query.push_sql(" FROM ").push_buffer(&compiled.from_clause);
        append_where(&mut query, &compiled, types);
        query.push_buffer(&compiled.order_by);

        Ok(InitialStatement {
            query,
            types: planned,
        })
    }

    fn build_count_statement(
        &mut self,
        types: &[&'a FeatureType],
        content: &VirtualContentProvider<'a>,
    ) -> Result<StatementBuffer, DatastoreError> {
        let compiled = self.compile(types, content)?;
        let mut query = StatementBuffer::new();

        match types {
            [ft] if ft.id_fields().len() == 1 => {
                query.push_sql("SELECT COUNT(DISTINCT ");
                append_feature_id_columns(&mut query, &compiled.root_aliases[0], ft);
                query.push_sql(") FROM ").push_buffer(&compiled.from_clause);
                append_where(&mut query, &compiled, types);
            }
            _ => {
                query.push_sql("SELECT COUNT(*) FROM (SELECT DISTINCT ");
                for (i, ft) in types.iter().enumerate() {
                    if i > 0 {
                        query.push_sql(",");
                    }
                    append_feature_id_columns(&mut query, &compiled.root_aliases[i], ft);
                }
                query.push_sql(" FROM ").push_buffer(&compiled.from_clause);
                append_where(&mut query, &compiled, types);
                query.push_sql(") fs_ids");
            }
        }
        Ok(query)
    }

    fn count(&mut self, types: &[&'a FeatureType]) -> Result<u64, DatastoreError> {
        let content = self.content_provider();
        let query = self.build_count_statement(types, &content)?;
        let rows = self.handler.execute(&query)?;
        rows.first()
            .and_then(|row| row.first())
            .and_then(SqlValue::as_i64)
            .and_then(|count| u64::try_from(count).ok())
            .ok_or_else(|| {
                DatastoreError::InconsistentMapping(format!(
                    "Count statement returned no count: `{}`",
                    query.text()
                ))
            })
    }

    fn perform_simple(&mut self, types: &[&'a FeatureType]) -> Result<FeatureCollection, DatastoreError> {
        let content = self.content_provider();
        let mut transforms = GeometryTransforms::new(self.query.srs_name.clone());
        let initial = self.build_initial_statement(types, &content, &mut transforms)?;
        let rows = self.handler.execute(&initial.query)?;

        let skip = self.query.start_position.saturating_sub(1);
        let max = self.max_features();
        let envelope_name = self.handler.config().envelope_property_name.as_str();
        let planned = &initial.types[0];

        let mut fetcher = FeatureFetcher::new(&mut *self.handler, content, transforms);
        let mut seen = HashSet::new();
        let mut skipped = 0;
        let mut roots = Vec::new();
        for row in &rows {
            if roots.len() >= max {
                break;
            }
            let fid = fetcher.extract_feature_id(row, &planned.plan, planned.ft)?;
            if !seen.insert(fid.clone()) {
                // another join row of a feature already emitted or skipped
                continue;
            }
            if skipped < skip {
                skipped += 1;
                continue;
            }
            let fresh = fetcher.context().handle(&fid).is_none();
            let handle = fetcher.extract_feature(row, &planned.plan, planned.ft, &planned.requested)?;
            accommodate_envelope(fetcher.context_mut(), planned, handle, fresh, envelope_name);
            roots.push(handle);
        }
        log::debug!(
            "Query on {} returned {} of {} rows as features",
            planned.ft.name,
            roots.len(),
            rows.len()
        );

        let arena = fetcher.finish().into_arena();
        Ok(FeatureCollection::new(arena, roots))
    }

    fn perform_joined(&mut self, types: &[&'a FeatureType]) -> Result<TupleCollection, DatastoreError> {
        let content = self.content_provider();
        let mut transforms = GeometryTransforms::new(self.query.srs_name.clone());
        let initial = self.build_initial_statement(types, &content, &mut transforms)?;
        let rows = self.handler.execute(&initial.query)?;

        let skip = self.query.start_position.saturating_sub(1);
        let max = self.max_features();
        let envelope_name = self.handler.config().envelope_property_name.as_str();

        let mut fetcher = FeatureFetcher::new(&mut *self.handler, content, transforms);
        let mut seen: HashSet<Vec<FeatureId>> = HashSet::new();
        let mut skipped = 0;
        let mut tuples = Vec::new();
        for row in &rows {
            if tuples.len() >= max {
                break;
            }
            let fids = initial
                .types
                .iter()
                .map(|planned| fetcher.extract_feature_id(row, &planned.plan, planned.ft))
                .collect::<Result<Vec<_>, _>>()?;
            if !seen.insert(fids.clone()) {
                continue;
            }
            if skipped < skip {
                skipped += 1;
                continue;
            }
            let mut tuple: Vec<FeatureHandle> = Vec::with_capacity(fids.len());
            for (planned, fid) in initial.types.iter().zip(&fids) {
                let fresh = fetcher.context().handle(fid).is_none();
                let handle = fetcher.extract_feature(row, &planned.plan, planned.ft, &planned.requested)?;
                accommodate_envelope(fetcher.context_mut(), planned, handle, fresh, envelope_name);
                tuple.push(handle);
            }
            tuples.push(tuple);
        }

        let arena = fetcher.finish().into_arena();
        Ok(TupleCollection::new(arena, tuples))
    }
}

/// WHERE clause of the filter plus the type tag of types sharing their table
fn append_where(query: &mut StatementBuffer, compiled: &CompiledFilter, types: &[&FeatureType]) {
    query.push_buffer(&compiled.where_clause);
    let mut has_where = !compiled.where_clause.is_empty();
    for (i, ft) in types.iter().enumerate() {
        if !ft.several_implementations {
            continue;
        }
        query.push_sql(if has_where { " AND " } else { " WHERE " });
        has_where = true;
        query
            .push_qualified(&compiled.root_aliases[i], FT_COLUMN)
            .push_sql("=")
            .push_argument(SqlValue::Text(ft.name.clone()), SqlType::Varchar);
    }
}

/// Put the envelope in front of a root feature's properties and drop the
/// geometry again if it was only fetched for the envelope
fn accommodate_envelope(
    ctx: &mut AssemblyContext,
    planned: &PlannedType<'_>,
    handle: FeatureHandle,
    fresh: bool,
    envelope_name: &str,
) {
    let Some(geometry_name) = planned.ft.envelope_property.as_deref() else {
        return;
    };
    let Some(feature) = ctx.feature_mut(handle) else {
        return;
    };
    if feature.property(envelope_name).is_none() {
        if let Some(envelope) = feature.geometry_envelope(geometry_name) {
            feature
                .properties
                .insert(0, FeatureProperty::new(envelope_name, PropertyValue::Envelope(envelope)));
        }
    }
    if fresh && planned.implicit_envelope {
        feature.properties.retain(|p| p.name != geometry_name);
    }
}
