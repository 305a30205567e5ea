//! Request handling: statement execution, feature id extraction and
//! feature id navigation shared by queries and lock computation.
//!
//! A [`RequestHandler`] owns everything that is scoped to one request: the
//! connection and the alias generator. Catalog, datastore hooks, filter
//! compiler and configuration are shared read-only with other requests.

pub mod context;
pub mod feature_fetcher;
pub mod fetch_planner;
pub mod lock_handler;
pub mod property_paths;
pub mod query_handler;
pub mod virtual_content;

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::config::EngineConfig;
use crate::datastore::{Connection, Datastore, DatastoreError, Row, SqlType, SqlValue};
use crate::feature_catalog::{
    FeatureCatalog, FeatureId, FeatureType, PropertyType, RelationPath, TableRelation, FT_COLUMN,
    FT_PREFIX,
};
use crate::filter::{Filter, FilterCompiler, FilterScope};
use crate::sql_builder::{StatementBuffer, TableAliasGenerator};

use lock_handler::LockTable;
use virtual_content::VirtualContentProvider;

/// How feature ids are read from the leading columns of a row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FidExtraction {
    /// For types sharing their table, column 1 holds the concrete type name
    /// and the id columns follow; otherwise the id columns come first.
    Disambiguated,
    /// The id columns come first and always belong to the given type.
    /// Used when the statement selects no type column, as in superfeature
    /// lookups or once a type tag has already been resolved.
    ForceUnique,
}

pub struct RequestHandler<'a> {
    catalog: &'a FeatureCatalog,
    datastore: &'a dyn Datastore,
    filter_compiler: &'a dyn FilterCompiler,
    config: &'a EngineConfig,
    conn: &'a mut dyn Connection,
    aliases: TableAliasGenerator,
}

impl<'a> RequestHandler<'a> {
    pub fn new(
        catalog: &'a FeatureCatalog,
        datastore: &'a dyn Datastore,
        filter_compiler: &'a dyn FilterCompiler,
        config: &'a EngineConfig,
        conn: &'a mut dyn Connection,
    ) -> Self {
        Self {
            catalog,
            datastore,
            filter_compiler,
            config,
            conn,
            aliases: TableAliasGenerator::with_prefix(config.alias_prefix.clone()),
        }
    }

    pub fn catalog(&self) -> &'a FeatureCatalog {
        self.catalog
    }

    pub fn datastore(&self) -> &'a dyn Datastore {
        self.datastore
    }

    pub fn config(&self) -> &'a EngineConfig {
        self.config
    }

    pub(crate) fn filter_compiler(&self) -> &'a dyn FilterCompiler {
        self.filter_compiler
    }

    /// Alias generator, reset for a new statement
    pub(crate) fn fresh_aliases(&mut self) -> &mut TableAliasGenerator {
        self.aliases.reset();
        &mut self.aliases
    }

    /// Execute `query` and return its complete result set
    pub fn execute(&mut self, query: &StatementBuffer) -> Result<Vec<Row>, DatastoreError> {
        log::debug!(
            "Executing: {} ({} arguments)",
            query.text(),
            query.arguments().len()
        );
        self.conn
            .query(query.text(), query.arguments())
            .map_err(|source| DatastoreError::Backend {
                sql: query.text().to_string(),
                source,
            })
    }

    /// Read the feature id at the start of `row`
    pub fn extract_feature_id(
        &self,
        row: &[SqlValue],
        ft: &'a FeatureType,
        strategy: FidExtraction,
    ) -> Result<FeatureId, DatastoreError> {
        let (concrete, values) = match strategy {
            FidExtraction::Disambiguated if ft.several_implementations => {
                let tag = row.first().unwrap_or(&SqlValue::Null);
                let concrete = self.resolve_type_tag(tag, &ft.table, FT_COLUMN, |candidate| {
                    candidate.table == ft.table
                })?;
                (concrete, row.get(1..))
            }
            _ => (ft, Some(row)),
        };
        let width = concrete.id_fields().len();
        let values = values.and_then(|v| v.get(..width)).ok_or_else(|| {
            DatastoreError::InconsistentMapping(format!(
                "Row has too few columns for the identifier of '{}'",
                concrete.name
            ))
        })?;
        Ok(FeatureId::new(concrete, values.to_vec())?)
    }

    /// Distinct feature ids of `rows`, in row order
    pub fn extract_feature_ids(
        &self,
        rows: &[Row],
        ft: &'a FeatureType,
        strategy: FidExtraction,
    ) -> Result<Vec<FeatureId>, DatastoreError> {
        let mut seen = HashSet::new();
        let mut fids = Vec::new();
        for row in rows {
            let fid = self.extract_feature_id(row, ft, strategy)?;
            if seen.insert(fid.clone()) {
                fids.push(fid);
            }
        }
        Ok(fids)
    }

    /// Concrete feature type named by a type tag column value
    pub(crate) fn resolve_type_tag(
        &self,
        tag: &SqlValue,
        table: &str,
        column: &str,
        accepts: impl Fn(&FeatureType) -> bool,
    ) -> Result<&'a FeatureType, DatastoreError> {
        let name = tag.as_str().ok_or_else(|| {
            DatastoreError::InconsistentMapping(format!(
                "Type tag column {}.{} holds {} instead of a feature type name",
                table, column, tag
            ))
        })?;
        match self.catalog.get(name) {
            Some(ft) if !ft.is_abstract && accepts(ft) => Ok(ft),
            _ => Err(DatastoreError::InconsistentMapping(format!(
                "Type tag '{}' in {}.{} does not name an acceptable concrete feature type",
                name, table, column
            ))),
        }
    }

    /// Ids of the features of `ft` matched by `filter`
    pub fn determine_affected_fids(
        &mut self,
        ft: &'a FeatureType,
        filter: Option<&Filter>,
    ) -> Result<Vec<FeatureId>, DatastoreError> {
        if ft.is_abstract {
            return Err(DatastoreError::InvalidRequest(format!(
                "Feature type '{}' is abstract",
                ft.name
            )));
        }
        let content = VirtualContentProvider::new(filter, self.datastore, self.config);
        let types = [ft];
        let scope = FilterScope {
            catalog: self.catalog,
            feature_types: &types,
            aliases: None,
            filter,
            sort: &[],
        };
        let compiler = self.filter_compiler;
        let compiled = compiler.compile(&scope, self.fresh_aliases(), &content)?;
        let alias = compiled.root_alias(0).unwrap_or_default().to_string();

        let mut query = StatementBuffer::new();
        query.push_sql("SELECT DISTINCT ");
        if ft.several_implementations {
            query.push_qualified(&alias, FT_COLUMN).push_sql(",");
        }
        append_feature_id_columns(&mut query, &alias, ft);
        query
            .push_sql(" FROM ")
            .push_buffer(&compiled.from_clause)
            .push_buffer(&compiled.where_clause);
        if ft.several_implementations {
            query
                .push_sql(if compiled.where_clause.is_empty() { " WHERE " } else { " AND " })
                .push_qualified(&alias, FT_COLUMN)
                .push_sql("=")
                .push_argument(SqlValue::Text(ft.name.clone()), SqlType::Varchar);
        }

        let rows = self.execute(&query)?;
        self.extract_feature_ids(&rows, ft, FidExtraction::Disambiguated)
    }

    /// Like [`determine_affected_fids`](Self::determine_affected_fids), failing
    /// if a feature is locked by a lock other than `lock_id`
    pub fn determine_affected_and_modifiable_fids(
        &mut self,
        ft: &'a FeatureType,
        filter: Option<&Filter>,
        lock_id: Option<&str>,
        locks: &LockTable,
    ) -> Result<Vec<FeatureId>, DatastoreError> {
        let fids = self.determine_affected_fids(ft, filter)?;
        for fid in &fids {
            if let Some(holder) = locks.lock_holder(fid) {
                if Some(holder) != lock_id {
                    return Err(DatastoreError::InvalidRequest(format!(
                        "Feature {} is locked by lock '{}'",
                        fid, holder
                    )));
                }
            }
        }
        Ok(fids)
    }

    /// Ids of the features directly contained in `fid`, per feature property
    pub fn determine_sub_features(
        &mut self,
        fid: &FeatureId,
    ) -> Result<BTreeMap<String, Vec<FeatureId>>, DatastoreError> {
        let ft = self.catalog.feature_type(fid.feature_type())?;
        let mut result = BTreeMap::new();
        for pt in ft.properties.iter().filter(|p| p.is_feature_property()) {
            let sub_fids = self.determine_sub_fids(ft, fid, pt)?;
            if !sub_fids.is_empty() {
                result.insert(pt.name.clone(), sub_fids);
            }
        }
        Ok(result)
    }

    fn determine_sub_fids(
        &mut self,
        ft: &'a FeatureType,
        fid: &FeatureId,
        pt: &'a PropertyType,
    ) -> Result<Vec<FeatureId>, DatastoreError> {
        let contained = pt.contained_type().unwrap_or_default();
        let concrete = self.catalog.concrete_substitutions(contained);
        let polymorphic = concrete.len() > 1;

        match (pt.relation_path(), polymorphic) {
            (RelationPath::Inline, false) => {
                let Some(sub_ft) = concrete.first().copied() else {
                    return Ok(Vec::new());
                };
                let alias = self.fresh_aliases().generate_unique_alias();
                let mut query = StatementBuffer::new();
                query.push_sql("SELECT ");
                append_feature_id_columns(&mut query, &alias, sub_ft);
                append_root_from(&mut query, &ft.table, &alias);
                append_feature_id_constraint(&mut query, &alias, ft, fid);
                let rows = self.execute(&query)?;
                // an inline subfeature with a NULL id is absent
                let rows: Vec<Row> = rows
                    .into_iter()
                    .filter(|r| !r.iter().any(SqlValue::is_null))
                    .collect();
                self.extract_feature_ids(&rows, sub_ft, FidExtraction::ForceUnique)
            }
            (RelationPath::Inline, true) => Err(DatastoreError::unsupported_with_context(
                format!(
                    "inline feature property '{}' with several concrete types of '{}'",
                    pt.name, contained
                ),
                self.datastore.name(),
            )),
            (RelationPath::Single(rel), true) => {
                let fk = rel.from_fields.first().ok_or_else(|| missing_key_columns(pt))?;
                let tag_column = format!("{}{}", FT_PREFIX, fk.column);
                let alias = self.fresh_aliases().generate_unique_alias();
                let mut query = StatementBuffer::new();
                query
                    .push_sql("SELECT ")
                    .push_qualified(&alias, &tag_column)
                    .push_sql(",")
                    .push_qualified(&alias, &fk.column);
                append_root_from(&mut query, &ft.table, &alias);
                append_feature_id_constraint(&mut query, &alias, ft, fid);

                let rows = self.execute(&query)?;
                let mut fids = Vec::new();
                for row in rows {
                    let (Some(tag), Some(key)) = (row.first(), row.get(1)) else {
                        continue;
                    };
                    if key.is_null() {
                        continue;
                    }
                    let sub_ft = self.resolve_type_tag(tag, &ft.table, &tag_column, |c| {
                        self.catalog.is_valid_substitution(contained, &c.name)
                    })?;
                    fids.push(FeatureId::new(sub_ft, vec![key.clone()])?);
                }
                Ok(fids)
            }
            (RelationPath::JoinTable(first, second), true) => {
                let aliases = self.fresh_aliases().generate_unique_aliases(2);
                let mut query = StatementBuffer::new();
                query.push_sql("SELECT ").push_qualified(&aliases[1], FT_COLUMN);
                for field in &second.from_fields {
                    query.push_sql(",").push_qualified(&aliases[1], &field.column);
                }
                append_root_from(&mut query, &ft.table, &aliases[0]);
                append_relation_joins(&mut query, std::slice::from_ref(first), &aliases, None);
                query.push_sql(" WHERE ");
                append_feature_id_conditions(&mut query, &aliases[0], ft, fid);

                let rows = self.execute(&query)?;
                let mut seen = HashSet::new();
                let mut fids = Vec::new();
                for row in rows {
                    let tag = row.first().unwrap_or(&SqlValue::Null);
                    let sub_ft = self.resolve_type_tag(tag, &first.to_table, FT_COLUMN, |c| {
                        self.catalog.is_valid_substitution(contained, &c.name)
                    })?;
                    let sub_fid = self.extract_feature_id(&row[1..], sub_ft, FidExtraction::ForceUnique)?;
                    if seen.insert(sub_fid.clone()) {
                        fids.push(sub_fid);
                    }
                }
                Ok(fids)
            }
            (RelationPath::Chain(_), true) => Err(DatastoreError::unsupported_with_context(
                format!(
                    "polymorphic feature property '{}' stored through more than two relations",
                    pt.name
                ),
                self.datastore.name(),
            )),
            (_, false) => {
                let Some(sub_ft) = concrete.first().copied() else {
                    return Ok(Vec::new());
                };
                let aliases = self
                    .fresh_aliases()
                    .generate_unique_aliases(pt.relations.len() + 1);
                let last = &aliases[pt.relations.len()];
                let mut query = StatementBuffer::new();
                query.push_sql("SELECT DISTINCT ");
                append_feature_id_columns(&mut query, last, sub_ft);
                append_root_from(&mut query, &ft.table, &aliases[0]);
                append_relation_joins(&mut query, &pt.relations, &aliases, Some(&sub_ft.table));
                query.push_sql(" WHERE ");
                append_feature_id_conditions(&mut query, &aliases[0], ft, fid);
                append_type_tag_condition(&mut query, last, sub_ft);
                let rows = self.execute(&query)?;
                self.extract_feature_ids(&rows, sub_ft, FidExtraction::ForceUnique)
            }
        }
    }

    /// Ids of the features that contain `fid` through one of their feature properties
    pub fn determine_super_features(&mut self, fid: &FeatureId) -> Result<BTreeSet<FeatureId>, DatastoreError> {
        let sub_ft = self.catalog.feature_type(fid.feature_type())?;
        let catalog = self.catalog;
        let mut result = BTreeSet::new();

        for super_ft in catalog.feature_types().filter(|ft| !ft.is_abstract) {
            for pt in &super_ft.properties {
                let Some(contained) = pt.contained_type() else {
                    continue;
                };
                if !catalog.is_valid_substitution(contained, &sub_ft.name) {
                    continue;
                }
                let polymorphic = catalog.concrete_substitutions(contained).len() > 1;
                let Some(query) = self.build_super_feature_select(super_ft, pt, sub_ft, fid, polymorphic)
                else {
                    continue;
                };
                let rows = self.execute(&query)?;
                result.extend(self.extract_feature_ids(&rows, super_ft, FidExtraction::ForceUnique)?);
            }
        }
        Ok(result)
    }

    fn build_super_feature_select(
        &mut self,
        super_ft: &FeatureType,
        pt: &PropertyType,
        sub_ft: &FeatureType,
        fid: &FeatureId,
        polymorphic: bool,
    ) -> Option<StatementBuffer> {
        let mut query = StatementBuffer::new();
        query.push_sql("SELECT DISTINCT ");

        if pt.relations.is_empty() {
            // inline content shares the super feature's row
            if sub_ft.table != super_ft.table {
                return None;
            }
            let alias = self.fresh_aliases().generate_unique_alias();
            append_feature_id_columns(&mut query, &alias, super_ft);
            append_root_from(&mut query, &super_ft.table, &alias);
            append_feature_id_constraint(&mut query, &alias, sub_ft, fid);
            append_type_tag_condition(&mut query, &alias, super_ft);
            return Some(query);
        }

        let aliases = self
            .fresh_aliases()
            .generate_unique_aliases(pt.relations.len() + 1);
        let last = &aliases[pt.relations.len()];
        append_feature_id_columns(&mut query, &aliases[0], super_ft);
        append_root_from(&mut query, &super_ft.table, &aliases[0]);
        append_relation_joins(&mut query, &pt.relations, &aliases, Some(&sub_ft.table));
        append_feature_id_constraint(&mut query, last, sub_ft, fid);
        append_type_tag_condition(&mut query, &aliases[0], super_ft);

        if polymorphic {
            // the tag tells which concrete table the key points into
            match pt.relation_path() {
                RelationPath::Single(rel) => {
                    let fk = rel.from_fields.first()?;
                    query
                        .push_sql(" AND ")
                        .push_qualified(&aliases[0], &format!("{}{}", FT_PREFIX, fk.column));
                }
                RelationPath::JoinTable(..) => {
                    query.push_sql(" AND ").push_qualified(&aliases[1], FT_COLUMN);
                }
                _ => return None,
            }
            query
                .push_sql("=")
                .push_argument(SqlValue::Text(sub_ft.name.clone()), SqlType::Varchar);
        }
        Some(query)
    }
}

fn missing_key_columns(pt: &PropertyType) -> DatastoreError {
    DatastoreError::InconsistentMapping(format!("Relation of property '{}' has no key columns", pt.name))
}

/// ` FROM table alias`
pub(crate) fn append_root_from(query: &mut StatementBuffer, table: &str, alias: &str) {
    query
        .push_sql(" FROM ")
        .push_identifier(table)
        .push_sql(" ")
        .push_identifier(alias);
}

/// `to.col=from.col` for every column pair of `relation`
pub(crate) fn append_join_condition(
    query: &mut StatementBuffer,
    from_alias: &str,
    to_alias: &str,
    relation: &TableRelation,
) {
    for (i, (from, to)) in relation.from_fields.iter().zip(&relation.to_fields).enumerate() {
        if i > 0 {
            query.push_sql(" AND ");
        }
        query
            .push_qualified(to_alias, &to.column)
            .push_sql("=")
            .push_qualified(from_alias, &from.column);
    }
}

/// ` JOIN table Xi ON ...` for each relation. `aliases[0]` names the table the
/// first relation starts at; the last table may be replaced by `last_table`.
pub(crate) fn append_relation_joins(
    query: &mut StatementBuffer,
    relations: &[TableRelation],
    aliases: &[String],
    last_table: Option<&str>,
) {
    for (i, relation) in relations.iter().enumerate() {
        let table = match last_table {
            Some(table) if i + 1 == relations.len() => table,
            _ => relation.to_table.as_str(),
        };
        query
            .push_sql(" JOIN ")
            .push_identifier(table)
            .push_sql(" ")
            .push_identifier(&aliases[i + 1])
            .push_sql(" ON ");
        append_join_condition(query, &aliases[i], &aliases[i + 1], relation);
    }
}

pub(crate) fn append_feature_id_columns(query: &mut StatementBuffer, alias: &str, ft: &FeatureType) {
    for (i, field) in ft.id_fields().iter().enumerate() {
        if i > 0 {
            query.push_sql(",");
        }
        query.push_qualified(alias, &field.column);
    }
}

/// `alias.id1=? AND alias.id2=?` bound to the values of `fid`
pub(crate) fn append_feature_id_conditions(
    query: &mut StatementBuffer,
    alias: &str,
    ft: &FeatureType,
    fid: &FeatureId,
) {
    for (i, (field, value)) in ft.id_fields().iter().zip(fid.values()).enumerate() {
        if i > 0 {
            query.push_sql(" AND ");
        }
        query
            .push_qualified(alias, &field.column)
            .push_sql("=")
            .push_argument(value.clone(), field.sql_type);
    }
}

/// ` AND alias.featuretype=?` when `ft` shares its table with other types
pub(crate) fn append_type_tag_condition(query: &mut StatementBuffer, alias: &str, ft: &FeatureType) {
    if ft.several_implementations {
        query
            .push_sql(" AND ")
            .push_qualified(alias, FT_COLUMN)
            .push_sql("=")
            .push_argument(SqlValue::Text(ft.name.clone()), SqlType::Varchar);
    }
}

/// ` WHERE ` followed by the id conditions
pub(crate) fn append_feature_id_constraint(
    query: &mut StatementBuffer,
    alias: &str,
    ft: &FeatureType,
    fid: &FeatureId,
) {
    query.push_sql(" WHERE ");
    append_feature_id_conditions(query, alias, ft, fid);
}
