//! Entry point tying catalog, backend hooks, filter compiler and lock
//! closure together.
//!
//! A [`FeatureStore`] is immutable and can be shared between requests. Each
//! request borrows its own [`Connection`] for its whole duration.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::EngineConfig;
use crate::datastore::{BackendError, BindArgument, Connection, Datastore, DatastoreError, Row};
use crate::feature::{FeatureCollection, QueryResult};
use crate::feature_catalog::{CatalogError, FeatureCatalog, FeatureId};
use crate::filter::{Filter, FilterCompiler, RootTableWhereBuilder};
use crate::request_handler::fetch_planner::GeometryTransforms;
use crate::request_handler::feature_fetcher::FeatureFetcher;
use crate::request_handler::lock_handler::{LockHandler, LockRequest, LockTable, ReachabilityClosure, SubfeatureClosure};
use crate::request_handler::property_paths::PropertyPath;
use crate::request_handler::query_handler::{Query, QueryExplanation, QueryHandler};
use crate::request_handler::virtual_content::VirtualContentProvider;
use crate::request_handler::RequestHandler;

pub struct FeatureStore {
    catalog: FeatureCatalog,
    datastore: Box<dyn Datastore>,
    filter_compiler: Box<dyn FilterCompiler>,
    closure: Box<dyn ReachabilityClosure>,
    config: EngineConfig,
}

impl FeatureStore {
    pub fn new(catalog: FeatureCatalog, datastore: impl Datastore + 'static, config: EngineConfig) -> Self {
        Self {
            catalog,
            datastore: Box::new(datastore),
            filter_compiler: Box::new(RootTableWhereBuilder),
            closure: Box::new(SubfeatureClosure),
            config,
        }
    }

    pub fn with_filter_compiler(mut self, compiler: impl FilterCompiler + 'static) -> Self {
        self.filter_compiler = Box::new(compiler);
        self
    }

    pub fn with_reachability_closure(mut self, closure: impl ReachabilityClosure + 'static) -> Self {
        self.closure = Box::new(closure);
        self
    }

    pub fn catalog(&self) -> &FeatureCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn handler<'s>(&'s self, conn: &'s mut dyn Connection) -> RequestHandler<'s> {
        RequestHandler::new(
            &self.catalog,
            &*self.datastore,
            &*self.filter_compiler,
            &self.config,
            conn,
        )
    }

    /// Features, feature tuples or a count, depending on the query
    pub fn query(&self, conn: &mut dyn Connection, query: &Query) -> Result<QueryResult, DatastoreError> {
        let mut handler = self.handler(conn);
        QueryHandler::new(&mut handler, query).perform()
    }

    /// The initial statement and fetch plans of `query`, without touching the database
    pub fn explain(&self, query: &Query) -> Result<QueryExplanation, DatastoreError> {
        let mut conn = ExplainOnly;
        let mut handler = self.handler(&mut conn);
        QueryHandler::new(&mut handler, query).explain()
    }

    /// Every feature that has to be locked to lock the features matched by `requests`
    pub fn lock(
        &self,
        conn: &mut dyn Connection,
        requests: &[LockRequest],
    ) -> Result<BTreeSet<FeatureId>, DatastoreError> {
        let mut handler = self.handler(conn);
        LockHandler::new(&mut handler, &*self.closure).resolve(requests)
    }

    pub fn subfeatures_of(
        &self,
        conn: &mut dyn Connection,
        fid: &FeatureId,
    ) -> Result<BTreeMap<String, Vec<FeatureId>>, DatastoreError> {
        self.handler(conn).determine_sub_features(fid)
    }

    pub fn superfeatures_of(
        &self,
        conn: &mut dyn Connection,
        fid: &FeatureId,
    ) -> Result<BTreeSet<FeatureId>, DatastoreError> {
        self.handler(conn).determine_super_features(fid)
    }

    /// Read one feature by id, restricted to `paths` if any are given
    pub fn fetch_feature(
        &self,
        conn: &mut dyn Connection,
        fid: &FeatureId,
        paths: &[PropertyPath],
    ) -> Result<FeatureCollection, DatastoreError> {
        let mut handler = self.handler(conn);
        let content = VirtualContentProvider::new(None, &*self.datastore, &self.config);
        let mut fetcher = FeatureFetcher::new(&mut handler, content, GeometryTransforms::default());
        let handle = fetcher.fetch_feature(fid, paths)?;
        Ok(FeatureCollection::new(fetcher.finish().into_arena(), vec![handle]))
    }

    /// Ids matched by `filter`, failing if one is held by a lock other than `lock_id`
    pub fn determine_affected_and_modifiable_fids(
        &self,
        conn: &mut dyn Connection,
        type_name: &str,
        filter: Option<&Filter>,
        lock_id: Option<&str>,
        locks: &LockTable,
    ) -> Result<Vec<FeatureId>, DatastoreError> {
        let ft = self.catalog.get(type_name).ok_or_else(|| {
            DatastoreError::InvalidRequest(format!("Unknown feature type '{}'", type_name))
        })?;
        self.handler(conn)
            .determine_affected_and_modifiable_fids(ft, filter, lock_id, locks)
    }

    /// Parse the `Type:value` form of a feature id against the catalog
    pub fn parse_feature_id(&self, id: &str) -> Result<FeatureId, DatastoreError> {
        FeatureId::parse(&self.catalog, id).map_err(|err| match err {
            CatalogError::UnknownFeatureType { .. } => DatastoreError::InvalidRequest(err.to_string()),
            other => DatastoreError::from(other),
        })
    }
}

/// Connection used while explaining; statements are never executed
struct ExplainOnly;

impl Connection for ExplainOnly {
    fn query(&mut self, sql: &str, _arguments: &[BindArgument]) -> Result<Vec<Row>, BackendError> {
        Err(BackendError::new(format!(
            "statement issued while explaining a query: {}",
            sql
        )))
    }
}
