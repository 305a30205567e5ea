//! Backend seams: statement execution and backend-specific conversions.
//!
//! [`Connection`] executes one parameterized statement at a time and returns
//! its fully consumed result set, so a request can never have two open cursors
//! on the same connection. [`Datastore`] supplies the hooks that differ per
//! backend: scalar conversion, geometry encoding and decoding, coordinate
//! transform calls and spatial predicates.

pub mod errors;
pub mod geometry;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod value;

pub use errors::{BackendError, DatastoreError, ErrorKind};
pub use geometry::{Envelope, Geometry};
pub use value::{BindArgument, SqlType, SqlValue};

use crate::feature_catalog::{ConstantContent, FunctionCall, FunctionParam, MappingField};
use crate::sql_builder::{SchemaText, StatementBuffer};

/// One result row; index 0 is the first selected column
pub type Row = Vec<SqlValue>;

/// A request-scoped connection to the relational backend
#[cfg_attr(test, mockall::automock)]
pub trait Connection {
    /// Execute `sql` with `arguments` bound to its placeholders in order.
    ///
    /// Implementations release the statement before returning, on success
    /// and on failure alike.
    fn query(&mut self, sql: &str, arguments: &[BindArgument]) -> Result<Vec<Row>, BackendError>;
}

impl<C: Connection + ?Sized> Connection for &mut C {
    fn query(&mut self, sql: &str, arguments: &[BindArgument]) -> Result<Vec<Row>, BackendError> {
        (**self).query(sql, arguments)
    }
}

/// Backend-specific behaviour consumed by the request handlers
pub trait Datastore {
    /// Short backend name used in error messages
    fn name(&self) -> &str;

    /// Convert a raw column value to the property's declared type
    fn convert_from_db_type(&self, value: SqlValue, _sql_type: SqlType) -> SqlValue {
        value
    }

    /// Decode a raw geometry column value; NULL yields `None`
    fn decode_geometry(&self, value: &SqlValue, srs: &str) -> Result<Option<Geometry>, DatastoreError>;

    /// Encode a geometry into the backend's native representation for binding
    fn encode_geometry(&self, geometry: &Geometry) -> Result<SqlValue, DatastoreError>;

    /// Backend code of a named coordinate system, if the backend knows it
    fn srs_code(&self, srs: &str) -> Option<i32> {
        srs.rsplit(':').next().and_then(|code| code.parse().ok())
    }

    /// Function call template transforming a geometry (`$1`) into SRS code `$2`
    fn transform_template(&self) -> Option<&str> {
        None
    }

    /// Build the call that transforms `field` into the coordinate system `target_code`
    fn build_srs_transform_call(
        &self,
        field: &MappingField,
        target_code: i32,
    ) -> Result<FunctionCall, DatastoreError> {
        let template = self.transform_template().ok_or_else(|| {
            DatastoreError::unsupported_with_context("coordinate transformation", self.name())
        })?;
        let params = vec![
            FunctionParam::Field(field.clone()),
            FunctionParam::Constant(ConstantContent {
                value: SchemaText::new(target_code.to_string()),
            }),
        ];
        Ok(FunctionCall::new(template, params, SqlType::Geometry)?)
    }

    /// Append the expression that selects a geometry column
    fn append_geometry_column(&self, query: &mut StatementBuffer, table_alias: &str, column: &str) {
        query.push_qualified(table_alias, column);
    }

    /// Append a predicate that holds when the geometry column intersects `envelope`
    fn append_bbox_predicate(
        &self,
        _query: &mut StatementBuffer,
        _table_alias: &str,
        _column: &str,
        _envelope: &Envelope,
    ) -> Result<(), DatastoreError> {
        Err(DatastoreError::unsupported_with_context(
            "bounding box predicates",
            self.name(),
        ))
    }
}
