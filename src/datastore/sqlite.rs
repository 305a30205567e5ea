//! SQLite reference backend.
//!
//! Geometries are stored as WKT text. SQLite has no spatial functions, so the
//! connection registers `fs_bbox_intersects(wkt, minx, miny, maxx, maxy)`
//! which the bbox predicate relies on. Coordinate transforms are only
//! available when a transform function template is configured and the
//! function itself has been registered on the connection.

use std::path::Path;

use rusqlite::functions::FunctionFlags;
use rusqlite::types::{Value, ValueRef};

use super::errors::{BackendError, DatastoreError};
use super::geometry::{Envelope, Geometry};
use super::value::{BindArgument, SqlType, SqlValue};
use super::{Connection, Datastore, Row};
use crate::sql_builder::StatementBuffer;

pub const BBOX_FUNCTION: &str = "fs_bbox_intersects";
const BBOX_FUNCTION_CALL: &str = "fs_bbox_intersects(";

pub struct SqliteConnection {
    conn: rusqlite::Connection,
}

impl SqliteConnection {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, BackendError> {
        Self::from_raw(rusqlite::Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, BackendError> {
        Self::from_raw(rusqlite::Connection::open_in_memory()?)
    }

    pub fn from_raw(conn: rusqlite::Connection) -> Result<Self, BackendError> {
        register_bbox_function(&conn)?;
        Ok(Self { conn })
    }

    /// Underlying connection, e.g. to register further SQL functions
    pub fn raw(&self) -> &rusqlite::Connection {
        &self.conn
    }

    /// Run a batch of statements without results (schema setup, fixtures)
    pub fn execute_batch(&self, sql: &str) -> Result<(), BackendError> {
        Ok(self.conn.execute_batch(sql)?)
    }

    fn collect_rows(
        stmt: &mut rusqlite::Statement<'_>,
        arguments: &[BindArgument],
    ) -> Result<Vec<Row>, BackendError> {
        let column_count = stmt.column_count();
        let params = rusqlite::params_from_iter(arguments.iter().map(|a| to_sqlite(&a.value)));
        let mut rows = stmt.query(params)?;
        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                values.push(from_sqlite(row.get_ref(i)?));
            }
            result.push(values);
        }
        Ok(result)
    }
}

impl Connection for SqliteConnection {
    fn query(&mut self, sql: &str, arguments: &[BindArgument]) -> Result<Vec<Row>, BackendError> {
        let mut stmt = self.conn.prepare(sql)?;
        let result = Self::collect_rows(&mut stmt, arguments);
        if let Err(e) = stmt.finalize() {
            log::error!("Failed to finalize statement `{}`: {}", sql, e);
        }
        result
    }
}

fn to_sqlite(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Boolean(b) => Value::Integer(i64::from(*b)),
        SqlValue::Integer(i) => Value::Integer(*i),
        SqlValue::Double(d) => Value::Real(*d),
        SqlValue::Text(s) => Value::Text(s.clone()),
        SqlValue::Blob(b) => Value::Blob(b.clone()),
    }
}

fn from_sqlite(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => SqlValue::Integer(i),
        ValueRef::Real(d) => SqlValue::Double(d),
        ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
    }
}

fn register_bbox_function(conn: &rusqlite::Connection) -> Result<(), BackendError> {
    conn.create_scalar_function(
        BBOX_FUNCTION,
        5,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let wkt: Option<String> = ctx.get(0)?;
            let Some(wkt) = wkt else {
                return Ok(false);
            };
            let (min_x, min_y, max_x, max_y): (f64, f64, f64, f64) =
                (ctx.get(1)?, ctx.get(2)?, ctx.get(3)?, ctx.get(4)?);
            let Ok(geometry) = Geometry::from_wkt("", wkt) else {
                return Ok(false);
            };
            Ok(geometry.envelope().is_some_and(|env| {
                env.min_x <= max_x && env.max_x >= min_x && env.min_y <= max_y && env.max_y >= min_y
            }))
        },
    )?;
    Ok(())
}

/// Type conversion and geometry hooks for SQLite
#[derive(Debug, Clone, Default)]
pub struct SqliteDatastore {
    transform_template: Option<String>,
}

impl SqliteDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable coordinate transforms through `template` (`$1` geometry, `$2` SRS code)
    pub fn with_transform_function(mut self, template: impl Into<String>) -> Self {
        self.transform_template = Some(template.into());
        self
    }
}

impl Datastore for SqliteDatastore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn convert_from_db_type(&self, value: SqlValue, sql_type: SqlType) -> SqlValue {
        match (sql_type, value) {
            (SqlType::Boolean, SqlValue::Integer(i)) => SqlValue::Boolean(i != 0),
            (SqlType::Double, SqlValue::Integer(i)) => SqlValue::Double(i as f64),
            (SqlType::Varchar, SqlValue::Integer(i)) => SqlValue::Text(i.to_string()),
            (SqlType::Varchar, SqlValue::Double(d)) => SqlValue::Text(d.to_string()),
            (_, value) => value,
        }
    }

    fn decode_geometry(&self, value: &SqlValue, srs: &str) -> Result<Option<Geometry>, DatastoreError> {
        match value {
            SqlValue::Null => Ok(None),
            SqlValue::Text(wkt) => Geometry::from_wkt(srs, wkt.clone()).map(Some),
            SqlValue::Blob(bytes) => {
                let wkt = String::from_utf8(bytes.clone()).map_err(|e| {
                    DatastoreError::InconsistentMapping(format!("Geometry blob is not WKT text: {}", e))
                })?;
                Geometry::from_wkt(srs, wkt).map(Some)
            }
            other => Err(DatastoreError::InconsistentMapping(format!(
                "Cannot decode geometry from value {}",
                other
            ))),
        }
    }

    fn encode_geometry(&self, geometry: &Geometry) -> Result<SqlValue, DatastoreError> {
        Ok(SqlValue::Text(geometry.wkt.clone()))
    }

    fn transform_template(&self) -> Option<&str> {
        self.transform_template.as_deref()
    }

    fn append_bbox_predicate(
        &self,
        query: &mut StatementBuffer,
        table_alias: &str,
        column: &str,
        envelope: &Envelope,
    ) -> Result<(), DatastoreError> {
        query
            .push_sql(BBOX_FUNCTION_CALL)
            .push_qualified(table_alias, column);
        for ordinate in [envelope.min_x, envelope.min_y, envelope.max_x, envelope.max_y] {
            query
                .push_sql(",")
                .push_argument(SqlValue::Double(ordinate), SqlType::Double);
        }
        query.push_sql(")");
        Ok(())
    }
}
