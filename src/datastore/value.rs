//! Raw values exchanged with the relational backend.
//!
//! `SqlValue` is used both for bind arguments and for the columns of result
//! rows. Feature ids are built from these values, so `SqlValue` carries a total
//! order and a hash (floats compare by `total_cmp`).

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Declared target type of a column or bind argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlType {
    Integer,
    BigInt,
    Double,
    Varchar,
    Boolean,
    Date,
    Timestamp,
    Geometry,
    /// No declared type; the value is bound as read
    #[default]
    Other,
}

impl SqlType {
    pub fn is_numeric(self) -> bool {
        matches!(self, SqlType::Integer | SqlType::BigInt | SqlType::Double)
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SqlType::Integer => "INTEGER",
            SqlType::BigInt => "BIGINT",
            SqlType::Double => "DOUBLE",
            SqlType::Varchar => "VARCHAR",
            SqlType::Boolean => "BOOLEAN",
            SqlType::Date => "DATE",
            SqlType::Timestamp => "TIMESTAMP",
            SqlType::Geometry => "GEOMETRY",
            SqlType::Other => "OTHER",
        };
        f.write_str(name)
    }
}

/// A single value read from or bound to a statement
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(i) => Some(*i),
            SqlValue::Boolean(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Parse the textual form of a key component according to its declared type.
    ///
    /// Numeric types fall back to text when the input does not parse, so ids
    /// written by hand (e.g. in a `FeatureIds` filter) still round-trip.
    pub fn parse_typed(raw: &str, sql_type: SqlType) -> SqlValue {
        match sql_type {
            SqlType::Integer | SqlType::BigInt => raw
                .parse::<i64>()
                .map(SqlValue::Integer)
                .unwrap_or_else(|_| SqlValue::Text(raw.to_string())),
            SqlType::Double => raw
                .parse::<f64>()
                .map(SqlValue::Double)
                .unwrap_or_else(|_| SqlValue::Text(raw.to_string())),
            SqlType::Boolean => match raw {
                "true" | "1" => SqlValue::Boolean(true),
                "false" | "0" => SqlValue::Boolean(false),
                _ => SqlValue::Text(raw.to_string()),
            },
            SqlType::Other => raw
                .parse::<i64>()
                .map(SqlValue::Integer)
                .unwrap_or_else(|_| SqlValue::Text(raw.to_string())),
            _ => SqlValue::Text(raw.to_string()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            SqlValue::Null => 0,
            SqlValue::Boolean(_) => 1,
            SqlValue::Integer(_) => 2,
            SqlValue::Double(_) => 3,
            SqlValue::Text(_) => 4,
            SqlValue::Blob(_) => 5,
        }
    }
}

impl PartialEq for SqlValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SqlValue {}

impl PartialOrd for SqlValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SqlValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SqlValue::Null, SqlValue::Null) => Ordering::Equal,
            (SqlValue::Boolean(a), SqlValue::Boolean(b)) => a.cmp(b),
            (SqlValue::Integer(a), SqlValue::Integer(b)) => a.cmp(b),
            (SqlValue::Double(a), SqlValue::Double(b)) => a.total_cmp(b),
            (SqlValue::Text(a), SqlValue::Text(b)) => a.cmp(b),
            (SqlValue::Blob(a), SqlValue::Blob(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for SqlValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            SqlValue::Null => {}
            SqlValue::Boolean(b) => b.hash(state),
            SqlValue::Integer(i) => i.hash(state),
            SqlValue::Double(d) => d.to_bits().hash(state),
            SqlValue::Text(s) => s.hash(state),
            SqlValue::Blob(b) => b.hash(state),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("NULL"),
            SqlValue::Boolean(b) => write!(f, "{}", b),
            SqlValue::Integer(i) => write!(f, "{}", i),
            SqlValue::Double(d) => write!(f, "{}", d),
            SqlValue::Text(s) => f.write_str(s),
            SqlValue::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Double(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Boolean(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

/// A positional bind argument together with its declared target type
#[derive(Debug, Clone, PartialEq)]
pub struct BindArgument {
    pub value: SqlValue,
    pub sql_type: SqlType,
}

impl BindArgument {
    pub fn new(value: SqlValue, sql_type: SqlType) -> Self {
        Self { value, sql_type }
    }
}
