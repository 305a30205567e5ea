//! Parameterized SQL statement accumulation.
//!
//! A [`StatementBuffer`] holds SQL text plus the ordered list of bind
//! arguments for its `?` placeholders. The text can only grow through
//! static keywords, identifiers, mapping-document text ([`SchemaText`]) or
//! other buffers; values always go through [`StatementBuffer::push_argument`].
//! There is no method that accepts an arbitrary runtime string as SQL.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::common::{qualified_column, quote_identifier};
use crate::datastore::{BindArgument, SqlType, SqlValue};

pub const PLACEHOLDER: &str = "?";

/// SQL text that originates from the mapping document (function call
/// templates, constants), never from a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaText(String);

impl SchemaText {
    pub(crate) fn new(text: impl Into<String>) -> Self {
        SchemaText(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SchemaText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatementBuffer {
    text: String,
    arguments: Vec<BindArgument>,
}

impl StatementBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fixed SQL fragment (keyword, operator, punctuation)
    pub fn push_sql(&mut self, sql: &'static str) -> &mut Self {
        debug_assert!(!sql.contains('?'), "placeholders must be added via push_argument");
        self.text.push_str(sql);
        self
    }

    /// Append a table, column or alias name
    pub fn push_identifier(&mut self, identifier: &str) -> &mut Self {
        self.text.push_str(&quote_identifier(identifier));
        self
    }

    /// Append `alias.column`
    pub fn push_qualified(&mut self, table_alias: &str, column: &str) -> &mut Self {
        self.text.push_str(&qualified_column(table_alias, column));
        self
    }

    /// Append mapping-document text verbatim
    pub fn push_schema_text(&mut self, text: &SchemaText) -> &mut Self {
        self.text.push_str(text.as_str());
        self
    }

    /// Append a placeholder and record its bind argument at the same position
    pub fn push_argument(&mut self, value: SqlValue, sql_type: SqlType) -> &mut Self {
        self.text.push_str(PLACEHOLDER);
        self.arguments.push(BindArgument::new(value, sql_type));
        self
    }

    /// Append another buffer, keeping its arguments in order after ours
    pub fn push_buffer(&mut self, other: &StatementBuffer) -> &mut Self {
        self.text.push_str(&other.text);
        self.arguments.extend(other.arguments.iter().cloned());
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn arguments(&self) -> &[BindArgument] {
        &self.arguments
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

impl fmt::Display for StatementBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
