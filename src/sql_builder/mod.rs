//! Building blocks for generated SQL: table aliases, identifier quoting and
//! the parameterized statement buffer.

mod alias_generator;
mod common;
mod statement_buffer;

pub use alias_generator::{TableAliasGenerator, DEFAULT_ALIAS_PREFIX};
pub use common::{is_plain_identifier, qualified_column, quote_identifier};
pub use statement_buffer::{SchemaText, StatementBuffer, PLACEHOLDER};
