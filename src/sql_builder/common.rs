//! Identifier rendering shared by every statement builder

/// Quote an identifier (column name, table name) if it is not a plain SQL word.
///
/// Plain words (ASCII letters, digits, underscore, not starting with a digit)
/// are emitted as-is so generated SQL stays readable. Everything else is
/// wrapped in double quotes with embedded quotes doubled.
///
/// # Examples
/// ```
/// use featurestore::sql_builder::quote_identifier;
/// assert_eq!(quote_identifier("road_id"), "road_id");
/// assert_eq!(quote_identifier("road-id"), "\"road-id\"");
/// ```
pub fn quote_identifier(name: &str) -> String {
    if is_plain_identifier(name) {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// Format a qualified column reference: table_alias.column_name
///
/// # Examples
/// ```
/// use featurestore::sql_builder::qualified_column;
/// assert_eq!(qualified_column("X1", "geom"), "X1.geom");
/// ```
pub fn qualified_column(table_alias: &str, column_name: &str) -> String {
    format!("{}.{}", quote_identifier(table_alias), quote_identifier(column_name))
}

pub fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
