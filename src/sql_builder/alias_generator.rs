//! Table alias generation for a single statement.
//!
//! Aliases are a fixed prefix plus a counter. The counter is reset at the
//! start of every statement, so aliases stay short; they are only unique
//! within one statement.

pub const DEFAULT_ALIAS_PREFIX: &str = "X";

#[derive(Debug, Clone)]
pub struct TableAliasGenerator {
    prefix: String,
    next_id: usize,
}

impl TableAliasGenerator {
    pub fn new() -> Self {
        Self::with_prefix(DEFAULT_ALIAS_PREFIX)
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next_id: 1,
        }
    }

    pub fn generate_unique_alias(&mut self) -> String {
        let alias = format!("{}{}", self.prefix, self.next_id);
        self.next_id += 1;
        alias
    }

    pub fn generate_unique_aliases(&mut self, count: usize) -> Vec<String> {
        (0..count).map(|_| self.generate_unique_alias()).collect()
    }

    pub fn reset(&mut self) {
        self.next_id = 1;
    }
}

impl Default for TableAliasGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases_are_sequential() {
        let mut gen = TableAliasGenerator::new();
        assert_eq!(gen.generate_unique_alias(), "X1");
        assert_eq!(gen.generate_unique_aliases(3), vec!["X2", "X3", "X4"]);
    }

    #[test]
    fn test_reset_restarts_counter() {
        let mut gen = TableAliasGenerator::with_prefix("T");
        gen.generate_unique_aliases(5);
        gen.reset();
        assert_eq!(gen.generate_unique_alias(), "T1");
    }

    #[test]
    fn test_zero_aliases() {
        let mut gen = TableAliasGenerator::new();
        assert!(gen.generate_unique_aliases(0).is_empty());
        assert_eq!(gen.generate_unique_alias(), "X1");
    }
}
