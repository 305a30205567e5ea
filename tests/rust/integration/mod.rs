//! Integration tests - the engine against an in-memory SQLite database
//!
//! These tests run every request type end to end through the bundled
//! SQLite backend, so no external database is needed.

mod fixtures;
mod lock_tests;
mod query_tests;
