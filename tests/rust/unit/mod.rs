//! Unit tests - catalog and configuration loading
//!
//! These tests exercise the public loading API from files on disk
//! without a database.

mod catalog_tests;
mod config_tests;
