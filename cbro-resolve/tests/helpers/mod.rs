//! Test Helper Utilities
//!
//! Shared fixtures for cbro-resolve integration tests

#![allow(dead_code)]

pub mod db_utils;
pub mod fake_catalog;

pub use db_utils::{create_test_cache, create_test_engine, test_matcher};
pub use fake_catalog::{candidate, issue, FakeCatalog};
