//! # CBRO Common Library
//!
//! Shared code for the reading-order resolution tools:
//! - Configuration model and loading
//! - SQLite pool initialization and cache schema
//! - Resolution progress events (EventBus)
//! - Timestamp helpers

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
