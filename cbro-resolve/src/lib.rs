//! cbro-resolve library interface
//!
//! Resolves reading-order references (series name + issue number) against
//! the ComicVine catalog. Exposed as a library for the binary and for
//! integration tests.

pub mod db;
pub mod error;
pub mod models;
pub mod progress;
pub mod services;
pub mod utils;

pub use crate::error::{FailureKind, ResolveError, ResolveResult};
pub use crate::services::orchestrator::{EngineOptions, ResolutionEngine};
