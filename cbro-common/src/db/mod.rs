//! Database pool initialization and cache schema

pub mod init;

pub use init::*;
