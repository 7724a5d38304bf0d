//! Data models for the resolution engine

pub mod candidate;
pub mod match_result;
pub mod reference;
pub mod resolution;

pub use candidate::{Candidate, CatalogIssue};
pub use match_result::{ConfidenceTier, MatchResult, ScoredCandidate};
pub use reference::Reference;
pub use resolution::{BatchSummary, Resolution, ResolvedReference};
