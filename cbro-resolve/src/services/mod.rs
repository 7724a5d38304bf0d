//! Resolution engine services
//!
//! Normalizer and Matcher are pure. Rate Limiter and Catalog Client own the
//! network side; the orchestrator ties them to the Cache Store.

pub mod catalog_client;
pub mod in_flight;
pub mod matcher;
pub mod normalizer;
pub mod orchestrator;
pub mod rate_limiter;

pub use catalog_client::{
    CatalogApi, CatalogError, ComicVineClient, IssuePage, SearchAll, SearchOutcome, SearchPage,
};
pub use in_flight::InFlight;
pub use matcher::Matcher;
pub use normalizer::{normalize, normalize_issue_number, NormalizedKey, YearRange};
pub use orchestrator::{EngineOptions, ResolutionEngine};
pub use rate_limiter::{Cancelled, RateLimiter};
