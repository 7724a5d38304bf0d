//! Database and engine fixtures

use cbro_common::config::MatcherSettings;
use cbro_resolve::db::CacheStore;
use cbro_resolve::services::{CatalogApi, Matcher, YearRange};
use cbro_resolve::{EngineOptions, ResolutionEngine};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const TEST_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Fresh on-disk cache
///
/// Returns (TempDir, CacheStore) - TempDir must be kept alive for duration of test
pub async fn create_test_cache() -> (TempDir, CacheStore) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("comicvine_cache.db");
    let pool = cbro_common::db::init_database(&db_path).await.unwrap();
    (temp_dir, CacheStore::new(pool, TEST_TTL))
}

/// Matcher with default weights and a fixed year range
pub fn test_matcher() -> Matcher {
    Matcher::new(MatcherSettings::default(), YearRange::new(1900, 2100))
}

/// Engine over `catalog` with a fresh cache
pub async fn create_test_engine(
    catalog: Arc<dyn CatalogApi>,
    options: EngineOptions,
) -> (TempDir, ResolutionEngine) {
    let (temp_dir, cache) = create_test_cache().await;
    let engine = ResolutionEngine::new(catalog, cache, test_matcher(), options);
    (temp_dir, engine)
}
