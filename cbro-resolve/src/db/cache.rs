//! Persistent lookup cache
//!
//! Rows live in the `lookup_cache` table created by
//! `cbro_common::db::init_database`. An entry is valid while
//! `now < expires_at`; an expired row reads as a miss and stays on disk until
//! a sweep removes it. Sweeps are a range delete over the `expires_at` index.
//! Writes are last-write-wins.

use crate::services::normalizer::NormalizedKey;
use crate::utils::retry_on_lock;
use cbro_common::time::{add_duration_millis, now_millis};
use cbro_common::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Longest a cache write keeps retrying through lock contention
const MAX_LOCK_WAIT: Duration = Duration::from_secs(5);

/// Query kind discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKind {
    /// MatchResult for a normalized series + issue + year
    Match,
    /// Accepted series for a normalized name + year, issue fields empty
    Series,
    /// Series detail by catalog id
    Volume,
    /// Issue list of a series by catalog id
    VolumeIssues,
}

impl CacheKind {
    pub const ALL: [CacheKind; 4] = [
        CacheKind::Match,
        CacheKind::Series,
        CacheKind::Volume,
        CacheKind::VolumeIssues,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKind::Match => "match",
            CacheKind::Series => "series",
            CacheKind::Volume => "volume",
            CacheKind::VolumeIssues => "volume_issues",
        }
    }
}

/// Cache key: kind plus kind-specific key text
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub kind: CacheKind,
    pub key: String,
}

impl CacheKey {
    pub fn new(kind: CacheKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
        }
    }

    /// Key of a reference's match: `name|issue|year`
    pub fn for_match(name: &NormalizedKey, issue_number: &str, year: Option<i32>) -> Self {
        let year = year.map_or_else(|| "-".to_string(), |y| y.to_string());
        Self::new(
            CacheKind::Match,
            format!("{}|{}|{}", name, issue_number.to_lowercase(), year),
        )
    }

    /// Key of a series mapping: `name|year`
    pub fn for_series(name: &NormalizedKey, year: Option<i32>) -> Self {
        let year = year.map_or_else(|| "-".to_string(), |y| y.to_string());
        Self::new(CacheKind::Series, format!("{}|{}", name, year))
    }

    pub fn for_volume(volume_id: u64) -> Self {
        Self::new(CacheKind::Volume, volume_id.to_string())
    }

    pub fn for_volume_issues(volume_id: u64) -> Self {
        Self::new(CacheKind::VolumeIssues, volume_id.to_string())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.key)
    }
}

/// One stored row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: CacheKey,
    /// JSON payload
    pub payload: String,
    /// Unix milliseconds
    pub fetched_at: i64,
    /// Unix milliseconds; `fetched_at + ttl`
    pub expires_at: i64,
}

impl CacheEntry {
    pub fn is_valid_at(&self, now_millis: i64) -> bool {
        now_millis < self.expires_at
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

/// Why a lookup missed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    Absent,
    Expired { expired_at: i64 },
}

/// Lookup outcome with the diagnostic miss reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    Hit(CacheEntry),
    Miss(MissReason),
}

impl CacheLookup {
    pub fn into_entry(self) -> Option<CacheEntry> {
        match self {
            CacheLookup::Hit(entry) => Some(entry),
            CacheLookup::Miss(_) => None,
        }
    }
}

/// Entry counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub total: u64,
    /// Expired rows not yet swept
    pub expired: u64,
    pub by_kind: BTreeMap<CacheKind, u64>,
}

/// Cache Store over the shared SQLite pool
#[derive(Debug, Clone)]
pub struct CacheStore {
    pool: SqlitePool,
    default_ttl: Duration,
}

impl CacheStore {
    pub fn new(pool: SqlitePool, default_ttl: Duration) -> Self {
        Self { pool, default_ttl }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Look up a key, reporting why it missed
    pub async fn lookup(&self, key: &CacheKey) -> Result<CacheLookup> {
        self.lookup_at(key, now_millis()).await
    }

    pub async fn lookup_at(&self, key: &CacheKey, now: i64) -> Result<CacheLookup> {
        let row = sqlx::query(
            "SELECT payload, fetched_at, expires_at FROM lookup_cache WHERE kind = ? AND cache_key = ?",
        )
        .bind(key.kind.as_str())
        .bind(&key.key)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(CacheLookup::Miss(MissReason::Absent));
        };

        let entry = CacheEntry {
            key: key.clone(),
            payload: row.try_get("payload")?,
            fetched_at: row.try_get("fetched_at")?,
            expires_at: row.try_get("expires_at")?,
        };

        if entry.is_valid_at(now) {
            Ok(CacheLookup::Hit(entry))
        } else {
            Ok(CacheLookup::Miss(MissReason::Expired {
                expired_at: entry.expires_at,
            }))
        }
    }

    /// Valid entry for `key`; absent and expired both read as `None`
    pub async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        Ok(self.lookup(key).await?.into_entry())
    }

    /// Decoded payload of a valid entry
    ///
    /// A payload that no longer decodes (layout change) reads as a miss.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<T>> {
        let Some(entry) = self.get(key).await? else {
            return Ok(None);
        };

        match entry.decode() {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Undecodable cache payload, treating as miss");
                Ok(None)
            }
        }
    }

    /// Store a payload with `ttl`, replacing any existing entry
    pub async fn put(&self, key: &CacheKey, payload: &str, ttl: Duration) -> Result<()> {
        self.put_at(key, payload, ttl, now_millis()).await
    }

    pub async fn put_at(&self, key: &CacheKey, payload: &str, ttl: Duration, now: i64) -> Result<()> {
        let expires_at = add_duration_millis(now, ttl);

        retry_on_lock("cache put", MAX_LOCK_WAIT, || async move {
            sqlx::query(
                r#"
                INSERT INTO lookup_cache (kind, cache_key, payload, fetched_at, expires_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(kind, cache_key) DO UPDATE SET
                    payload = excluded.payload,
                    fetched_at = excluded.fetched_at,
                    expires_at = excluded.expires_at
                "#,
            )
            .bind(key.kind.as_str())
            .bind(&key.key)
            .bind(payload)
            .bind(now)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

            Ok(())
        })
        .await?;

        tracing::debug!(key = %key, expires_at, "Cached entry");
        Ok(())
    }

    /// Serialize and store with the default TTL
    pub async fn put_json<T: Serialize>(&self, key: &CacheKey, value: &T) -> Result<()> {
        let payload = serde_json::to_string(value)?;
        self.put(key, &payload, self.default_ttl).await
    }

    /// Delete expired entries; returns the number removed
    pub async fn sweep_expired(&self) -> Result<u64> {
        self.sweep_expired_at(now_millis()).await
    }

    pub async fn sweep_expired_at(&self, now: i64) -> Result<u64> {
        let removed = retry_on_lock("cache sweep", MAX_LOCK_WAIT, || async move {
            let result = sqlx::query("DELETE FROM lookup_cache WHERE expires_at <= ?")
                .bind(now)
                .execute(&self.pool)
                .await
                .map_err(Error::Database)?;
            Ok(result.rows_affected())
        })
        .await?;

        if removed > 0 {
            tracing::info!(removed, "Swept expired cache entries");
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        self.stats_at(now_millis()).await
    }

    pub async fn stats_at(&self, now: i64) -> Result<CacheStats> {
        let rows = sqlx::query(
            r#"
            SELECT kind,
                   COUNT(*) AS total,
                   SUM(CASE WHEN expires_at <= ? THEN 1 ELSE 0 END) AS expired
            FROM lookup_cache
            GROUP BY kind
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        let mut stats = CacheStats::default();
        for row in rows {
            let kind: String = row.try_get("kind")?;
            let total: i64 = row.try_get("total")?;
            let expired: i64 = row.try_get("expired")?;

            stats.total += total as u64;
            stats.expired += expired as u64;

            match CacheKind::ALL.iter().find(|k| k.as_str() == kind) {
                Some(kind) => {
                    stats.by_kind.insert(*kind, total as u64);
                }
                None => tracing::warn!(kind = %kind, "Unknown cache kind in store"),
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::normalizer::normalize;

    #[test]
    fn test_match_key_format() {
        let key = CacheKey::for_match(&normalize("The Flash (1987)"), "Annual 1", Some(1988));
        assert_eq!(key.kind, CacheKind::Match);
        assert_eq!(key.key, "flash|annual 1|1988");
        assert_eq!(key.to_string(), "match:flash|annual 1|1988");

        let key = CacheKey::for_match(&normalize("Flash"), "1", None);
        assert_eq!(key.key, "flash|1|-");
    }

    #[test]
    fn test_series_key_format() {
        let key = CacheKey::for_series(&normalize("The Flash"), Some(1987));
        assert_eq!(key.to_string(), "series:flash|1987");
        assert_eq!(CacheKey::for_series(&normalize("Flash"), None).key, "flash|-");
    }

    #[test]
    fn test_entry_validity_is_strict() {
        let entry = CacheEntry {
            key: CacheKey::for_volume(1),
            payload: "{}".to_string(),
            fetched_at: 1_000,
            expires_at: 2_000,
        };
        assert!(entry.is_valid_at(1_999));
        assert!(!entry.is_valid_at(2_000));
    }

    #[test]
    fn test_kind_names_are_stable() {
        let names: Vec<&str> = CacheKind::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(names, vec!["match", "series", "volume", "volume_issues"]);
    }
}
