//! Resolution orchestrator
//!
//! Per reference, strictly in order:
//! normalize → cache check → (on miss) series mapping or catalog search →
//! score → issue lookup → cache write.
//!
//! - Accepted series are remembered per name and year, so a new issue of a
//!   known series skips the search.
//! - Only exact and probable matches with a located issue are written under
//!   the match key. Ambiguous, unmatched and issue-less results are returned
//!   without caching so a later run (or a human choice) is not pre-empted.
//! - Concurrent misses for the same key share one lookup.
//! - Failures are scoped to the reference that hit them; a batch always
//!   yields one outcome per input reference, in input order.
//! - Cache faults degrade to misses and never fail a resolution.

use crate::db::{CacheKey, CacheStore};
use crate::error::{ResolveError, ResolveResult};
use crate::models::{
    BatchSummary, Candidate, CatalogIssue, ConfidenceTier, MatchResult, Reference, Resolution,
    ResolvedReference,
};
use crate::progress::ProgressReporter;
use crate::services::catalog_client::{
    collect_volume_issues, CatalogApi, ComicVineClient, SearchAll, SearchOutcome,
};
use crate::services::in_flight::InFlight;
use crate::services::matcher::Matcher;
use crate::services::normalizer::{
    build_search_query, issue_numbers_match, normalize, normalize_issue_number, YearRange,
};
use crate::services::rate_limiter::RateLimiter;
use cbro_common::config::EngineConfig;
use cbro_common::events::{EventBus, ResolveEvent};
use futures::stream::{self, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Engine tuning taken from configuration
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    /// Page cap for every paginated walk
    pub max_pages: u32,
    /// Concurrent references in a batch
    pub concurrency: usize,
}

impl EngineOptions {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_pages: config.catalog.max_pages,
            concurrency: config.workers.concurrency,
        }
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_pages: 50,
            concurrency: 4,
        }
    }
}

/// Outcome shared by every caller waiting on one match key
type SharedOutcome = ResolveResult<Resolution>;

/// The resolution engine
pub struct ResolutionEngine {
    catalog: Arc<dyn CatalogApi>,
    cache: CacheStore,
    matcher: Matcher,
    options: EngineOptions,
    event_bus: Option<EventBus>,
    /// In-flight match lookups, cleared once each completes
    matches: InFlight<CacheKey, SharedOutcome>,
    /// Search results, memoized for the engine lifetime
    searches: InFlight<String, Arc<SearchOutcome>>,
    /// In-flight issue list fetches
    issue_lists: InFlight<u64, Arc<Vec<CatalogIssue>>>,
}

impl ResolutionEngine {
    pub fn new(
        catalog: Arc<dyn CatalogApi>,
        cache: CacheStore,
        matcher: Matcher,
        options: EngineOptions,
    ) -> Self {
        Self {
            catalog,
            cache,
            matcher,
            options,
            event_bus: None,
            matches: InFlight::new(),
            searches: InFlight::new(),
            issue_lists: InFlight::new(),
        }
    }

    /// Build the production engine: ComicVine client behind one shared
    /// throttle, cache on `pool`
    pub fn from_config(config: &EngineConfig, pool: SqlitePool) -> ResolveResult<Self> {
        let rate_limiter = Arc::new(RateLimiter::from_settings(&config.rate_limit));
        let client = ComicVineClient::new(&config.catalog, config.api_key.clone(), rate_limiter)?;
        let cache = CacheStore::new(pool, config.cache.ttl());
        let matcher = Matcher::new(
            config.matcher.clone(),
            YearRange::from_settings(&config.normalizer),
        );

        Ok(Self::new(
            Arc::new(client),
            cache,
            matcher,
            EngineOptions::from_config(config),
        ))
    }

    /// Publish per-reference and batch events
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    /// Resolve one reference
    pub async fn resolve(&self, reference: &Reference, cancel: &CancellationToken) -> Resolution {
        if cancel.is_cancelled() {
            return Resolution::Cancelled;
        }

        let name = normalize(&reference.series_name);
        let issue_number = normalize_issue_number(&reference.issue_number);
        let year = self.matcher.effective_year(reference);
        let key = CacheKey::for_match(&name, &issue_number, year);

        if let Some(result) = self.cached::<MatchResult>(&key).await {
            tracing::debug!(reference = %reference.label(), key = %key, "Cache hit");
            return Resolution::Resolved {
                result,
                from_cache: true,
            };
        }

        let outcome = self
            .matches
            .get_or_try_init(&key, || async {
                match self.resolve_uncached(reference, &key, cancel).await {
                    Err(ResolveError::Cancelled) => Err(ResolveError::Cancelled),
                    shared => Ok(shared),
                }
            })
            .await;
        self.matches.forget(&key);

        match outcome.and_then(|shared| shared) {
            Ok(resolution) => resolution,
            Err(ResolveError::Cancelled) => Resolution::Cancelled,
            Err(e) => {
                tracing::error!(
                    reference = %reference.label(),
                    error = %e,
                    "Reference resolution failed"
                );
                Resolution::Failed {
                    kind: e.kind(),
                    message: e.to_string(),
                }
            }
        }
    }

    async fn resolve_uncached(
        &self,
        reference: &Reference,
        key: &CacheKey,
        cancel: &CancellationToken,
    ) -> ResolveResult<Resolution> {
        let name = normalize(&reference.series_name);
        let series_key = CacheKey::for_series(&name, self.matcher.effective_year(reference));

        let mapped = if name.is_empty() {
            None
        } else {
            self.mapped_series(&series_key).await
        };

        let mut result = match mapped {
            Some(result) => {
                tracing::debug!(
                    reference = %reference.label(),
                    key = %series_key,
                    volume_id = ?result.chosen,
                    "Series mapping hit, skipping search"
                );
                result
            }
            None => {
                let query = if name.is_empty() {
                    build_search_query(&reference.series_name)
                } else {
                    name.to_string()
                };

                if query.is_empty() {
                    return Ok(Resolution::Unmatched {
                        result: MatchResult::none(),
                    });
                }

                let search = self.search(&query, cancel).await?;
                let mut result = self.matcher.match_reference(reference, &search.candidates);
                result.truncated = search.truncated;

                if result.tier.is_accepted() && !name.is_empty() {
                    self.store(&series_key, &result.series_only()).await;
                }
                result
            }
        };

        match result.tier {
            ConfidenceTier::Exact | ConfidenceTier::Probable => {
                if let Some(volume_id) = result.chosen {
                    let issue = self
                        .locate_issue(volume_id, &reference.issue_number, cancel)
                        .await?;
                    if let Some(issue) = issue {
                        result.cover_year = issue.cover_year();
                        result.issue_id = Some(issue.id);
                        result.issue_number = Some(issue.issue_number);
                    }
                }

                if result.has_issue() {
                    self.store(key, &result.without_runner_ups()).await;
                } else {
                    // Not cached: the issue may be published before the next run
                    tracing::warn!(
                        reference = %reference.label(),
                        volume_id = ?result.chosen,
                        "Issue not found in matched series"
                    );
                }

                tracing::info!(
                    reference = %reference.label(),
                    tier = result.tier.as_str(),
                    score = result.score,
                    volume_id = ?result.chosen,
                    "Reference resolved"
                );
                Ok(Resolution::Resolved {
                    result,
                    from_cache: false,
                })
            }
            ConfidenceTier::Ambiguous => {
                tracing::info!(
                    reference = %reference.label(),
                    candidates = result.runner_ups.len(),
                    "Ambiguous match, needs disambiguation"
                );
                Ok(Resolution::Ambiguous { result })
            }
            ConfidenceTier::None => {
                tracing::info!(
                    reference = %reference.label(),
                    candidates = result.runner_ups.len(),
                    "No match found"
                );
                Ok(Resolution::Unmatched { result })
            }
        }
    }

    /// Previously accepted series for a name and year
    async fn mapped_series(&self, key: &CacheKey) -> Option<MatchResult> {
        self.cached::<MatchResult>(key)
            .await
            .filter(|result| result.tier.is_accepted() && result.chosen.is_some())
    }

    /// Collected search results for `query`, memoized per engine
    async fn search(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> ResolveResult<Arc<SearchOutcome>> {
        self.searches
            .get_or_try_init(&query.to_string(), || async {
                let walk = SearchAll::new(self.catalog.clone(), query, self.options.max_pages);
                let outcome = walk.collect(cancel).await?;
                tracing::debug!(
                    query,
                    candidates = outcome.candidates.len(),
                    pages = outcome.pages_fetched,
                    truncated = outcome.truncated,
                    "Search complete"
                );
                Ok::<_, ResolveError>(Arc::new(outcome))
            })
            .await
    }

    /// Find an issue inside a series
    ///
    /// Uses the cached issue list first. A cached list without the number is
    /// refetched once, since ongoing series keep growing.
    async fn locate_issue(
        &self,
        volume_id: u64,
        issue_number: &str,
        cancel: &CancellationToken,
    ) -> ResolveResult<Option<CatalogIssue>> {
        let find = |issues: &[CatalogIssue]| {
            issues
                .iter()
                .find(|issue| issue_numbers_match(&issue.issue_number, issue_number))
                .cloned()
        };

        let key = CacheKey::for_volume_issues(volume_id);
        if let Some(cached) = self.cached::<Vec<CatalogIssue>>(&key).await {
            if let Some(issue) = find(&cached) {
                return Ok(Some(issue));
            }
            tracing::debug!(volume_id, issue_number, "Issue missing from cached list, refetching");
        }

        let issues = self
            .issue_lists
            .get_or_try_init(&volume_id, || async {
                let (issues, _truncated) = collect_volume_issues(
                    self.catalog.as_ref(),
                    volume_id,
                    self.options.max_pages,
                    cancel,
                )
                .await?;
                self.store(&key, &issues).await;
                Ok::<_, ResolveError>(Arc::new(issues))
            })
            .await;
        self.issue_lists.forget(&volume_id);

        Ok(find(&issues?))
    }

    /// Series detail, from cache or catalog
    pub async fn series_detail(
        &self,
        volume_id: u64,
        cancel: &CancellationToken,
    ) -> ResolveResult<Candidate> {
        let key = CacheKey::for_volume(volume_id);
        if let Some(candidate) = self.cached::<Candidate>(&key).await {
            return Ok(candidate);
        }

        let candidate = self.catalog.fetch_detail(volume_id, cancel).await?;
        self.store(&key, &candidate).await;
        Ok(candidate)
    }

    /// Resolve a batch with bounded concurrency
    ///
    /// Returns one entry per input reference, in input order, whatever its
    /// outcome. Cancellation turns unfinished references into
    /// `Resolution::Cancelled`; all workers are awaited before returning.
    pub async fn resolve_all(
        &self,
        references: Vec<Reference>,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Vec<ResolvedReference> {
        let total = references.len();
        let session_id = Uuid::new_v4();
        let start_time = Instant::now();

        tracing::info!(session_id = %session_id, total, "Resolving batch");
        self.emit(ResolveEvent::BatchStarted {
            session_id,
            total,
            timestamp: chrono::Utc::now(),
        });

        let mut slots: Vec<Option<ResolvedReference>> = vec![None; total];
        let mut finished = 0;

        let mut workers = stream::iter(references.into_iter().enumerate())
            .map(|(index, reference)| async move {
                let resolution = self.resolve(&reference, cancel).await;
                (index, reference, resolution)
            })
            .buffer_unordered(self.options.concurrency.max(1));

        while let Some((index, reference, resolution)) = workers.next().await {
            finished += 1;
            let status = format!(
                "{} → {}",
                reference.label(),
                outcome_label(&resolution)
            );
            progress.report(finished, total, &status);
            self.emit(ResolveEvent::Progress {
                session_id,
                current: finished,
                total,
                status,
                timestamp: chrono::Utc::now(),
            });

            self.emit(ResolveEvent::ReferenceFinished {
                session_id,
                position: reference.position,
                series_name: reference.series_name.clone(),
                issue_number: reference.issue_number.clone(),
                outcome: resolution.outcome_kind(),
                from_cache: resolution.is_from_cache(),
                timestamp: chrono::Utc::now(),
            });

            slots[index] = Some(ResolvedReference {
                reference,
                resolution,
            });
        }

        let results: Vec<ResolvedReference> = slots.into_iter().flatten().collect();
        let summary = BatchSummary::tally(&results);

        tracing::info!(
            session_id = %session_id,
            resolved = summary.resolved,
            from_cache = summary.from_cache,
            ambiguous = summary.ambiguous,
            unmatched = summary.unmatched,
            failed = summary.failed,
            cancelled = summary.cancelled,
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Batch complete"
        );

        self.emit(ResolveEvent::BatchCompleted {
            session_id,
            resolved: summary.resolved,
            ambiguous: summary.ambiguous,
            unmatched: summary.unmatched,
            failed: summary.failed,
            cancelled: summary.cancelled,
            duration_ms: start_time.elapsed().as_millis() as u64,
            timestamp: chrono::Utc::now(),
        });

        results
    }

    /// Remove expired cache entries
    pub async fn sweep(&self) -> ResolveResult<u64> {
        let removed = self.cache.sweep_expired().await?;
        self.emit(ResolveEvent::CacheSwept {
            removed,
            timestamp: chrono::Utc::now(),
        });
        Ok(removed)
    }

    /// Valid cached value; cache faults read as a miss
    async fn cached<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        match self.cache.get_json(key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    /// Write-through that never fails the caller
    async fn store<T: Serialize>(&self, key: &CacheKey, value: &T) {
        if let Err(e) = self.cache.put_json(key, value).await {
            tracing::warn!(key = %key, error = %e, "Cache write failed");
        }
    }

    fn emit(&self, event: ResolveEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit_lossy(event);
        }
    }
}

fn outcome_label(resolution: &Resolution) -> String {
    match resolution {
        Resolution::Resolved { result, from_cache } => {
            let name = result
                .series
                .as_ref()
                .map(|s| s.name.as_str())
                .unwrap_or("?");
            if *from_cache {
                format!("{} (cached)", name)
            } else {
                format!("{} ({})", name, result.tier.as_str())
            }
        }
        Resolution::Ambiguous { result } => {
            format!("ambiguous ({} candidates)", result.runner_ups.len())
        }
        Resolution::Unmatched { .. } => "no match".to_string(),
        Resolution::Failed { kind, .. } => format!("failed ({:?})", kind),
        Resolution::Cancelled => "cancelled".to_string(),
    }
}
