//! ComicVine catalog client
//!
//! Every request goes through the shared [`RateLimiter`] first, including
//! retries and every page of a paginated walk. Transient failures (timeouts,
//! connect errors, 5xx, rate-limit responses) are retried with exponential
//! backoff; everything else fails immediately.
//!
//! Response parsing is split into pure functions over `serde_json::Value`
//! so it can be tested against canned payloads.

use crate::models::{Candidate, CatalogIssue};
use crate::services::rate_limiter::{Cancelled, RateLimiter};
use crate::utils::retry::{retry_with_backoff, RetryPolicy, Retryable};
use async_trait::async_trait;
use cbro_common::config::CatalogSettings;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

const VOLUME_FIELDS: &str = "id,name,start_year,publisher,count_of_issues,aliases";
const ISSUE_FIELDS: &str = "id,volume,issue_number,cover_date,name";

/// ComicVine envelope status codes
const STATUS_OK: i64 = 1;
const STATUS_RATE_LIMITED: i64 = 107;

/// Catalog client errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CatalogError {
    /// Timeout, connection failure or 5xx
    #[error("Network error: {0}")]
    Transient(String),

    /// HTTP 429 or the catalog's own rate-limit status
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Response body could not be decoded
    #[error("Parse error: {0}")]
    Malformed(String),

    /// 4xx (other than 429) or catalog-reported error
    #[error("API error {0}: {1}")]
    Rejected(u16, String),

    #[error("Cancelled")]
    Cancelled,
}

impl Retryable for CatalogError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            CatalogError::Transient(_) | CatalogError::RateLimitExceeded(_)
        )
    }

    fn cancelled() -> Self {
        CatalogError::Cancelled
    }
}

impl From<Cancelled> for CatalogError {
    fn from(_: Cancelled) -> Self {
        CatalogError::Cancelled
    }
}

impl From<reqwest::Error> for CatalogError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            CatalogError::Malformed(err.to_string())
        } else {
            CatalogError::Transient(err.to_string())
        }
    }
}

/// One page of series search results
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchPage {
    pub candidates: Vec<Candidate>,
    pub has_more: bool,
}

/// One page of a series' issue list
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IssuePage {
    pub issues: Vec<CatalogIssue>,
    pub has_more: bool,
}

/// External catalog operations
///
/// Pages are 1-based. Implementations gate every request through the rate
/// limiter and honor `cancel` during waits and in-flight requests.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    /// Search series by name
    async fn search(
        &self,
        query: &str,
        page: u32,
        cancel: &CancellationToken,
    ) -> Result<SearchPage, CatalogError>;

    /// Series detail by catalog id
    async fn fetch_detail(
        &self,
        id: u64,
        cancel: &CancellationToken,
    ) -> Result<Candidate, CatalogError>;

    /// Issues of one series
    async fn volume_issues(
        &self,
        volume_id: u64,
        page: u32,
        cancel: &CancellationToken,
    ) -> Result<IssuePage, CatalogError>;
}

/// ComicVine REST client
pub struct ComicVineClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
    page_size: u32,
    rate_limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl ComicVineClient {
    pub fn new(
        settings: &CatalogSettings,
        api_key: impl Into<String>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Result<Self, CatalogError> {
        let http_client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(settings.request_timeout())
            .build()
            .map_err(|e| CatalogError::Transient(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            page_size: settings.page_size,
            rate_limiter,
            retry: RetryPolicy::from_settings(settings),
        })
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// GET an endpoint with bounded retry; returns the checked envelope
    async fn get_json(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
        cancel: &CancellationToken,
    ) -> Result<Value, CatalogError> {
        retry_with_backoff(endpoint, &self.retry, cancel, || {
            self.request_once(endpoint, params, cancel)
        })
        .await
    }

    async fn request_once(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
        cancel: &CancellationToken,
    ) -> Result<Value, CatalogError> {
        // Rate limit
        self.rate_limiter.acquire(cancel).await?;

        let url = format!("{}/{}/", self.base_url, endpoint);
        tracing::debug!(url = %url, "Querying ComicVine API");

        let request = self
            .http_client
            .get(&url)
            .query(&[("api_key", self.api_key.as_str()), ("format", "json")])
            .query(params);

        let response = tokio::select! {
            response = request.send() => response?,
            _ = cancel.cancelled() => return Err(CatalogError::Cancelled),
        };

        let status = response.status();

        if status.as_u16() == 429 {
            return Err(CatalogError::RateLimitExceeded(format!("HTTP {}", status)));
        }

        if status.is_server_error() {
            return Err(CatalogError::Transient(format!("HTTP {}", status)));
        }

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(CatalogError::Rejected(status.as_u16(), error_text));
        }

        let body = tokio::select! {
            body = response.text() => body?,
            _ = cancel.cancelled() => return Err(CatalogError::Cancelled),
        };

        let value: Value =
            serde_json::from_str(&body).map_err(|e| CatalogError::Malformed(e.to_string()))?;

        check_envelope(&value)?;
        Ok(value)
    }
}

#[async_trait]
impl CatalogApi for ComicVineClient {
    async fn search(
        &self,
        query: &str,
        page: u32,
        cancel: &CancellationToken,
    ) -> Result<SearchPage, CatalogError> {
        let params = [
            ("query", query.to_string()),
            ("resources", "volume".to_string()),
            ("field_list", VOLUME_FIELDS.to_string()),
            ("limit", self.page_size.to_string()),
            ("page", page.max(1).to_string()),
        ];
        let value = self.get_json("search", &params, cancel).await?;
        parse_search_page(&value, page, self.page_size)
    }

    async fn fetch_detail(
        &self,
        id: u64,
        cancel: &CancellationToken,
    ) -> Result<Candidate, CatalogError> {
        let params = [("field_list", VOLUME_FIELDS.to_string())];
        let value = self
            .get_json(&format!("volume/4050-{}", id), &params, cancel)
            .await?;
        parse_detail(&value)
    }

    async fn volume_issues(
        &self,
        volume_id: u64,
        page: u32,
        cancel: &CancellationToken,
    ) -> Result<IssuePage, CatalogError> {
        let offset = page.max(1).saturating_sub(1) * self.page_size;
        let params = [
            ("filter", format!("volume:{}", volume_id)),
            ("field_list", ISSUE_FIELDS.to_string()),
            ("sort", "id:asc".to_string()),
            ("offset", offset.to_string()),
            ("limit", self.page_size.to_string()),
        ];
        let value = self.get_json("issues", &params, cancel).await?;
        parse_issues_page(&value, volume_id, offset)
    }
}

/// Lazy, finite, restartable walk over every search page
///
/// Stops after `max_pages` pages even when the catalog reports more; the
/// walk then reports itself truncated.
pub struct SearchAll {
    catalog: Arc<dyn CatalogApi>,
    query: String,
    max_pages: u32,
    next_page: u32,
    pages_fetched: u32,
    buffer: VecDeque<Candidate>,
    more_available: bool,
    truncated: bool,
}

/// Everything a completed walk collected
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOutcome {
    pub candidates: Vec<Candidate>,
    pub truncated: bool,
    pub pages_fetched: u32,
}

impl SearchAll {
    pub fn new(catalog: Arc<dyn CatalogApi>, query: impl Into<String>, max_pages: u32) -> Self {
        Self {
            catalog,
            query: query.into(),
            max_pages: max_pages.max(1),
            next_page: 1,
            pages_fetched: 0,
            buffer: VecDeque::new(),
            more_available: true,
            truncated: false,
        }
    }

    /// Next candidate, fetching the next page when the buffer runs dry
    pub async fn next(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<Candidate>, CatalogError> {
        loop {
            if let Some(candidate) = self.buffer.pop_front() {
                return Ok(Some(candidate));
            }

            if !self.more_available {
                return Ok(None);
            }

            if self.pages_fetched >= self.max_pages {
                if !self.truncated {
                    tracing::warn!(
                        query = %self.query,
                        pages = self.pages_fetched,
                        "Search page cap reached, results truncated"
                    );
                }
                self.truncated = true;
                self.more_available = false;
                return Ok(None);
            }

            let page = self.next_page;
            tracing::debug!(query = %self.query, page, "Fetching search page");
            let result = self.catalog.search(&self.query, page, cancel).await?;

            self.pages_fetched += 1;
            self.next_page += 1;
            // A page can be empty after filtering out non-series results
            self.more_available = result.has_more;
            self.buffer.extend(result.candidates);
        }
    }

    /// Collection stopped at the page cap
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }

    /// Rewind to the first page
    pub fn restart(&mut self) {
        self.next_page = 1;
        self.pages_fetched = 0;
        self.buffer.clear();
        self.more_available = true;
        self.truncated = false;
    }

    /// Drain the walk into a vector
    pub async fn collect(mut self, cancel: &CancellationToken) -> Result<SearchOutcome, CatalogError> {
        let mut candidates = Vec::new();
        while let Some(candidate) = self.next(cancel).await? {
            candidates.push(candidate);
        }
        Ok(SearchOutcome {
            candidates,
            truncated: self.truncated,
            pages_fetched: self.pages_fetched,
        })
    }
}

/// Fetch a series' full issue list, bounded by `max_pages`
///
/// Returns the issues and whether the page cap cut the list short.
pub async fn collect_volume_issues(
    catalog: &dyn CatalogApi,
    volume_id: u64,
    max_pages: u32,
    cancel: &CancellationToken,
) -> Result<(Vec<CatalogIssue>, bool), CatalogError> {
    let mut issues = Vec::new();

    for page in 1..=max_pages.max(1) {
        let result = catalog.volume_issues(volume_id, page, cancel).await?;
        let exhausted = !result.has_more || result.issues.is_empty();
        issues.extend(result.issues);

        if exhausted {
            return Ok((issues, false));
        }
    }

    tracing::warn!(volume_id, max_pages, "Issue list page cap reached, list truncated");
    Ok((issues, true))
}

/// Check the ComicVine envelope `status_code`
pub fn check_envelope(value: &Value) -> Result<(), CatalogError> {
    let status = value
        .get("status_code")
        .and_then(Value::as_i64)
        .ok_or_else(|| CatalogError::Malformed("missing status_code".to_string()))?;

    let message = value
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("Unknown error")
        .to_string();

    match status {
        STATUS_OK => Ok(()),
        STATUS_RATE_LIMITED => Err(CatalogError::RateLimitExceeded(message)),
        other => Err(CatalogError::Rejected(
            u16::try_from(other).unwrap_or(u16::MAX),
            message,
        )),
    }
}

/// Parse one page of `search` results
pub fn parse_search_page(value: &Value, page: u32, page_size: u32) -> Result<SearchPage, CatalogError> {
    let results = results_array(value)?;

    let candidates = results
        .iter()
        .filter(|entry| {
            entry
                .get("resource_type")
                .and_then(Value::as_str)
                .map_or(true, |kind| kind == "volume")
        })
        .map(parse_candidate)
        .collect::<Result<Vec<_>, _>>()?;

    let seen = u64::from(page.max(1) - 1) * u64::from(page_size) + results.len() as u64;
    let has_more = !results.is_empty() && seen < total_results(value);

    Ok(SearchPage { candidates, has_more })
}

/// Parse a `volume/4050-{id}` detail response
pub fn parse_detail(value: &Value) -> Result<Candidate, CatalogError> {
    let result = value
        .get("results")
        .filter(|r| r.is_object())
        .ok_or_else(|| CatalogError::Malformed("missing results object".to_string()))?;
    parse_candidate(result)
}

/// Parse one page of `issues` results
pub fn parse_issues_page(value: &Value, volume_id: u64, offset: u32) -> Result<IssuePage, CatalogError> {
    let results = results_array(value)?;

    let issues = results
        .iter()
        .map(|entry| parse_issue(entry, volume_id))
        .collect::<Result<Vec<_>, _>>()?;

    let seen = u64::from(offset) + results.len() as u64;
    let has_more = !results.is_empty() && seen < total_results(value);

    Ok(IssuePage { issues, has_more })
}

fn results_array(value: &Value) -> Result<&Vec<Value>, CatalogError> {
    value
        .get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| CatalogError::Malformed("missing results array".to_string()))
}

fn total_results(value: &Value) -> u64 {
    value
        .get("number_of_total_results")
        .and_then(lenient_u64)
        .unwrap_or(0)
}

fn parse_candidate(entry: &Value) -> Result<Candidate, CatalogError> {
    let id = entry
        .get("id")
        .and_then(lenient_u64)
        .ok_or_else(|| CatalogError::Malformed("volume without id".to_string()))?;

    let name = entry
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();

    let start_year = entry
        .get("start_year")
        .and_then(lenient_u64)
        .and_then(|y| i32::try_from(y).ok())
        .filter(|y| *y > 0);

    let issue_count = entry
        .get("count_of_issues")
        .and_then(lenient_u64)
        .and_then(|c| u32::try_from(c).ok());

    let publisher = entry
        .get("publisher")
        .and_then(|p| p.get("name"))
        .and_then(Value::as_str)
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty());

    let aliases = entry
        .get("aliases")
        .and_then(Value::as_str)
        .map(|raw| {
            raw.lines()
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(Candidate {
        id,
        name,
        start_year,
        issue_count,
        publisher,
        aliases,
    })
}

fn parse_issue(entry: &Value, volume_id: u64) -> Result<CatalogIssue, CatalogError> {
    let id = entry
        .get("id")
        .and_then(lenient_u64)
        .ok_or_else(|| CatalogError::Malformed("issue without id".to_string()))?;

    let volume_id = entry
        .get("volume")
        .and_then(|v| v.get("id"))
        .and_then(lenient_u64)
        .unwrap_or(volume_id);

    let text = |field: &str| {
        entry
            .get(field)
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };

    Ok(CatalogIssue {
        id,
        volume_id,
        issue_number: text("issue_number").unwrap_or_default(),
        cover_date: text("cover_date"),
        name: text("name"),
    })
}

/// Integer from a JSON number or from the digits of a string ("1950?")
fn lenient_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => {
            let digits: String = s.chars().filter(|c| c.is_ascii_digit()).collect();
            digits.parse().ok()
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[test]
    fn test_envelope_status_codes() {
        assert!(check_envelope(&json!({"status_code": 1, "error": "OK"})).is_ok());
        assert!(matches!(
            check_envelope(&json!({"status_code": 107, "error": "Rate limit exceeded"})),
            Err(CatalogError::RateLimitExceeded(_))
        ));
        assert_eq!(
            check_envelope(&json!({"status_code": 100, "error": "Invalid API Key"})),
            Err(CatalogError::Rejected(100, "Invalid API Key".to_string()))
        );
        assert!(matches!(
            check_envelope(&json!({"results": []})),
            Err(CatalogError::Malformed(_))
        ));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(CatalogError::Transient("timeout".into()).is_retryable());
        assert!(CatalogError::RateLimitExceeded("429".into()).is_retryable());
        assert!(!CatalogError::Malformed("bad".into()).is_retryable());
        assert!(!CatalogError::Rejected(404, "nope".into()).is_retryable());
        assert!(!CatalogError::Cancelled.is_retryable());
    }

    #[test]
    fn test_parse_search_page() {
        let value = json!({
            "status_code": 1,
            "number_of_total_results": 3,
            "results": [
                {
                    "id": 11,
                    "name": "Green Lantern",
                    "start_year": "2005",
                    "count_of_issues": 67,
                    "publisher": {"name": "DC Comics"},
                    "aliases": "GL\n\nGreen Lantern Vol. 4\n",
                    "resource_type": "volume"
                },
                {
                    "id": 12,
                    "name": "Green Lantern Corps",
                    "start_year": "2006?",
                    "count_of_issues": 40,
                    "publisher": null,
                    "aliases": null
                }
            ]
        });

        let page = parse_search_page(&value, 1, 2).unwrap();
        assert!(page.has_more);
        assert_eq!(page.candidates.len(), 2);

        let gl = &page.candidates[0];
        assert_eq!(gl.id, 11);
        assert_eq!(gl.start_year, Some(2005));
        assert_eq!(gl.issue_count, Some(67));
        assert_eq!(gl.publisher.as_deref(), Some("DC Comics"));
        assert_eq!(gl.aliases, vec!["GL", "Green Lantern Vol. 4"]);

        let glc = &page.candidates[1];
        assert_eq!(glc.start_year, Some(2006));
        assert_eq!(glc.publisher, None);
        assert!(glc.aliases.is_empty());

        let last = parse_search_page(&value, 2, 2).unwrap();
        assert!(!last.has_more);
    }

    #[test]
    fn test_parse_search_page_skips_other_resources() {
        let value = json!({
            "status_code": 1,
            "number_of_total_results": 2,
            "results": [
                {"id": 1, "name": "Flash", "resource_type": "volume"},
                {"id": 2, "name": "Flash #1", "resource_type": "issue"}
            ]
        });
        let page = parse_search_page(&value, 1, 100).unwrap();
        assert_eq!(page.candidates.len(), 1);
        assert_eq!(page.candidates[0].start_year, None);
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(
            parse_search_page(&json!({"status_code": 1}), 1, 100),
            Err(CatalogError::Malformed(_))
        ));
        assert!(matches!(
            parse_search_page(&json!({"status_code": 1, "results": [{"name": "x"}]}), 1, 100),
            Err(CatalogError::Malformed(_))
        ));
        assert!(matches!(
            parse_detail(&json!({"status_code": 1, "results": []})),
            Err(CatalogError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_issues_page() {
        let value = json!({
            "status_code": 1,
            "number_of_total_results": 101,
            "results": [
                {"id": 500, "volume": {"id": 11}, "issue_number": "43",
                 "cover_date": "2009-08-01", "name": "Agent Orange, Part 1"},
                {"id": 501, "issue_number": null, "cover_date": null, "name": ""}
            ]
        });

        let page = parse_issues_page(&value, 11, 0).unwrap();
        assert!(page.has_more);
        assert_eq!(page.issues[0].issue_number, "43");
        assert_eq!(page.issues[0].cover_year(), Some(2009));
        assert_eq!(page.issues[1].volume_id, 11);
        assert_eq!(page.issues[1].issue_number, "");
        assert_eq!(page.issues[1].name, None);

        let tail = parse_issues_page(&value, 11, 100).unwrap();
        assert!(!tail.has_more);
    }

    /// Serves `total_pages` pages of two candidates each; `empty_page` has
    /// none, as when every raw result on it was filtered out
    struct PagedCatalog {
        total_pages: u32,
        empty_page: Option<u32>,
        calls: Mutex<Vec<u32>>,
    }

    impl PagedCatalog {
        fn new(total_pages: u32) -> Self {
            Self {
                total_pages,
                empty_page: None,
                calls: Mutex::new(vec![]),
            }
        }
    }

    #[async_trait]
    impl CatalogApi for PagedCatalog {
        async fn search(
            &self,
            _query: &str,
            page: u32,
            _cancel: &CancellationToken,
        ) -> Result<SearchPage, CatalogError> {
            self.calls.lock().unwrap().push(page);
            let base = u64::from(page) * 10;
            let per_page = if self.empty_page == Some(page) { 0 } else { 2 };
            let candidates = (0..per_page)
                .map(|i| Candidate {
                    id: base + i,
                    name: format!("Series {}", base + i),
                    start_year: None,
                    issue_count: None,
                    publisher: None,
                    aliases: vec![],
                })
                .collect();
            Ok(SearchPage {
                candidates,
                has_more: page < self.total_pages,
            })
        }

        async fn fetch_detail(&self, id: u64, _: &CancellationToken) -> Result<Candidate, CatalogError> {
            Err(CatalogError::Rejected(404, id.to_string()))
        }

        async fn volume_issues(&self, _: u64, _: u32, _: &CancellationToken) -> Result<IssuePage, CatalogError> {
            Ok(IssuePage::default())
        }
    }

    #[tokio::test]
    async fn test_search_all_walks_every_page() {
        let catalog = Arc::new(PagedCatalog::new(3));
        let cancel = CancellationToken::new();

        let outcome = SearchAll::new(catalog.clone(), "series", 50)
            .collect(&cancel)
            .await
            .unwrap();

        assert_eq!(outcome.candidates.len(), 6);
        assert!(!outcome.truncated);
        assert_eq!(*catalog.calls.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_search_all_continues_past_filtered_page() {
        let catalog = Arc::new(PagedCatalog {
            empty_page: Some(2),
            ..PagedCatalog::new(3)
        });
        let cancel = CancellationToken::new();

        let outcome = SearchAll::new(catalog.clone(), "series", 50)
            .collect(&cancel)
            .await
            .unwrap();

        assert_eq!(outcome.candidates.len(), 4);
        assert_eq!(outcome.candidates[2].id, 30);
        assert_eq!(*catalog.calls.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_search_all_stops_at_page_cap() {
        let catalog = Arc::new(PagedCatalog::new(1000));
        let cancel = CancellationToken::new();

        let outcome = SearchAll::new(catalog.clone(), "series", 4)
            .collect(&cancel)
            .await
            .unwrap();

        assert!(outcome.truncated);
        assert_eq!(outcome.pages_fetched, 4);
        assert_eq!(outcome.candidates.len(), 8);
        assert_eq!(catalog.calls.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_search_all_is_lazy_and_restartable() {
        let catalog = Arc::new(PagedCatalog::new(5));
        let cancel = CancellationToken::new();
        let mut walk = SearchAll::new(catalog.clone(), "series", 50);

        let first = walk.next(&cancel).await.unwrap().unwrap();
        assert_eq!(first.id, 10);
        assert_eq!(walk.pages_fetched(), 1);

        walk.restart();
        let again = walk.next(&cancel).await.unwrap().unwrap();
        assert_eq!(again, first);
        assert_eq!(*catalog.calls.lock().unwrap(), vec![1, 1]);
    }
}
