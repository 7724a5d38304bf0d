//! Scripted in-memory catalog
//!
//! Serves canned series and issue lists in pages, counts every call, and
//! can fail chosen queries or delay every response.

use async_trait::async_trait;
use cbro_resolve::models::{Candidate, CatalogIssue};
use cbro_resolve::services::{CatalogApi, CatalogError, IssuePage, SearchPage};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub fn candidate(id: u64, name: &str, start_year: Option<i32>, issue_count: Option<u32>) -> Candidate {
    Candidate {
        id,
        name: name.to_string(),
        start_year,
        issue_count,
        publisher: Some("DC Comics".to_string()),
        aliases: Vec::new(),
    }
}

pub fn issue(id: u64, volume_id: u64, issue_number: &str, cover_date: Option<&str>) -> CatalogIssue {
    CatalogIssue {
        id,
        volume_id,
        issue_number: issue_number.to_string(),
        cover_date: cover_date.map(str::to_string),
        name: None,
    }
}

pub struct FakeCatalog {
    page_size: usize,
    delay: Option<Duration>,
    series: Mutex<HashMap<String, Vec<Candidate>>>,
    issues: Mutex<HashMap<u64, Vec<CatalogIssue>>>,
    failing_queries: Mutex<HashMap<String, CatalogError>>,
    search_calls: AtomicUsize,
    detail_calls: AtomicUsize,
    issue_calls: AtomicUsize,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self {
            page_size: 100,
            delay: None,
            series: Mutex::new(HashMap::new()),
            issues: Mutex::new(HashMap::new()),
            failing_queries: Mutex::new(HashMap::new()),
            search_calls: AtomicUsize::new(0),
            detail_calls: AtomicUsize::new(0),
            issue_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Every call waits this long (cancellable) before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Search results for `query` (matched case-insensitively)
    pub fn add_series(&self, query: &str, candidates: Vec<Candidate>) {
        self.series
            .lock()
            .unwrap()
            .insert(query.to_lowercase(), candidates);
    }

    pub fn set_issues(&self, volume_id: u64, issues: Vec<CatalogIssue>) {
        self.issues.lock().unwrap().insert(volume_id, issues);
    }

    /// Every search for `query` fails with `error`
    pub fn fail_query(&self, query: &str, error: CatalogError) {
        self.failing_queries
            .lock()
            .unwrap()
            .insert(query.to_lowercase(), error);
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn detail_calls(&self) -> usize {
        self.detail_calls.load(Ordering::SeqCst)
    }

    pub fn issue_calls(&self) -> usize {
        self.issue_calls.load(Ordering::SeqCst)
    }

    async fn pause(&self, cancel: &CancellationToken) -> Result<(), CatalogError> {
        if cancel.is_cancelled() {
            return Err(CatalogError::Cancelled);
        }
        if let Some(delay) = self.delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(CatalogError::Cancelled),
            }
        }
        Ok(())
    }

    fn page<T: Clone>(&self, items: &[T], page: u32) -> (Vec<T>, bool) {
        let start = (page.max(1) as usize - 1) * self.page_size;
        let end = (start + self.page_size).min(items.len());
        if start >= items.len() {
            return (Vec::new(), false);
        }
        (items[start..end].to_vec(), end < items.len())
    }
}

impl Default for FakeCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CatalogApi for FakeCatalog {
    async fn search(
        &self,
        query: &str,
        page: u32,
        cancel: &CancellationToken,
    ) -> Result<SearchPage, CatalogError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.pause(cancel).await?;

        let key = query.to_lowercase();
        if let Some(error) = self.failing_queries.lock().unwrap().get(&key) {
            return Err(error.clone());
        }

        let all = self
            .series
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or_default();
        let (candidates, has_more) = self.page(&all, page);
        Ok(SearchPage { candidates, has_more })
    }

    async fn fetch_detail(
        &self,
        id: u64,
        cancel: &CancellationToken,
    ) -> Result<Candidate, CatalogError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        self.pause(cancel).await?;

        self.series
            .lock()
            .unwrap()
            .values()
            .flatten()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| CatalogError::Rejected(404, "Object Not Found".to_string()))
    }

    async fn volume_issues(
        &self,
        volume_id: u64,
        page: u32,
        cancel: &CancellationToken,
    ) -> Result<IssuePage, CatalogError> {
        self.issue_calls.fetch_add(1, Ordering::SeqCst);
        self.pause(cancel).await?;

        let all = self
            .issues
            .lock()
            .unwrap()
            .get(&volume_id)
            .cloned()
            .unwrap_or_default();
        let (issues, has_more) = self.page(&all, page);
        Ok(IssuePage { issues, has_more })
    }
}
