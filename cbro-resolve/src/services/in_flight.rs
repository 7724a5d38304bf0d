//! Per-key in-flight lookup coalescing
//!
//! The first caller for a key runs the lookup; concurrent callers for the
//! same key wait on the same `OnceCell` and receive a clone of its value. If
//! the running lookup fails, the cell stays empty and the next waiter runs
//! its own lookup.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

pub struct InFlight<K, V> {
    cells: Mutex<HashMap<K, Arc<OnceCell<V>>>>,
}

impl<K, V> InFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            cells: Mutex::new(HashMap::new()),
        }
    }

    fn cell(&self, key: &K) -> Arc<OnceCell<V>> {
        let mut cells = match self.cells.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        cells
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    /// Value for `key`, running `init` only if no value exists or is in flight
    ///
    /// A successful value stays memoized until [`InFlight::forget`].
    pub async fn get_or_try_init<F, Fut, E>(&self, key: &K, init: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let cell = self.cell(key);
        cell.get_or_try_init(init).await.cloned()
    }

    /// Drop the memoized value so the next call runs a fresh lookup
    pub fn forget(&self, key: &K) {
        let mut cells = match self.cells.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        cells.remove(key);
    }

    pub fn len(&self) -> usize {
        match self.cells.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> Default for InFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::task::JoinSet;

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_lookup() {
        let in_flight: Arc<InFlight<String, u32>> = Arc::new(InFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut tasks = JoinSet::new();
        for _ in 0..8 {
            let in_flight = in_flight.clone();
            let calls = calls.clone();
            tasks.spawn(async move {
                in_flight
                    .get_or_try_init(&"flash".to_string(), || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok::<_, ()>(7)
                    })
                    .await
            });
        }

        while let Some(result) = tasks.join_next().await {
            assert_eq!(result.unwrap(), Ok(7));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_lookup_is_retried_by_next_caller() {
        let in_flight: InFlight<u64, u32> = InFlight::new();

        let first = in_flight.get_or_try_init(&1, || async { Err("boom") }).await;
        assert_eq!(first, Err("boom"));

        let second = in_flight.get_or_try_init(&1, || async { Ok::<_, &str>(3) }).await;
        assert_eq!(second, Ok(3));
    }

    #[tokio::test]
    async fn test_forget_allows_fresh_lookup() {
        let in_flight: InFlight<u64, u32> = InFlight::new();
        in_flight.get_or_try_init(&1, || async { Ok::<_, ()>(1) }).await.unwrap();
        assert_eq!(in_flight.len(), 1);

        let memoized = in_flight.get_or_try_init(&1, || async { Ok::<_, ()>(2) }).await;
        assert_eq!(memoized, Ok(1));

        in_flight.forget(&1);
        assert!(in_flight.is_empty());
        let fresh = in_flight.get_or_try_init(&1, || async { Ok::<_, ()>(2) }).await;
        assert_eq!(fresh, Ok(2));
    }
}
