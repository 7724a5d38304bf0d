//! Batch progress reporting
//!
//! Reporters receive `(current, total, status)` after every finished
//! reference. Closures of that shape implement [`ProgressReporter`] directly.
//! The engine also publishes each report on its event bus.

/// Receives batch progress
pub trait ProgressReporter: Send + Sync {
    /// `current` of `total` references have finished; `status` is for humans
    fn report(&self, current: usize, total: usize, status: &str);
}

impl<F> ProgressReporter for F
where
    F: Fn(usize, usize, &str) + Send + Sync,
{
    fn report(&self, current: usize, total: usize, status: &str) {
        self(current, total, status)
    }
}

/// Discards progress
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _current: usize, _total: usize, _status: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_closure_reporter() {
        let seen = Mutex::new(Vec::new());
        let reporter = |current: usize, total: usize, status: &str| {
            seen.lock().unwrap().push((current, total, status.to_string()));
        };

        let dyn_reporter: &dyn ProgressReporter = &reporter;
        dyn_reporter.report(1, 2, "Flash #1");
        dyn_reporter.report(2, 2, "Flash #2");

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1], (2, 2, "Flash #2".to_string()));
    }
}
