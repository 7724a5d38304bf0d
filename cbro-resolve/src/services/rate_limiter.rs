//! Sliding-window request throttle
//!
//! Dual gate in front of every outbound catalog call:
//! 1. Minimum interval since the last admitted request
//! 2. At most `max_requests` admissions in any trailing `window`
//!
//! The window state lives behind one `tokio::sync::Mutex` that is held while
//! a caller waits for admission. Waiters queue on the lock and are admitted
//! one at a time, so concurrent callers can never jointly exceed either gate.
//! Uses `tokio::time::Instant` so a paused test clock drives it.

use cbro_common::config::RateLimitSettings;
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Admission wait was aborted by the caller's cancellation signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Rate limiter wait cancelled")]
pub struct Cancelled;

/// Admitted request timestamps within the trailing window
#[derive(Debug, Default)]
struct RateWindow {
    admitted: VecDeque<Instant>,
    last: Option<Instant>,
    total: u64,
}

impl RateWindow {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.admitted.front() {
            if now.duration_since(*oldest) >= window {
                self.admitted.pop_front();
            } else {
                break;
            }
        }
    }

    /// Time until both gates open (zero when admissible now)
    fn wait_needed(&self, now: Instant, limits: &Limits) -> Duration {
        let interval_wait = self
            .last
            .map(|last| limits.min_interval.saturating_sub(now.duration_since(last)))
            .unwrap_or(Duration::ZERO);

        let window_wait = if self.admitted.len() >= limits.max_requests {
            self.admitted
                .front()
                .map(|oldest| limits.window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(Duration::ZERO)
        } else {
            Duration::ZERO
        };

        interval_wait.max(window_wait)
    }
}

#[derive(Debug, Clone, Copy)]
struct Limits {
    max_requests: usize,
    window: Duration,
    min_interval: Duration,
}

/// Process-wide throttle shared by every catalog call
#[derive(Debug)]
pub struct RateLimiter {
    limits: Limits,
    state: Mutex<RateWindow>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration, min_interval: Duration) -> Self {
        Self {
            limits: Limits {
                max_requests: max_requests.max(1) as usize,
                window,
                min_interval,
            },
            state: Mutex::new(RateWindow::default()),
        }
    }

    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        Self::new(
            settings.max_requests,
            settings.window(),
            settings.min_interval(),
        )
    }

    /// Wait until a request may be sent, then record it
    ///
    /// Never fails except through `cancel`; a cancelled wait records nothing.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }

        let mut window = tokio::select! {
            guard = self.state.lock() => guard,
            _ = cancel.cancelled() => return Err(Cancelled),
        };

        loop {
            let now = Instant::now();
            window.prune(now, self.limits.window);

            let wait = window.wait_needed(now, &self.limits);
            if wait.is_zero() {
                window.admitted.push_back(now);
                window.last = Some(now);
                window.total += 1;
                return Ok(());
            }

            tracing::debug!(wait_ms = wait.as_millis() as u64, "Rate limiting: waiting {:?}", wait);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel.cancelled() => return Err(Cancelled),
            }
        }
    }

    /// Admissions still available in the current window
    pub async fn remaining_requests(&self) -> usize {
        let mut window = self.state.lock().await;
        window.prune(Instant::now(), self.limits.window);
        self.limits.max_requests.saturating_sub(window.admitted.len())
    }

    /// Requests admitted since creation
    pub async fn requests_made(&self) -> u64 {
        self.state.lock().await.total
    }

    /// Time until the oldest admission leaves the window
    pub async fn time_until_reset(&self) -> Duration {
        let mut window = self.state.lock().await;
        let now = Instant::now();
        window.prune(now, self.limits.window);
        window
            .admitted
            .front()
            .map(|oldest| self.limits.window.saturating_sub(now.duration_since(*oldest)))
            .unwrap_or(Duration::ZERO)
    }
}
