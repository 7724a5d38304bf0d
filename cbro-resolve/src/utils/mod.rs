//! Utility modules

pub mod db_retry;
pub mod retry;

pub use db_retry::retry_on_lock;
pub use retry::{retry_with_backoff, RetryPolicy, Retryable};
