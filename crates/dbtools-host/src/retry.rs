//! Opt-in retry for transient handler faults.
//!
//! The host never retries on its own. A service that talks to a downstream
//! database wraps the fallible part of a handler in a [`RetryPolicy`] so a
//! connection severed mid-request gets one more chance.

use std::future::Future;

use tracing::warn;

use crate::error::HandlerError;

/// Attempts made by [`RetryPolicy::default`]
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    /// Policy making at most `max_attempts` attempts (at least one).
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// A single attempt.
    pub fn never() -> Self {
        Self::new(1)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `operation`, retrying while it fails with [`HandlerError::Transient`].
    ///
    /// Permanent failures are returned immediately; when attempts run out the
    /// last transient error is returned.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, HandlerError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, HandlerError>>,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    warn!(attempt, max_attempts = self.max_attempts, "Transient failure, retrying: {}", err);
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }
}
