//! Rate limiter that also reports how long a throttled client should wait.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use super::clock::SystemClock;
use super::counter::RetryAfterStore;
use super::limiter::RateLimiter;
use super::request::RequestEvent;
use crate::error::Result;

/// A limiting decision with a `Retry-After` value in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryAfterDecision {
    pub limited: bool,
    pub retry_after_secs: u64,
}

/// Wraps a [`RateLimiter`] and remembers when each limited key resets.
#[derive(Debug)]
pub struct RetryAfterRateLimiter {
    limiter: RateLimiter,
    resets: RetryAfterStore,
}

impl RetryAfterRateLimiter {
    /// Wrap a limiter, tracking resets on the system clock.
    pub fn new(limiter: RateLimiter) -> Self {
        Self::with_store(limiter, RetryAfterStore::with_clock(None, Arc::new(SystemClock)))
    }

    /// Wrap a limiter with an explicit reset store.
    pub fn with_store(limiter: RateLimiter, resets: RetryAfterStore) -> Self {
        Self { limiter, resets }
    }

    /// Evaluate a request and compute its retry-after.
    ///
    /// A limited decision without a counter key (rejected or unidentified
    /// client) waits one full window.
    pub fn check(&self, event: &mut RequestEvent) -> Result<RetryAfterDecision> {
        let decision = self.limiter.check(event)?;
        if !decision.limited {
            return Ok(RetryAfterDecision {
                limited: false,
                retry_after_secs: 0,
            });
        }

        let wait = match &decision.hash {
            Some(key) => {
                let reset = self.resets.reset_at(key, decision.window_ms);
                reset.saturating_duration_since(self.resets.now())
            }
            None => Duration::from_millis(decision.window_ms),
        };

        Ok(RetryAfterDecision {
            limited: true,
            // Rounded up so a client that waits is past the reset
            retry_after_secs: wait.as_millis().div_ceil(1000) as u64,
        })
    }

    /// Ensure the client holds a limiter cookie. See [`RateLimiter::preflight`].
    pub fn preflight(&self, event: &mut RequestEvent) -> Result<String> {
        self.limiter.preflight(event)
    }

    /// Clear all counters and remembered resets.
    pub fn clear(&self) -> Result<()> {
        self.resets.clear();
        self.limiter.clear()
    }

    /// The wrapped limiter.
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }
}
