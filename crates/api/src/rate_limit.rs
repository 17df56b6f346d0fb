//! In-process sliding-window rate limiter.
//!
//! Counters live in process memory and are consulted by write paths before
//! they reach the engine. Horizontal scaling needs a shared limiter; this
//! one is deliberately per-instance.

use garl_core::CoreError;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Operation classes with their own limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateTier {
    /// General reads and miscellaneous writes.
    Default,
    /// Single trace submission.
    Write,
    /// Batch trace submission.
    Batch,
    /// Agent registration (keyed by client address).
    Register,
    /// Auto-registration (keyed by client address).
    AutoRegister,
}

impl RateTier {
    /// `(max requests, window)` for this tier.
    fn limits(&self) -> (u32, Duration) {
        match self {
            RateTier::Default => (120, Duration::from_secs(60)),
            RateTier::Write => (20, Duration::from_secs(60)),
            RateTier::Batch => (10, Duration::from_secs(60)),
            RateTier::Register => (5, Duration::from_secs(60)),
            RateTier::AutoRegister => (3, Duration::from_secs(300)),
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            RateTier::Default => "default",
            RateTier::Write => "write",
            RateTier::Batch => "batch",
            RateTier::Register => "register",
            RateTier::AutoRegister => "auto_register",
        }
    }
}

const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

/// Sliding-window counters keyed by `(tier, caller key)`.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: Mutex<Buckets>,
}

#[derive(Debug)]
struct Buckets {
    store: HashMap<String, Vec<Instant>>,
    last_cleanup: Instant,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    /// Create an empty limiter.
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(Buckets {
                store: HashMap::new(),
                last_cleanup: Instant::now(),
            }),
        }
    }

    /// Record one request for `key` under `tier`.
    ///
    /// Returns `RateLimited` without recording when the window is full.
    pub fn check(&self, key: &str, tier: RateTier) -> Result<(), CoreError> {
        let (limit, window) = tier.limits();
        let now = Instant::now();
        let bucket_key = format!("{}:{}", tier.as_str(), key);

        let mut buckets = self.buckets.lock().expect("rate limiter poisoned");

        if now.duration_since(buckets.last_cleanup) > CLEANUP_INTERVAL {
            buckets
                .store
                .retain(|_, hits| hits.last().is_some_and(|t| now.duration_since(*t) < window.max(Duration::from_secs(120))));
            buckets.last_cleanup = now;
        }

        let hits = buckets.store.entry(bucket_key).or_default();
        hits.retain(|t| now.duration_since(*t) < window);

        if hits.len() >= limit as usize {
            let oldest = hits.iter().min().copied().unwrap_or(now);
            let retry_after = window
                .saturating_sub(now.duration_since(oldest))
                .as_secs()
                + 1;
            return Err(CoreError::RateLimited {
                limit,
                window_secs: window.as_secs(),
                retry_after_secs: retry_after,
            });
        }

        hits.push(now);
        Ok(())
    }
}
