use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;
use crate::{
    config::RateLimitConfig,
    error::{ComplianceError, Result},
};

/// Outcome of a rate limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Rejected { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

/// Sliding-window limiter keyed by caller or outbound target.
///
/// Each key keeps a log of `(instant, cost)` entries younger than the
/// window. The prune, sum, and record steps run under one lock, so two
/// concurrent callers can never both pass a check that only had room for one.
pub struct SlidingWindowLimiter {
    limit: u32,
    window: Duration,
    entries: Mutex<HashMap<String, VecDeque<(Instant, u32)>>>,
}

impl SlidingWindowLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Check and, when allowed, record `cost` units against `key`
    pub fn check(&self, key: &str, cost: u32) -> RateDecision {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let log = entries.entry(key.to_string()).or_default();

        while let Some(&(at, _)) = log.front() {
            if now.duration_since(at) >= self.window {
                log.pop_front();
            } else {
                break;
            }
        }

        // A request larger than the whole window can never pass
        if cost > self.limit {
            return RateDecision::Rejected { retry_after: self.window };
        }

        let used: u32 = log.iter().map(|(_, c)| *c).sum();
        if used + cost <= self.limit {
            log.push_back((now, cost));
            return RateDecision::Allowed { remaining: self.limit - used - cost };
        }

        let needed = used + cost - self.limit;
        let mut freed = 0;
        for (at, c) in log.iter() {
            freed += c;
            if freed >= needed {
                let age = now.duration_since(*at);
                return RateDecision::Rejected {
                    retry_after: self.window.saturating_sub(age),
                };
            }
        }

        RateDecision::Rejected { retry_after: self.window }
    }

    /// Wait until `cost` units fit, giving up once `max_wait` would be exceeded.
    ///
    /// Returns the remaining budget on success and the last retry hint on failure.
    pub async fn acquire(&self, key: &str, cost: u32, max_wait: Duration) -> std::result::Result<u32, Duration> {
        let deadline = Instant::now() + max_wait;

        loop {
            match self.check(key, cost) {
                RateDecision::Allowed { remaining } => return Ok(remaining),
                RateDecision::Rejected { retry_after } => {
                    if cost > self.limit || Instant::now() + retry_after > deadline {
                        return Err(retry_after);
                    }
                    debug!("{} waiting {:?} for rate limit window", key, retry_after);
                    tokio::time::sleep(retry_after.max(Duration::from_millis(1))).await;
                }
            }
        }
    }

    /// Drop keys whose logs have fully expired
    pub fn purge_idle(&self) {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|_, log| {
            log.back()
                .map(|(at, _)| now.duration_since(*at) < self.window)
                .unwrap_or(false)
        });
    }
}

/// The two independent limiting scopes
pub struct RateLimiters {
    pub inbound: Arc<SlidingWindowLimiter>,
    pub outbound: Arc<SlidingWindowLimiter>,
    pub outbound_max_wait: Duration,
}

impl RateLimiters {
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self {
            inbound: Arc::new(SlidingWindowLimiter::new(
                config.inbound.limit,
                Duration::from_secs(config.inbound.window_secs),
            )),
            outbound: Arc::new(SlidingWindowLimiter::new(
                config.outbound.limit,
                Duration::from_secs(config.outbound.window_secs),
            )),
            outbound_max_wait: Duration::from_millis(config.outbound.max_wait_ms),
        }
    }

    /// Charge an inbound caller, surfacing rejection as its own error kind
    pub fn check_inbound(&self, api_key: &str, cost: u32) -> Result<u32> {
        let key = format!("inbound:{}", api_key);
        match self.inbound.check(&key, cost) {
            RateDecision::Allowed { remaining } => Ok(remaining),
            RateDecision::Rejected { retry_after } => Err(ComplianceError::RateLimited {
                scope: "inbound".to_string(),
                key,
                retry_after_ms: retry_after.as_millis() as u64,
            }),
        }
    }
}
