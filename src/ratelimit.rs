//! Per-identity request budget
//!
//! Token bucket: each identity starts with `capacity` tokens that refill
//! continuously over `refill_interval`. One chat turn costs one token.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Whole tokens left after this request
    pub remaining: u32,
    /// Seconds until at least one token is available again
    pub reset_in_secs: u64,
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// How often idle buckets are swept out of the map
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct Buckets {
    entries: HashMap<String, Bucket>,
    last_sweep: Instant,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Mutex<Buckets>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(Buckets {
                entries: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    /// Identities currently holding a bucket.
    pub async fn tracked_identities(&self) -> usize {
        self.buckets.lock().await.entries.len()
    }

    fn refill_per_sec(&self) -> f64 {
        let secs = self.config.refill_interval.as_secs_f64().max(f64::EPSILON);
        self.config.capacity as f64 / secs
    }

    /// Try to spend `requested` tokens for `identity`.
    pub async fn check(&self, identity: &str, requested: u32) -> RateDecision {
        self.check_at(identity, requested, Instant::now()).await
    }

    pub(crate) async fn check_at(&self, identity: &str, requested: u32, now: Instant) -> RateDecision {
        let capacity = self.config.capacity as f64;
        let rate = self.refill_per_sec();
        let mut buckets = self.buckets.lock().await;

        // A bucket refilled to capacity behaves exactly like a missing one.
        if now.saturating_duration_since(buckets.last_sweep) >= SWEEP_INTERVAL {
            let before = buckets.entries.len();
            buckets.entries.retain(|_, b| {
                let idle = now.saturating_duration_since(b.last_refill).as_secs_f64();
                b.tokens + idle * rate < capacity
            });
            buckets.last_sweep = now;
            debug!(evicted = before - buckets.entries.len(), "Swept idle rate limit buckets");
        }

        let bucket = buckets.entries.entry(identity.to_string()).or_insert(Bucket {
            tokens: capacity,
            last_refill: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * rate).min(capacity);
        bucket.last_refill = now;

        let cost = requested as f64;
        let allowed = bucket.tokens >= cost;
        if allowed {
            bucket.tokens -= cost;
        }

        let reset_in_secs = if bucket.tokens >= 1.0 || rate <= 0.0 {
            0
        } else {
            Duration::from_secs_f64((1.0 - bucket.tokens) / rate).as_secs().max(1)
        };

        let decision = RateDecision {
            allowed,
            remaining: bucket.tokens.floor() as u32,
            reset_in_secs,
        };

        if !allowed {
            warn!(
                identity,
                remaining = decision.remaining,
                reset_in_secs = decision.reset_in_secs,
                "RATE_LIMIT_EXCEEDED"
            );
        }

        decision
    }
}
