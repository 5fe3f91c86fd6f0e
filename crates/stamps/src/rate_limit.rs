use std::collections::HashMap;
use std::time::Instant;

use parking_lot::RwLock;

use crate::config::RateLimitConfig;
use crate::error::StampError;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_update: Instant,
}

/// Per-user token bucket for stamp submissions.
///
/// A user may burst up to `max_stamps` and then earns tokens back at
/// `max_stamps / window`.
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: RwLock<HashMap<String, BucketState>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn capacity(&self) -> f64 {
        self.config.max_stamps.max(1) as f64
    }

    fn refill_per_sec(&self) -> f64 {
        self.capacity() / self.config.window.as_secs_f64().max(1e-3)
    }

    /// Take one token for `user`.
    pub fn try_acquire(&self, user: &str, now: Instant) -> Result<(), StampError> {
        let capacity = self.capacity();
        let rate = self.refill_per_sec();
        let mut buckets = self.buckets.write();

        let state = buckets.entry(user.to_string()).or_insert(BucketState {
            tokens: capacity,
            last_update: now,
        });

        let elapsed = now.saturating_duration_since(state.last_update).as_secs_f64();
        state.tokens = (state.tokens + elapsed * rate).min(capacity);
        state.last_update = state.last_update.max(now);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(())
        } else {
            let window = self.config.window.as_secs_f64();
            let retry_after_secs =
                ((1.0 - state.tokens) * window / capacity).ceil().max(1.0) as u64;
            Err(StampError::RateLimited { retry_after_secs })
        }
    }

    /// Give back a token taken for a stamp that was never committed.
    pub fn refund(&self, user: &str) {
        let capacity = self.capacity();
        if let Some(state) = self.buckets.write().get_mut(user) {
            state.tokens = (state.tokens + 1.0).min(capacity);
        }
    }

    /// Forget users whose bucket has refilled completely.
    pub fn prune(&self, now: Instant) {
        let capacity = self.capacity();
        let rate = self.refill_per_sec();
        self.buckets.write().retain(|_, state| {
            let elapsed = now.saturating_duration_since(state.last_update).as_secs_f64();
            state.tokens + elapsed * rate < capacity
        });
    }

    pub fn tracked_users(&self) -> usize {
        self.buckets.read().len()
    }
}
