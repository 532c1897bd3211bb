//! Token-bucket rate limiting as a pipeline handler.
//!
//! Buckets are keyed by the authenticated `user_id` fact when one exists,
//! otherwise by client IP, so limits follow identities across addresses.
//! Forwarding headers count only when the config trusts them. A bucket idle
//! long enough to refill completely is evicted, since a fresh one is identical.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::http::{header, HeaderValue, StatusCode};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::api_key::ANONYMOUS_USER;
use crate::context::{keys, Abort, RequestContext};
use crate::error::{BuildError, BuildResult};
use crate::observability::metrics;
use crate::pipeline::{Flow, Handler};
use crate::security::ip::client_ip;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    pub name: String,
    pub enabled: bool,
    /// Sustained refill rate.
    pub requests_per_second: u32,
    /// Bucket capacity.
    pub burst_size: u32,
    /// Key anonymous clients by `X-Forwarded-For` instead of the socket address.
    pub trust_forwarded_for: bool,
    pub trust_real_ip: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            name: "rate-limit".to_string(),
            enabled: false,
            requests_per_second: 100,
            burst_size: 200,
            trust_forwarded_for: false,
            trust_real_ip: false,
        }
    }
}

/// A simple token bucket.
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

pub struct RateLimiter {
    config: RateLimitConfig,
    /// Metric label; `global` or the route id.
    scope: String,
    buckets: DashMap<String, TokenBucket>,
    /// Time for an empty bucket to refill.
    idle_after: Duration,
    last_sweep: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, scope: impl Into<String>) -> BuildResult<Self> {
        if config.requests_per_second == 0 {
            return Err(BuildError::invalid(
                config.name.clone(),
                "requests_per_second",
                "must be positive",
            ));
        }
        if config.burst_size == 0 {
            return Err(BuildError::invalid(config.name.clone(), "burst_size", "must be positive"));
        }

        let idle_after =
            Duration::from_secs_f64(config.burst_size as f64 / config.requests_per_second as f64);
        Ok(Self {
            config,
            scope: scope.into(),
            buckets: DashMap::new(),
            idle_after,
            last_sweep: Mutex::new(Instant::now()),
        })
    }

    /// Take one token for `key`.
    pub fn check(&self, key: &str) -> bool {
        let capacity = self.config.burst_size as f64;
        let rate = self.config.requests_per_second as f64;

        self.maybe_sweep();

        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(capacity));
        bucket.try_acquire(capacity, rate)
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Drop buckets that have had time to refill completely.
    pub fn evict_idle(&self) {
        let idle_after = self.idle_after;
        self.buckets.retain(|_, bucket| bucket.last_update.elapsed() < idle_after);
    }

    fn maybe_sweep(&self) {
        // Another caller already sweeping is good enough.
        let Ok(mut last) = self.last_sweep.try_lock() else {
            return;
        };
        if last.elapsed() < self.idle_after.max(Duration::from_secs(1)) {
            return;
        }
        *last = Instant::now();
        drop(last);
        self.evict_idle();
    }

    fn key(&self, ctx: &RequestContext) -> String {
        match ctx.fact_str(keys::USER_ID).filter(|user| *user != ANONYMOUS_USER) {
            Some(user) => format!("user:{}", user),
            None => format!(
                "ip:{}",
                client_ip(ctx.request(), self.config.trust_forwarded_for, self.config.trust_real_ip)
            ),
        }
    }
}

#[async_trait]
impl Handler for RateLimiter {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn config(&self) -> Value {
        serde_json::to_value(&self.config).unwrap_or(Value::Null)
    }

    async fn handle(&self, ctx: &mut RequestContext) -> Flow {
        if !self.config.enabled {
            return Flow::Continue;
        }

        let key = self.key(ctx);
        if self.check(&key) {
            return Flow::Continue;
        }

        tracing::warn!(
            request_id = %ctx.request_id(),
            client = %key,
            scope = %self.scope,
            "Rate limit exceeded"
        );
        metrics::record_rate_limited(&self.scope);
        ctx.push_error(format!("rate-limit: {} exceeded", key));
        Flow::Stop(
            Abort::error(StatusCode::TOO_MANY_REQUESTS, "Too Many Requests: rate limit exceeded")
                .with_header(header::RETRY_AFTER, HeaderValue::from_static("1")),
        )
    }
}
