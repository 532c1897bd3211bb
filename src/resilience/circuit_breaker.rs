//! Circuit breaker for backend protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: backend assumed down, requests fail fast
//! - Half-Open: testing if backend recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= failure_threshold
//! Open → Half-Open: after recovery_timeout_secs
//! Half-Open → Closed: half_open_max_requests trial requests succeed
//! Half-Open → Open: any trial request fails
//! ```
//!
//! # Design Decisions
//! - One breaker per route (not global)
//! - Fail fast in Open state (no waiting for timeout)
//! - Admission hands out a `CircuitPermit`; the proxy records the upstream
//!   outcome through it, and an unrecorded permit frees its trial slot

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::context::{Abort, RequestContext};
use crate::error::{BuildError, BuildResult};
use crate::observability::metrics;
use crate::pipeline::{Flow, Handler};

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub name: String,
    pub enabled: bool,
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "circuit-breaker".to_string(),
            enabled: false,
            failure_threshold: 5,
            recovery_timeout_secs: 30,
            half_open_max_requests: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trials_in_flight: u32,
    trial_successes: u32,
}

#[derive(Debug)]
struct Core {
    config: CircuitBreakerConfig,
    /// Route id, used as the metric label.
    route: String,
    recovery_timeout: Duration,
    inner: Mutex<Inner>,
}

impl Core {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("circuit breaker mutex poisoned")
    }

    fn acquire(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let due = inner
                    .opened_at
                    .map_or(true, |at| at.elapsed() >= self.recovery_timeout);
                if !due {
                    return false;
                }
                tracing::info!(route = %self.route, "Circuit half-open, probing backend");
                inner.state = CircuitState::HalfOpen;
                inner.trials_in_flight = 1;
                inner.trial_successes = 0;
                true
            }
            CircuitState::HalfOpen => {
                if inner.trials_in_flight < self.config.half_open_max_requests {
                    inner.trials_in_flight += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
                inner.trial_successes += 1;
                if inner.trial_successes >= self.config.half_open_max_requests {
                    tracing::info!(route = %self.route, "Circuit closed");
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.opened_at = None;
                    inner.trials_in_flight = 0;
                }
            }
            CircuitState::Open => {}
        }
    }

    fn failure(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    tracing::warn!(
                        route = %self.route,
                        failures = inner.consecutive_failures,
                        "Circuit opened"
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!(route = %self.route, "Trial request failed, circuit re-opened");
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.trials_in_flight = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Give back a half-open slot whose request ended without an outcome.
    fn release(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
            tracing::debug!(route = %self.route, "Trial request abandoned, slot released");
        }
    }
}

/// Admission for one request through the breaker.
///
/// Report the upstream result with [`CircuitPermit::record`]. A permit
/// dropped without an outcome frees its half-open slot and counts as
/// neither success nor failure.
#[derive(Debug)]
#[must_use]
pub struct CircuitPermit {
    core: Arc<Core>,
    recorded: bool,
}

impl CircuitPermit {
    pub fn record(mut self, success: bool) {
        self.recorded = true;
        if success {
            self.core.success();
        } else {
            self.core.failure();
        }
    }
}

impl Drop for CircuitPermit {
    fn drop(&mut self) {
        if !self.recorded {
            self.core.release();
        }
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    core: Arc<Core>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig, route: impl Into<String>) -> BuildResult<Self> {
        if config.failure_threshold == 0 {
            return Err(BuildError::invalid(config.name.clone(), "failure_threshold", "must be positive"));
        }
        if config.half_open_max_requests == 0 {
            return Err(BuildError::invalid(
                config.name.clone(),
                "half_open_max_requests",
                "must be positive",
            ));
        }

        Ok(Self {
            core: Arc::new(Core {
                recovery_timeout: Duration::from_secs(config.recovery_timeout_secs),
                config,
                route: route.into(),
                inner: Mutex::new(Inner {
                    state: CircuitState::Closed,
                    consecutive_failures: 0,
                    opened_at: None,
                    trials_in_flight: 0,
                    trial_successes: 0,
                }),
            }),
        })
    }

    pub fn state(&self) -> CircuitState {
        self.core.lock().state
    }

    /// Admit or reject one request, moving Open → Half-Open when due.
    pub fn try_acquire(&self) -> Option<CircuitPermit> {
        self.core.acquire().then(|| CircuitPermit {
            core: self.core.clone(),
            recorded: false,
        })
    }

    pub fn record_success(&self) {
        self.core.success();
    }

    pub fn record_failure(&self) {
        self.core.failure();
    }
}

#[async_trait]
impl Handler for CircuitBreaker {
    fn name(&self) -> &str {
        &self.core.config.name
    }

    fn is_enabled(&self) -> bool {
        self.core.config.enabled
    }

    fn config(&self) -> Value {
        json!({
            "settings": self.core.config,
            "state": self.state().as_str(),
        })
    }

    async fn handle(&self, ctx: &mut RequestContext) -> Flow {
        if !self.core.config.enabled {
            return Flow::Continue;
        }
        if let Some(permit) = self.try_acquire() {
            ctx.set_circuit_permit(permit);
            return Flow::Continue;
        }

        let route = &self.core.route;
        tracing::debug!(request_id = %ctx.request_id(), route = %route, "Circuit open, failing fast");
        metrics::record_circuit_open(route);
        ctx.push_error(format!("circuit-breaker: {} open", route));
        Flow::Stop(Abort::error(
            StatusCode::SERVICE_UNAVAILABLE,
            "Service Unavailable: circuit open",
        ))
    }
}
