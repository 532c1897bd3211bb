//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Route stage:
//!     → circuit_breaker.rs (fail fast while the route's backend is open)
//! After proxying:
//!     → CircuitPermit::record (5xx, transport error, timeout or no backend = failure)
//!     → permit dropped unrecorded (client gone) releases the trial slot
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every upstream call runs under the request deadline
//! - Circuit breaker prevents cascading failures

pub mod circuit_breaker;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitPermit, CircuitState};
