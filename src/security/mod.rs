//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Request context:
//!     → engine.rs (IP → User-Agent → API → Domain, first denial wins)
//!         each dimension: pre-check → blacklist → whitelist → default policy
//!     → cors.rs (origin check, preflight answered in place)
//!     → rate_limit.rs (token bucket per user or client IP)
//! ```
//!
//! # Design Decisions
//! - Blacklist always beats whitelist, whitelist always beats default policy
//! - Fail closed: any enabled check that cannot allow the request denies it
//! - Patterns are compiled once at build time; invalid entries refuse start
//! - No trust in client input beyond the configured forwarding headers

pub mod api;
pub mod cors;
pub mod domain;
pub mod engine;
pub mod ip;
pub mod patterns;
pub mod policy;
pub mod rate_limit;
pub mod user_agent;

pub use cors::{CorsConfig, CorsHandler};
pub use engine::{SecurityConfig, SecurityPolicyEngine};
pub use policy::{DefaultPolicy, Decision, Verdict};
pub use rate_limit::{RateLimitConfig, RateLimiter};
