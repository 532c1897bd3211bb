//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request (host, method, path, headers, query, cookies, address)
//!     → router.rs (route lookup in priority order)
//!     → matcher.rs (host, path, methods, assertion group)
//!     → Return: matched Route (with its handler stage) or NoMatch
//!
//! Route Compilation (at startup and on reload):
//!     RouteConfig[]
//!     → Compile matchers and build the route stage
//!     → Sort by priority
//!     → Freeze as immutable Router
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - Deterministic: same input always matches same route
//! - First match wins (ordered by priority)

pub mod matcher;
pub mod router;

pub use matcher::{AssertionGroupConfig, AssertionMode, MatchType, PredicateConfig, PredicateSource};
pub use router::{Route, Router};
