//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Pipeline passed → route.backend_group identified
//!     → pool.rs (get the group's backends)
//!     → round_robin.rs (rotate through backends below their limit)
//!     → backend.rs (connection guard held for the upstream call)
//!     → Return guard, or None → 503
//! ```
//!
//! # Design Decisions
//! - Load balancer is stateless apart from its cursor; backends track connections
//! - One manager per pipeline generation, swapped with it on reload
//! - Backends at `max_connections` are skipped

use std::fmt::Debug;
use std::sync::Arc;

pub mod backend;
pub mod pool;
pub mod round_robin;

pub use backend::{Backend, BackendConnectionGuard};
pub use pool::BackendManager;
pub use round_robin::RoundRobin;

/// Picks the next backend of a group.
pub trait LoadBalancer: Send + Sync + Debug {
    fn next_server(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>>;
}
