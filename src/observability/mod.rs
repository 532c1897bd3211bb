//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Pipeline handlers and the HTTP layer produce:
//!     → logging.rs (structured tracing events, request id on every line)
//!     → metrics.rs (counters and histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Prometheus scrape endpoint
//! ```

pub mod logging;
pub mod metrics;
