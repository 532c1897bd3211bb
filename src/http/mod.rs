//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, fallback handler)
//!     → request.rs (request ID assigned or propagated)
//!     → Pipeline::process (global stage, routing, route stage)
//!     → load balancer picks a backend, hyper client forwards
//!     → response.rs (abort conversion, header merge, hop-by-hop strip)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{RequestId, RequestIdExt, RequestIdLayer, X_REQUEST_ID};
pub use server::{AppState, HttpServer};
