//! Configurable API gateway library.
//!
//! Requests pass a global handler stage, are matched to a route, pass that
//! route's handler stage and are then proxied to a backend group.

pub mod admin;
pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod pipeline;
pub mod resilience;
pub mod routing;
pub mod security;

pub use config::schema::GatewayConfig;
pub use context::{Abort, InboundRequest, RequestContext};
pub use error::{BuildError, BuildResult};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use pipeline::{Flow, Handler, Pipeline};
