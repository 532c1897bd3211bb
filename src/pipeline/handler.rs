//! The unit of work every pipeline stage is made of.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::{Abort, RequestContext};
use crate::error::BuildResult;

/// Result of running one handler.
#[derive(Debug, Clone)]
pub enum Flow {
    /// Hand the request to the next handler.
    Continue,
    /// Terminate the chain and answer with this response.
    Stop(Abort),
}

impl Flow {
    pub fn is_continue(&self) -> bool {
        matches!(self, Flow::Continue)
    }
}

/// A handler in the request pipeline.
///
/// Handlers are built once from an immutable configuration snapshot and are
/// shared read-only between all requests. Side effects go through the
/// [`RequestContext`] only.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Display name used in logs and introspection.
    fn name(&self) -> &str;

    /// A disabled handler is skipped without side effects.
    fn is_enabled(&self) -> bool;

    /// Static configuration check. Called at build time, never per request.
    fn validate(&self) -> BuildResult<()> {
        Ok(())
    }

    /// Canonical configuration snapshot for introspection.
    fn config(&self) -> Value;

    async fn handle(&self, ctx: &mut RequestContext) -> Flow;

    /// Release held resources when the pipeline is retired.
    fn close(&self) -> BuildResult<()> {
        Ok(())
    }
}

pub type SharedHandler = Arc<dyn Handler>;

/// Introspection entry for one handler.
pub fn describe(handler: &dyn Handler) -> Value {
    serde_json::json!({
        "name": handler.name(),
        "enabled": handler.is_enabled(),
        "config": handler.config(),
    })
}
