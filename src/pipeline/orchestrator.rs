//! Two-stage request processing.
//!
//! Global handlers run for every request, then the router picks a route and
//! that route's own stage runs. The first stop ends processing; nothing after
//! it executes.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::http::StatusCode;
use futures_util::FutureExt;
use serde_json::{json, Value};
use tokio::time::Instant;

use crate::context::{Abort, RequestContext};
use crate::pipeline::handler::{Flow, SharedHandler};
use crate::pipeline::stages::GlobalStage;
use crate::routing::{Route, Router};

/// What the caller should do with a processed request.
#[derive(Debug)]
pub enum Disposition {
    /// Every handler passed; forward to the route's backend group.
    Forward(Arc<Route>),
    /// A handler stopped the chain; write this response.
    Aborted(Abort),
}

impl Disposition {
    pub fn is_forward(&self) -> bool {
        matches!(self, Disposition::Forward(_))
    }
}

/// Runs the global stage, resolves the route and runs the route stage.
pub struct PipelineOrchestrator {
    global: GlobalStage,
    router: Router,
}

impl PipelineOrchestrator {
    pub fn new(global: GlobalStage, router: Router) -> Self {
        Self { global, router }
    }

    pub fn global(&self) -> &GlobalStage {
        &self.global
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub async fn process(&self, ctx: &mut RequestContext) -> Disposition {
        if let Some(abort) = ctx.abort_state() {
            return Disposition::Aborted(abort.clone());
        }

        if let Err(abort) = run_stage("global", self.global.handlers(), ctx).await {
            return Disposition::Aborted(abort);
        }

        let Some(route) = self.router.find(ctx.request()) else {
            tracing::debug!(
                request_id = %ctx.request_id(),
                method = %ctx.request().method,
                path = %ctx.request().path,
                "No route matched"
            );
            let abort = Abort::error(StatusCode::NOT_FOUND, "Not Found: no route matched");
            return Disposition::Aborted(stop(ctx, abort));
        };

        tracing::debug!(request_id = %ctx.request_id(), route = %route.id, "Route matched");
        ctx.set_route(route.clone());

        if let Err(abort) = run_stage("route", route.stage().handlers(), ctx).await {
            return Disposition::Aborted(abort);
        }

        Disposition::Forward(route)
    }

    pub fn describe(&self) -> Value {
        json!({
            "global": self.global.describe(),
            "routes": self.router.routes().iter().map(|r| r.snapshot()).collect::<Vec<_>>(),
        })
    }

    pub(crate) fn close(&self) {
        self.global.close();
        self.router.close();
    }
}

/// Record `abort` unless the context already holds one, and return whichever
/// abort the context ends up with.
fn stop(ctx: &mut RequestContext, abort: Abort) -> Abort {
    ctx.abort(abort.clone());
    ctx.abort_state().cloned().unwrap_or(abort)
}

async fn run_stage<'a>(
    stage: &'static str,
    handlers: impl Iterator<Item = (&'static str, &'a SharedHandler)>,
    ctx: &mut RequestContext,
) -> Result<(), Abort> {
    for (slot, handler) in handlers {
        if !handler.is_enabled() {
            tracing::trace!(stage, slot, handler = %handler.name(), "Handler disabled, skipping");
            continue;
        }

        if Instant::now() >= ctx.deadline() {
            tracing::warn!(
                request_id = %ctx.request_id(),
                stage,
                slot,
                "Request deadline exceeded before handler ran"
            );
            let abort = Abort::error(StatusCode::GATEWAY_TIMEOUT, "Gateway Timeout: request deadline exceeded");
            return Err(stop(ctx, abort));
        }

        let outcome = AssertUnwindSafe(handler.handle(ctx)).catch_unwind().await;
        match outcome {
            Ok(Flow::Continue) => {
                if let Some(abort) = ctx.abort_state() {
                    tracing::debug!(
                        request_id = %ctx.request_id(),
                        stage,
                        slot,
                        handler = %handler.name(),
                        status = abort.status.as_u16(),
                        "Handler aborted the context"
                    );
                    return Err(abort.clone());
                }
                tracing::trace!(stage, slot, handler = %handler.name(), "Handler passed");
            }
            Ok(Flow::Stop(abort)) => {
                tracing::debug!(
                    request_id = %ctx.request_id(),
                    stage,
                    slot,
                    handler = %handler.name(),
                    status = abort.status.as_u16(),
                    "Handler stopped the chain"
                );
                return Err(stop(ctx, abort));
            }
            Err(_) => {
                tracing::error!(
                    request_id = %ctx.request_id(),
                    stage,
                    slot,
                    handler = %handler.name(),
                    "Handler panicked"
                );
                ctx.push_error(format!("{}: internal error", handler.name()));
                return Err(stop(ctx, Abort::internal()));
            }
        }
    }
    Ok(())
}
