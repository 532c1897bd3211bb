//! Request pipeline.
//!
//! # Data Flow
//! ```text
//! RequestContext
//!     → GlobalStage: security → cors → auth → rate_limit
//!     → Router::find (404 when nothing matches)
//!     → RouteStage: cors → security → rate_limit → auth → circuit_breaker → filters
//!     → Disposition::Forward(route) | Disposition::Aborted(abort)
//! ```
//!
//! # Design Decisions
//! - A `Pipeline` is built whole from a validated config and never mutated;
//!   reload builds a new one and swaps the reference
//! - Handlers report per-request failures as `Flow::Stop`, never `Err`
//! - The backend pool lives with the pipeline so routes and groups change together

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde_json::Value;

use crate::config::GatewayConfig;
use crate::context::RequestContext;
use crate::error::{BuildError, BuildResult};
use crate::load_balancer::BackendManager;
use crate::observability::metrics;
use crate::routing::Router;

pub mod filters;
pub mod handler;
pub mod orchestrator;
pub mod stages;

pub use filters::{FilterChain, FilterConfig};
pub use handler::{Flow, Handler, SharedHandler};
pub use orchestrator::{Disposition, PipelineOrchestrator};
pub use stages::{GlobalSlot, GlobalStage, RouteSlot, RouteStage};

/// One immutable generation of handlers, routes and backends.
pub struct Pipeline {
    orchestrator: PipelineOrchestrator,
    backends: BackendManager,
}

impl Pipeline {
    pub fn new(orchestrator: PipelineOrchestrator, backends: BackendManager) -> Self {
        Self { orchestrator, backends }
    }

    /// Build every handler the config names.
    ///
    /// Any construction or `validate()` failure refuses the whole pipeline.
    pub fn from_config(config: &GatewayConfig) -> BuildResult<Self> {
        let global = GlobalStage::from_config(&config.global)?;
        let router = Router::new(&config.routes)?;
        let backends = BackendManager::new(&config.backends)?;

        for (_, handler) in global.handlers() {
            handler.validate()?;
        }
        for route in router.routes() {
            if !backends.has_group(&route.backend_group) {
                return Err(BuildError::Route {
                    route: route.id.clone(),
                    reason: format!("unknown backend group `{}`", route.backend_group),
                });
            }
            for (_, handler) in route.stage().handlers() {
                handler.validate()?;
            }
        }

        tracing::info!(
            global_handlers = global.handlers().count(),
            routes = router.routes().len(),
            backends = config.backends.len(),
            "Pipeline built"
        );

        Ok(Self::new(PipelineOrchestrator::new(global, router), backends))
    }

    pub async fn process(&self, ctx: &mut RequestContext) -> Disposition {
        self.orchestrator.process(ctx).await
    }

    pub fn orchestrator(&self) -> &PipelineOrchestrator {
        &self.orchestrator
    }

    pub fn router(&self) -> &Router {
        self.orchestrator.router()
    }

    pub fn backends(&self) -> &BackendManager {
        &self.backends
    }

    pub fn describe(&self) -> Value {
        let mut snapshot = self.orchestrator.describe();
        snapshot["backends"] = self.backends.snapshot();
        snapshot
    }

    /// Release resources held by every handler. Called once the pipeline has
    /// been swapped out.
    pub fn close(&self) {
        self.orchestrator.close();
        tracing::debug!("Pipeline closed");
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("routes", &self.router().routes().len())
            .field("backends", &self.backends)
            .finish()
    }
}

/// Shared handle used by the server and the admin API.
pub type SharedPipeline = Arc<ArcSwap<Pipeline>>;

pub fn shared(pipeline: Pipeline) -> SharedPipeline {
    Arc::new(ArcSwap::from_pointee(pipeline))
}

/// Build a pipeline from `config` and swap it in.
///
/// On error the running pipeline stays untouched. In-flight requests keep
/// the generation they loaded; the old one is closed after the swap.
pub fn reload(current: &SharedPipeline, config: &GatewayConfig) -> BuildResult<()> {
    let next = match Pipeline::from_config(config) {
        Ok(next) => next,
        Err(e) => {
            metrics::record_pipeline_reload("rejected");
            tracing::error!(error = %e, "Pipeline rebuild failed, keeping current pipeline");
            return Err(e);
        }
    };
    let previous = current.swap(Arc::new(next));
    previous.close();
    metrics::record_pipeline_reload("applied");
    tracing::info!("Pipeline reloaded");
    Ok(())
}
