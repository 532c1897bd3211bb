//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Store compiled routes together with their route-level handler stage
//! - Look up matching route for request
//! - Return matched route or explicit no-match
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - Ordered by priority (descending), ties keep declaration order
//! - O(n) scan (acceptable for typical route counts)
//! - Explicit NoMatch rather than silent default

use std::fmt;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::config::schema::RouteConfig;
use crate::context::InboundRequest;
use crate::error::{BuildError, BuildResult};
use crate::pipeline::stages::RouteStage;
use crate::routing::matcher::{
    AndMatcher, AssertionMatcher, HostMatcher, Matcher, MethodMatcher, PathMatcher,
};

/// A compiled route.
pub struct Route {
    pub id: String,
    pub priority: i32,
    pub backend_group: String,
    matcher: AndMatcher,
    stage: RouteStage,
    config: RouteConfig,
}

impl Route {
    pub fn from_config(config: &RouteConfig) -> BuildResult<Self> {
        let route_error = |reason: String| BuildError::Route {
            route: config.id.clone(),
            reason,
        };

        let mut matchers: Vec<Box<dyn Matcher>> = Vec::new();
        if let Some(host) = &config.host {
            matchers.push(Box::new(HostMatcher::new(host.clone())));
        }
        matchers.push(Box::new(
            PathMatcher::new(config.match_type, &config.path)
                .map_err(|e| route_error(format!("invalid path regex: {}", e)))?,
        ));
        if !config.methods.is_empty() {
            matchers.push(Box::new(MethodMatcher::new(&config.methods).map_err(route_error)?));
        }
        if let Some(assertions) = &config.assertions {
            matchers.push(Box::new(
                AssertionMatcher::new(assertions)
                    .map_err(|reason| route_error(format!("assertion: {}", reason)))?,
            ));
        }

        Ok(Self {
            id: config.id.clone(),
            priority: config.priority,
            backend_group: config.backend_group.clone(),
            matcher: AndMatcher::new(matchers),
            stage: RouteStage::from_config(config)?,
            config: config.clone(),
        })
    }

    /// A route with an explicit stage, for callers assembling handlers by hand.
    pub fn with_stage(config: &RouteConfig, stage: RouteStage) -> BuildResult<Self> {
        let mut route = Self::from_config(&RouteConfig {
            cors: None,
            security: None,
            rate_limit: None,
            auth: None,
            circuit_breaker: None,
            filters: Default::default(),
            ..config.clone()
        })?;
        route.stage = stage;
        route.config = config.clone();
        Ok(route)
    }

    pub fn matches(&self, req: &InboundRequest) -> bool {
        self.matcher.matches(req)
    }

    pub fn stage(&self) -> &RouteStage {
        &self.stage
    }

    pub fn config(&self) -> &RouteConfig {
        &self.config
    }

    /// Introspection snapshot: match rules plus the handler stage.
    pub fn snapshot(&self) -> Value {
        json!({
            "id": self.id,
            "path": self.config.path,
            "match_type": self.config.match_type,
            "methods": self.config.methods,
            "host": self.config.host,
            "priority": self.priority,
            "backend_group": self.backend_group,
            "assertions": self.config.assertions,
            "handlers": self.stage.describe(),
        })
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("backend_group", &self.backend_group)
            .field("matcher", &self.matcher)
            .finish()
    }
}

/// Immutable routing table.
#[derive(Debug, Default)]
pub struct Router {
    routes: Vec<Arc<Route>>,
}

impl Router {
    pub fn new(configs: &[RouteConfig]) -> BuildResult<Self> {
        let routes = configs
            .iter()
            .map(|c| Route::from_config(c).map(Arc::new))
            .collect::<BuildResult<Vec<_>>>()?;
        Ok(Self::from_routes(routes))
    }

    pub fn from_routes(mut routes: Vec<Arc<Route>>) -> Self {
        // Stable sort keeps declaration order among equal priorities.
        routes.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self { routes }
    }

    /// First matching route in priority order.
    pub fn find(&self, req: &InboundRequest) -> Option<Arc<Route>> {
        self.routes.iter().find(|r| r.matches(req)).cloned()
    }

    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    pub(crate) fn close(&self) {
        for route in &self.routes {
            route.stage.close();
        }
    }
}
