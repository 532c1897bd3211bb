//! Fixed-order handler stages.
//!
//! The slot enums fix the order; a stage can only be assembled through its
//! builder, which sorts whatever slots were filled into that order.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::auth::AuthenticatorFactory;
use crate::config::schema::{GlobalConfig, RouteConfig};
use crate::error::BuildResult;
use crate::pipeline::filters::FilterChain;
use crate::pipeline::handler::{describe, SharedHandler};
use crate::resilience::CircuitBreaker;
use crate::security::{CorsHandler, RateLimiter, SecurityPolicyEngine};

/// Global handler slots, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum GlobalSlot {
    Security,
    Cors,
    Auth,
    RateLimit,
}

/// Route handler slots, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RouteSlot {
    Cors,
    Security,
    RateLimit,
    Auth,
    CircuitBreaker,
    Filters,
}

impl GlobalSlot {
    pub fn as_str(&self) -> &'static str {
        match self {
            GlobalSlot::Security => "security",
            GlobalSlot::Cors => "cors",
            GlobalSlot::Auth => "auth",
            GlobalSlot::RateLimit => "rate_limit",
        }
    }
}

impl RouteSlot {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteSlot::Cors => "cors",
            RouteSlot::Security => "security",
            RouteSlot::RateLimit => "rate_limit",
            RouteSlot::Auth => "auth",
            RouteSlot::CircuitBreaker => "circuit_breaker",
            RouteSlot::Filters => "filters",
        }
    }
}

/// Handlers applied to every request before routing.
#[derive(Default)]
pub struct GlobalStage {
    handlers: Vec<(GlobalSlot, SharedHandler)>,
}

impl GlobalStage {
    pub fn builder() -> GlobalStageBuilder {
        GlobalStageBuilder::default()
    }

    pub fn from_config(config: &GlobalConfig) -> BuildResult<Self> {
        let mut builder = Self::builder();
        if let Some(security) = &config.security {
            builder = builder.with(GlobalSlot::Security, Arc::new(SecurityPolicyEngine::new(security.clone())?));
        }
        if let Some(cors) = &config.cors {
            builder = builder.with(GlobalSlot::Cors, Arc::new(CorsHandler::new(cors.clone())?));
        }
        if let Some(auth) = &config.auth {
            builder = builder.with(GlobalSlot::Auth, Arc::new(AuthenticatorFactory::build(auth)?));
        }
        if let Some(rate_limit) = &config.rate_limit {
            builder = builder.with(
                GlobalSlot::RateLimit,
                Arc::new(RateLimiter::new(rate_limit.clone(), "global")?),
            );
        }
        Ok(builder.build())
    }

    pub fn handlers(&self) -> impl Iterator<Item = (&'static str, &SharedHandler)> {
        self.handlers.iter().map(|(slot, h)| (slot.as_str(), h))
    }

    pub fn describe(&self) -> Value {
        Value::Array(
            self.handlers
                .iter()
                .map(|(slot, h)| json!({ "slot": slot.as_str(), "handler": describe(h.as_ref()) }))
                .collect(),
        )
    }
}

#[derive(Default)]
pub struct GlobalStageBuilder {
    handlers: Vec<(GlobalSlot, SharedHandler)>,
}

impl GlobalStageBuilder {
    /// Fill a slot, replacing any handler already there.
    pub fn with(mut self, slot: GlobalSlot, handler: SharedHandler) -> Self {
        self.handlers.retain(|(s, _)| *s != slot);
        self.handlers.push((slot, handler));
        self
    }

    pub fn build(mut self) -> GlobalStage {
        self.handlers.sort_by_key(|(slot, _)| *slot);
        GlobalStage {
            handlers: self.handlers,
        }
    }
}

/// Handlers applied after a route matched.
#[derive(Default)]
pub struct RouteStage {
    handlers: Vec<(RouteSlot, SharedHandler)>,
    breaker: Option<Arc<CircuitBreaker>>,
    filters: Option<Arc<FilterChain>>,
}

impl RouteStage {
    pub fn builder() -> RouteStageBuilder {
        RouteStageBuilder::default()
    }

    pub fn from_config(route: &RouteConfig) -> BuildResult<Self> {
        let mut builder = Self::builder();
        if let Some(cors) = &route.cors {
            builder = builder.with(RouteSlot::Cors, Arc::new(CorsHandler::new(cors.clone())?));
        }
        if let Some(security) = &route.security {
            builder = builder.with(
                RouteSlot::Security,
                Arc::new(SecurityPolicyEngine::new(security.clone())?),
            );
        }
        if let Some(rate_limit) = &route.rate_limit {
            builder = builder.with(
                RouteSlot::RateLimit,
                Arc::new(RateLimiter::new(rate_limit.clone(), route.id.clone())?),
            );
        }
        if let Some(auth) = &route.auth {
            builder = builder.with(RouteSlot::Auth, Arc::new(AuthenticatorFactory::build(auth)?));
        }
        if let Some(breaker) = &route.circuit_breaker {
            builder = builder.circuit_breaker(Arc::new(CircuitBreaker::new(breaker.clone(), route.id.clone())?));
        }
        if !route.filters.is_empty() {
            builder = builder.filters(Arc::new(FilterChain::new(
                format!("{}-filters", route.id),
                route.filters.clone(),
            )?));
        }
        Ok(builder.build())
    }

    pub fn handlers(&self) -> impl Iterator<Item = (&'static str, &SharedHandler)> {
        self.handlers.iter().map(|(slot, h)| (slot.as_str(), h))
    }

    /// The route's breaker, for inspecting its state.
    pub fn circuit_breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.breaker.as_ref()
    }

    /// The route's filters, for post-filtering upstream responses.
    pub fn filters(&self) -> Option<&Arc<FilterChain>> {
        self.filters.as_ref()
    }

    pub fn describe(&self) -> Value {
        Value::Array(
            self.handlers
                .iter()
                .map(|(slot, h)| json!({ "slot": slot.as_str(), "handler": describe(h.as_ref()) }))
                .collect(),
        )
    }

    pub(crate) fn close(&self) {
        for (slot, handler) in &self.handlers {
            if let Err(e) = handler.close() {
                tracing::warn!(slot = slot.as_str(), handler = %handler.name(), error = %e, "Handler close failed");
            }
        }
    }
}

impl GlobalStage {
    pub(crate) fn close(&self) {
        for (slot, handler) in &self.handlers {
            if let Err(e) = handler.close() {
                tracing::warn!(slot = slot.as_str(), handler = %handler.name(), error = %e, "Handler close failed");
            }
        }
    }
}

#[derive(Default)]
pub struct RouteStageBuilder {
    handlers: Vec<(RouteSlot, SharedHandler)>,
    breaker: Option<Arc<CircuitBreaker>>,
    filters: Option<Arc<FilterChain>>,
}

impl RouteStageBuilder {
    /// Fill a slot, replacing any handler already there.
    pub fn with(mut self, slot: RouteSlot, handler: SharedHandler) -> Self {
        self.handlers.retain(|(s, _)| *s != slot);
        self.handlers.push((slot, handler));
        self
    }

    pub fn circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker.clone());
        self.with(RouteSlot::CircuitBreaker, breaker)
    }

    pub fn filters(mut self, filters: Arc<FilterChain>) -> Self {
        self.filters = Some(filters.clone());
        self.with(RouteSlot::Filters, filters)
    }

    pub fn build(mut self) -> RouteStage {
        self.handlers.sort_by_key(|(slot, _)| *slot);
        RouteStage {
            handlers: self.handlers,
            breaker: self.breaker,
            filters: self.filters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RequestContext;
    use crate::pipeline::{Flow, Handler};
    use async_trait::async_trait;

    struct Named(&'static str);

    #[async_trait]
    impl Handler for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn is_enabled(&self) -> bool {
            true
        }
        fn config(&self) -> Value {
            Value::Null
        }
        async fn handle(&self, _ctx: &mut RequestContext) -> Flow {
            Flow::Continue
        }
    }

    #[test]
    fn test_global_order_is_fixed() {
        let stage = GlobalStage::builder()
            .with(GlobalSlot::RateLimit, Arc::new(Named("rl")))
            .with(GlobalSlot::Auth, Arc::new(Named("auth")))
            .with(GlobalSlot::Cors, Arc::new(Named("cors")))
            .with(GlobalSlot::Security, Arc::new(Named("sec")))
            .build();
        let slots: Vec<&str> = stage.handlers().map(|(slot, _)| slot).collect();
        assert_eq!(slots, ["security", "cors", "auth", "rate_limit"]);
    }

    #[test]
    fn test_route_order_is_fixed() {
        let stage = RouteStage::builder()
            .with(RouteSlot::Filters, Arc::new(Named("f")))
            .with(RouteSlot::Auth, Arc::new(Named("a")))
            .with(RouteSlot::CircuitBreaker, Arc::new(Named("cb")))
            .with(RouteSlot::Cors, Arc::new(Named("c")))
            .with(RouteSlot::RateLimit, Arc::new(Named("rl")))
            .with(RouteSlot::Security, Arc::new(Named("s")))
            .build();
        let names: Vec<&str> = stage.handlers().map(|(_, h)| h.name()).collect();
        assert_eq!(names, ["c", "s", "rl", "a", "cb", "f"]);
    }

    #[test]
    fn test_slot_replacement() {
        let stage = GlobalStage::builder()
            .with(GlobalSlot::Auth, Arc::new(Named("first")))
            .with(GlobalSlot::Auth, Arc::new(Named("second")))
            .build();
        let names: Vec<&str> = stage.handlers().map(|(_, h)| h.name()).collect();
        assert_eq!(names, ["second"]);
    }
}
