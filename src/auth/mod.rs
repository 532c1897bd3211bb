//! Authentication subsystem.
//!
//! # Data Flow
//! ```text
//! AuthConfig (strategy tag + typed sections)
//!     → factory.rs (normalize tag, validate, construct)
//!     → Authenticator (closed enum of strategies)
//!
//! Per request:
//!     excluded path? → Continue (no facts)
//!     extract credential → validate → write facts (auth_method, user_id, ...)
//!     on failure → error appended to context, Flow::Stop(401 ...)
//! ```
//!
//! # Design Decisions
//! - Strategies are a closed enum; unknown tags fail at build time
//! - A disabled authenticator skips, it never fails
//! - Secrets never reach logs or introspection snapshots

pub mod api_key;
pub mod basic;
pub mod composite;
pub mod config;
pub mod factory;
pub mod jwt;
pub mod none;
pub mod oauth2;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::context::{Abort, InboundRequest, RequestContext};
use crate::error::{BuildError, BuildResult};
use crate::observability::metrics;
use crate::pipeline::{Flow, Handler};
use crate::security::patterns::{compile_wildcards, WildcardPattern};

pub use api_key::ApiKeyAuthenticator;
pub use basic::BasicAuthenticator;
pub use composite::CompositeAuthenticator;
pub use config::{
    ApiKeyConfig, ApiKeyEntry, AuthConfig, AuthStrategy, BasicConfig, CompositeMode, JwtConfig,
    KeyLocation, OAuth2Config,
};
pub use factory::AuthenticatorFactory;
pub use jwt::JwtAuthenticator;
pub use none::NoAuthenticator;
pub use oauth2::{HttpIntrospector, Introspection, IntrospectionError, Introspector, OAuth2Authenticator};

/// Identity and switches common to every strategy.
#[derive(Debug, Clone)]
pub struct AuthBase {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    excluded: Vec<WildcardPattern>,
    /// Set on composite members; their failures are reported by the composite.
    member: bool,
}

impl AuthBase {
    pub fn from_config(config: &AuthConfig, strategy: AuthStrategy) -> BuildResult<Self> {
        let name = if config.name.is_empty() {
            strategy.as_str().to_string()
        } else {
            config.name.clone()
        };
        let excluded = compile_wildcards(&config.excluded_paths)
            .map_err(|reason| BuildError::invalid(name.clone(), "excluded_paths", reason))?;

        Ok(Self {
            id: config.id.clone(),
            name,
            enabled: config.enabled,
            excluded,
            member: false,
        })
    }

    /// An enabled authenticator with no exclusions.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            enabled: true,
            excluded: Vec::new(),
            member: false,
        }
    }

    pub fn is_member(&self) -> bool {
        self.member
    }

    /// True when the request must bypass this authenticator.
    pub fn skips(&self, request: &InboundRequest) -> bool {
        !self.enabled || self.excluded.iter().any(|p| p.matches(&request.path))
    }

    fn snapshot(&self, strategy: AuthStrategy, settings: Value) -> Value {
        json!({
            "id": self.id,
            "name": self.name,
            "enabled": self.enabled,
            "strategy": strategy.as_str(),
            "excluded_paths": self.excluded.iter().map(|p| p.as_str()).collect::<Vec<_>>(),
            "config": settings,
        })
    }
}

/// Log and count a failure the caller will see.
pub(crate) fn record_failure(ctx: &RequestContext, strategy: AuthStrategy, name: &str, reason: &str) {
    tracing::warn!(
        request_id = %ctx.request_id(),
        strategy = %strategy,
        authenticator = %name,
        path = %ctx.request().path,
        reason,
        "Authentication failed"
    );
    metrics::record_auth_failure(strategy.as_str());
}

/// Record a failed authentication and produce the stop signal.
///
/// Composite members only note the reason; the composite decides whether the
/// request failed.
pub(crate) fn reject(
    ctx: &mut RequestContext,
    strategy: AuthStrategy,
    base: &AuthBase,
    reason: &str,
    abort: Abort,
) -> Flow {
    if base.member {
        tracing::debug!(
            request_id = %ctx.request_id(),
            strategy = %strategy,
            authenticator = %base.name,
            reason,
            "Composite member rejected request"
        );
    } else {
        record_failure(ctx, strategy, &base.name, reason);
    }
    ctx.push_error(format!("{}: {}", strategy, reason));
    Flow::Stop(abort)
}

/// [`reject`] with the standard 401 body.
pub(crate) fn unauthorized(
    ctx: &mut RequestContext,
    strategy: AuthStrategy,
    base: &AuthBase,
    reason: &str,
) -> Flow {
    reject(ctx, strategy, base, reason, Abort::unauthorized(reason))
}

/// A constructed authenticator of any strategy.
pub enum Authenticator {
    None(NoAuthenticator),
    Jwt(JwtAuthenticator),
    ApiKey(ApiKeyAuthenticator),
    Basic(BasicAuthenticator),
    OAuth2(OAuth2Authenticator),
    Composite(CompositeAuthenticator),
}

macro_rules! dispatch {
    ($self:ident, $inner:ident => $body:expr) => {
        match $self {
            Authenticator::None($inner) => $body,
            Authenticator::Jwt($inner) => $body,
            Authenticator::ApiKey($inner) => $body,
            Authenticator::Basic($inner) => $body,
            Authenticator::OAuth2($inner) => $body,
            Authenticator::Composite($inner) => $body,
        }
    };
}

impl Authenticator {
    fn base_mut(&mut self) -> &mut AuthBase {
        dispatch!(self, a => a.base_mut())
    }

    /// Hand failure reporting to the enclosing composite.
    pub(crate) fn mark_member(&mut self) {
        self.base_mut().member = true;
    }

    pub fn strategy(&self) -> AuthStrategy {
        match self {
            Authenticator::None(_) => AuthStrategy::None,
            Authenticator::Jwt(_) => AuthStrategy::Jwt,
            Authenticator::ApiKey(_) => AuthStrategy::ApiKey,
            Authenticator::Basic(_) => AuthStrategy::Basic,
            Authenticator::OAuth2(_) => AuthStrategy::OAuth2,
            Authenticator::Composite(c) => c.strategy(),
        }
    }
}

#[async_trait]
impl Handler for Authenticator {
    fn name(&self) -> &str {
        dispatch!(self, a => a.name())
    }

    fn is_enabled(&self) -> bool {
        dispatch!(self, a => a.is_enabled())
    }

    fn validate(&self) -> BuildResult<()> {
        dispatch!(self, a => a.validate())
    }

    fn config(&self) -> Value {
        dispatch!(self, a => a.config())
    }

    async fn handle(&self, ctx: &mut RequestContext) -> Flow {
        dispatch!(self, a => a.handle(ctx).await)
    }

    fn close(&self) -> BuildResult<()> {
        dispatch!(self, a => a.close())
    }
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("strategy", &self.strategy())
            .field("name", &self.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;

    #[test]
    fn test_excluded_paths_skip() {
        let config = AuthConfig {
            excluded_paths: vec!["/health".into(), "/public/*".into()],
            ..Default::default()
        };
        let base = AuthBase::from_config(&config, AuthStrategy::Jwt).unwrap();
        assert_eq!(base.name, "jwt");

        assert!(base.skips(&InboundRequest::new(Method::GET, "/health")));
        assert!(base.skips(&InboundRequest::new(Method::GET, "/public/logo.png")));
        assert!(!base.skips(&InboundRequest::new(Method::GET, "/api/users")));
    }

    #[test]
    fn test_disabled_always_skips() {
        let config = AuthConfig {
            enabled: false,
            ..Default::default()
        };
        let base = AuthBase::from_config(&config, AuthStrategy::Basic).unwrap();
        assert!(base.skips(&InboundRequest::new(Method::GET, "/api/users")));
    }
}
