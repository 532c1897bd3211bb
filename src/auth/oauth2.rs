//! OAuth2 bearer tokens validated by remote introspection (RFC 7662).
//!
//! The introspection call is the one network-bound step in the auth family.
//! It is bounded by the smaller of the configured timeout and the request
//! deadline; dropping the request future cancels it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::header;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::time::{timeout_at, Instant};

use crate::auth::{unauthorized, AuthBase, AuthStrategy, OAuth2Config};
use crate::context::{keys, InboundRequest, RequestContext};
use crate::error::{BuildError, BuildResult};
use crate::pipeline::{Flow, Handler};

/// Introspection response fields the gateway consumes.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Introspection {
    pub active: bool,
    pub sub: Option<String>,
    pub username: Option<String>,
    pub client_id: Option<String>,
    /// Space-separated granted scopes.
    pub scope: Option<String>,
    pub exp: Option<u64>,
}

impl Introspection {
    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.scope.as_deref().unwrap_or_default().split_whitespace()
    }

    fn subject(&self) -> Option<&str> {
        self.sub
            .as_deref()
            .or(self.username.as_deref())
            .or(self.client_id.as_deref())
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Error)]
pub enum IntrospectionError {
    #[error("introspection request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("introspection endpoint returned {0}")]
    Status(u16),
}

/// Validates a token against an authorization server.
#[async_trait]
pub trait Introspector: Send + Sync {
    async fn introspect(&self, token: &str) -> Result<Introspection, IntrospectionError>;
}

/// RFC 7662 form post authenticated with the client credentials.
pub struct HttpIntrospector {
    client: reqwest::Client,
    url: String,
    client_id: String,
    client_secret: String,
}

impl HttpIntrospector {
    pub fn new(config: &OAuth2Config) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            url: config.introspection_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        })
    }
}

#[async_trait]
impl Introspector for HttpIntrospector {
    async fn introspect(&self, token: &str) -> Result<Introspection, IntrospectionError> {
        let response = self
            .client
            .post(&self.url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("token", token), ("token_type_hint", "access_token")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IntrospectionError::Status(response.status().as_u16()));
        }

        Ok(response.json::<Introspection>().await?)
    }
}

pub struct OAuth2Authenticator {
    base: AuthBase,
    config: OAuth2Config,
    introspector: Arc<dyn Introspector>,
    timeout: Duration,
}

impl OAuth2Authenticator {
    pub(crate) fn base_mut(&mut self) -> &mut AuthBase {
        &mut self.base
    }

    /// Build with the HTTP introspector pointed at `introspection_url`.
    pub fn new(base: AuthBase, config: OAuth2Config) -> BuildResult<Self> {
        config.validate(&base.name)?;
        let introspector = HttpIntrospector::new(&config)
            .map_err(|e| BuildError::invalid(base.name.clone(), "introspection_url", e.to_string()))?;
        Self::with_introspector(base, config, Arc::new(introspector))
    }

    pub fn with_introspector(
        base: AuthBase,
        config: OAuth2Config,
        introspector: Arc<dyn Introspector>,
    ) -> BuildResult<Self> {
        config.validate(&base.name)?;
        let timeout = Duration::from_millis(config.timeout_ms);

        Ok(Self {
            base,
            config,
            introspector,
            timeout,
        })
    }

    fn extract(request: &InboundRequest) -> Option<String> {
        let value = request.header(header::AUTHORIZATION.as_str())?.trim();
        let (scheme, token) = value.split_once(' ')?;
        let token = token.trim();
        (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_string())
    }

    fn missing_scope<'a>(&'a self, granted: &Introspection) -> Option<&'a str> {
        self.config
            .required_scopes
            .iter()
            .find(|required| !granted.scopes().any(|s| s == required.as_str()))
            .map(String::as_str)
    }
}

#[async_trait]
impl Handler for OAuth2Authenticator {
    fn name(&self) -> &str {
        &self.base.name
    }

    fn is_enabled(&self) -> bool {
        self.base.enabled
    }

    fn validate(&self) -> BuildResult<()> {
        self.config.validate(&self.base.name)
    }

    fn config(&self) -> Value {
        let settings = serde_json::to_value(&self.config).unwrap_or(Value::Null);
        self.base.snapshot(AuthStrategy::OAuth2, settings)
    }

    async fn handle(&self, ctx: &mut RequestContext) -> Flow {
        if self.base.skips(ctx.request()) {
            return Flow::Continue;
        }

        let Some(token) = Self::extract(ctx.request()) else {
            return unauthorized(ctx, AuthStrategy::OAuth2, &self.base, "missing bearer token");
        };

        let deadline = ctx.deadline().min(Instant::now() + self.timeout);
        let introspection = match timeout_at(deadline, self.introspector.introspect(&token)).await {
            Ok(Ok(introspection)) => introspection,
            Ok(Err(e)) => {
                tracing::warn!(
                    request_id = %ctx.request_id(),
                    error = %e,
                    "Token introspection failed"
                );
                return unauthorized(
                    ctx,
                    AuthStrategy::OAuth2,
                    &self.base,
                    "token introspection failed",
                );
            }
            Err(_) => {
                return unauthorized(
                    ctx,
                    AuthStrategy::OAuth2,
                    &self.base,
                    "token introspection timed out",
                );
            }
        };

        if !introspection.active {
            return unauthorized(ctx, AuthStrategy::OAuth2, &self.base, "token is not active");
        }
        if let Some(scope) = self.missing_scope(&introspection) {
            let reason = format!("insufficient scope: `{}` required", scope);
            return unauthorized(ctx, AuthStrategy::OAuth2, &self.base, &reason);
        }
        let Some(subject) = introspection.subject().map(str::to_string) else {
            return unauthorized(
                ctx,
                AuthStrategy::OAuth2,
                &self.base,
                "introspection response has no subject",
            );
        };

        ctx.set_fact(keys::AUTH_METHOD, AuthStrategy::OAuth2.as_str());
        ctx.set_fact(keys::USER_ID, subject);
        if let Some(client_id) = introspection.client_id.clone() {
            ctx.set_fact(keys::OAUTH2_CLIENT_ID, client_id);
        }
        if let Some(scope) = introspection.scope.clone() {
            ctx.set_fact(keys::OAUTH2_SCOPE, scope);
        }
        Flow::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Method, StatusCode};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockIntrospector {
        response: Introspection,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl MockIntrospector {
        fn answering(response: Introspection) -> Arc<Self> {
            Arc::new(Self {
                response,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Introspector for MockIntrospector {
        async fn introspect(&self, token: &str) -> Result<Introspection, IntrospectionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if token == "revoked" {
                return Ok(Introspection::default());
            }
            Ok(self.response.clone())
        }
    }

    fn config() -> OAuth2Config {
        OAuth2Config {
            introspection_url: "https://idp.example.com/introspect".into(),
            client_id: "gateway".into(),
            client_secret: "secret".into(),
            timeout_ms: 200,
            ..Default::default()
        }
    }

    fn active() -> Introspection {
        Introspection {
            active: true,
            sub: Some("alice".into()),
            client_id: Some("mobile-app".into()),
            scope: Some("read write".into()),
            ..Default::default()
        }
    }

    fn request(token: &str) -> RequestContext {
        RequestContext::new(
            InboundRequest::new(Method::GET, "/orders")
                .with_header("authorization", &format!("Bearer {}", token)),
        )
    }

    fn reason(flow: Flow) -> String {
        match flow {
            Flow::Stop(abort) => {
                assert_eq!(abort.status, StatusCode::UNAUTHORIZED);
                abort.error_message().unwrap().to_string()
            }
            Flow::Continue => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn test_active_token_writes_facts() {
        let auth = OAuth2Authenticator::with_introspector(
            AuthBase::named("oauth"),
            config(),
            MockIntrospector::answering(active()),
        )
        .unwrap();
        let mut ctx = request("good");

        assert!(auth.handle(&mut ctx).await.is_continue());
        assert_eq!(ctx.fact_str(keys::AUTH_METHOD), Some("oauth2"));
        assert_eq!(ctx.fact_str(keys::USER_ID), Some("alice"));
        assert_eq!(ctx.fact_str(keys::OAUTH2_CLIENT_ID), Some("mobile-app"));
        assert_eq!(ctx.fact_str(keys::OAUTH2_SCOPE), Some("read write"));
    }

    #[tokio::test]
    async fn test_inactive_token_rejected() {
        let auth = OAuth2Authenticator::with_introspector(
            AuthBase::named("oauth"),
            config(),
            MockIntrospector::answering(active()),
        )
        .unwrap();
        let mut ctx = request("revoked");
        assert_eq!(reason(auth.handle(&mut ctx).await), "Unauthorized: token is not active");
    }

    #[tokio::test]
    async fn test_required_scope() {
        let auth = OAuth2Authenticator::with_introspector(
            AuthBase::named("oauth"),
            OAuth2Config {
                required_scopes: vec!["read".into(), "admin".into()],
                ..config()
            },
            MockIntrospector::answering(active()),
        )
        .unwrap();
        let mut ctx = request("good");
        assert_eq!(
            reason(auth.handle(&mut ctx).await),
            "Unauthorized: insufficient scope: `admin` required"
        );
    }

    #[tokio::test]
    async fn test_missing_bearer_skips_introspection() {
        let mock = MockIntrospector::answering(active());
        let auth =
            OAuth2Authenticator::with_introspector(AuthBase::named("oauth"), config(), mock.clone())
                .unwrap();
        let mut ctx = RequestContext::new(
            InboundRequest::new(Method::GET, "/orders").with_header("authorization", "Basic abc"),
        );

        assert_eq!(reason(auth.handle(&mut ctx).await), "Unauthorized: missing bearer token");
        assert_eq!(mock.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_introspection_times_out() {
        let mock = Arc::new(MockIntrospector {
            response: active(),
            delay: Duration::from_secs(10),
            calls: AtomicUsize::new(0),
        });
        let auth =
            OAuth2Authenticator::with_introspector(AuthBase::named("oauth"), config(), mock).unwrap();
        let mut ctx = request("good");

        assert_eq!(
            reason(auth.handle(&mut ctx).await),
            "Unauthorized: token introspection timed out"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_deadline_bounds_introspection() {
        let mock = Arc::new(MockIntrospector {
            response: active(),
            delay: Duration::from_millis(100),
            calls: AtomicUsize::new(0),
        });
        let auth = OAuth2Authenticator::with_introspector(
            AuthBase::named("oauth"),
            OAuth2Config {
                timeout_ms: 60_000,
                ..config()
            },
            mock,
        )
        .unwrap();
        let mut ctx = request("good").with_deadline(Instant::now() + Duration::from_millis(10));

        assert_eq!(
            reason(auth.handle(&mut ctx).await),
            "Unauthorized: token introspection timed out"
        );
    }

    #[test]
    fn test_config_validation() {
        let err = OAuth2Authenticator::new(
            AuthBase::named("oauth"),
            OAuth2Config {
                introspection_url: "not a url".into(),
                ..config()
            },
        )
        .err()
        .unwrap();
        assert!(matches!(err, BuildError::InvalidValue { field: "introspection_url", .. }));
    }

    #[test]
    fn test_introspection_parses_partial_response() {
        let parsed: Introspection =
            serde_json::from_str(r#"{"active":true,"username":"bob","extra":1}"#).unwrap();
        assert!(parsed.active);
        assert_eq!(parsed.subject(), Some("bob"));
        assert_eq!(parsed.scopes().count(), 0);
    }
}
