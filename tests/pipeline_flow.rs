//! End-to-end pipeline behavior without a network listener.

use std::sync::{Arc, Mutex};

use api_gateway::auth::{ApiKeyConfig, ApiKeyEntry, AuthConfig, AuthenticatorFactory};
use api_gateway::config::{parse_config, GatewayConfig, RouteConfig};
use api_gateway::context::{keys, InboundRequest, RequestContext};
use api_gateway::pipeline::{
    Disposition, Flow, GlobalSlot, GlobalStage, Handler, Pipeline, PipelineOrchestrator, RouteSlot, RouteStage,
};
use api_gateway::routing::{Route, Router};
use api_gateway::security::{RateLimitConfig, RateLimiter};
use async_trait::async_trait;
use axum::http::{header, Method, StatusCode};
use serde_json::Value;

const CONFIG: &str = r#"
[global.auth]
strategy = "api-key"

[[global.auth.api_key.keys]]
name = "svc"
value = "k-123"
roles = ["reader"]

[global.security.ip]
enabled = true
blacklist = ["10.0.0.5"]
whitelist = ["10.0.0.5"]

[[routes]]
id = "orders"
path = "/orders"
backend_group = "orders"

[routes.rate_limit]
enabled = true
requests_per_second = 1
burst_size = 1

[routes.circuit_breaker]
enabled = true
failure_threshold = 1

[routes.filters.add_request_headers]
x-filtered = "yes"

[[routes]]
id = "admin"
path = "/internal"
backend_group = "orders"

[routes.security.api]
enabled = true
default_policy = "deny"
whitelist = ["/internal/health"]

[[backends]]
name = "orders-1"
group = "orders"
address = "127.0.0.1:3000"
"#;

fn pipeline() -> Pipeline {
    let config: GatewayConfig = parse_config(CONFIG).unwrap();
    Pipeline::from_config(&config).unwrap()
}

fn request(path: &str) -> InboundRequest {
    InboundRequest::new(Method::GET, path).with_header("api-key", "k-123")
}

fn aborted(disposition: Disposition) -> api_gateway::Abort {
    match disposition {
        Disposition::Aborted(abort) => abort,
        Disposition::Forward(route) => panic!("unexpectedly forwarded to {}", route.id),
    }
}

#[tokio::test]
async fn test_route_rate_limit_denies_after_global_auth() {
    let pipeline = pipeline();

    let mut first = RequestContext::new(request("/orders/1"));
    assert!(pipeline.process(&mut first).await.is_forward());
    assert_eq!(first.fact_str(keys::USER_ID), Some("svc"));
    assert_eq!(first.request().header("x-filtered"), Some("yes"));

    let mut second = RequestContext::new(request("/orders/2"));
    let abort = aborted(pipeline.process(&mut second).await);
    assert_eq!(abort.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(abort.error_message(), Some("Too Many Requests: rate limit exceeded"));
    assert_eq!(abort.headers[header::RETRY_AFTER], "1");

    // Authentication ran, filters did not.
    assert_eq!(second.fact_str(keys::AUTH_METHOD), Some("api-key"));
    assert_eq!(second.request().header("x-filtered"), None);
}

#[tokio::test]
async fn test_missing_credentials_stop_before_routing() {
    let pipeline = pipeline();
    let mut ctx = RequestContext::new(InboundRequest::new(Method::GET, "/orders"));
    let abort = aborted(pipeline.process(&mut ctx).await);

    assert_eq!(abort.status, StatusCode::UNAUTHORIZED);
    assert!(ctx.route().is_none());
}

#[tokio::test]
async fn test_blacklist_wins_over_whitelist() {
    let pipeline = pipeline();
    let mut ctx = RequestContext::new(request("/orders").with_header("x-forwarded-for", "10.0.0.5"));
    let abort = aborted(pipeline.process(&mut ctx).await);

    assert_eq!(abort.status, StatusCode::FORBIDDEN);
    assert_eq!(abort.error_message(), Some("IP access denied"));
    assert!(ctx.fact(keys::USER_ID).is_none());
}

#[tokio::test]
async fn test_route_security_default_deny() {
    let pipeline = pipeline();

    let mut ctx = RequestContext::new(request("/internal/health"));
    assert!(pipeline.process(&mut ctx).await.is_forward());

    let mut ctx = RequestContext::new(request("/internal/settings"));
    let abort = aborted(pipeline.process(&mut ctx).await);
    assert_eq!(abort.status, StatusCode::FORBIDDEN);
    assert_eq!(abort.error_message(), Some("API access denied"));
}

struct Recorder {
    name: &'static str,
    calls: Arc<Mutex<Vec<&'static str>>>,
}

#[async_trait]
impl Handler for Recorder {
    fn name(&self) -> &str {
        self.name
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn config(&self) -> Value {
        Value::Null
    }

    async fn handle(&self, _ctx: &mut RequestContext) -> Flow {
        self.calls.lock().unwrap().push(self.name);
        Flow::Continue
    }
}

#[tokio::test]
async fn test_rate_limit_stop_skips_breaker_and_filters() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let recorder = |name| -> Arc<dyn Handler> {
        Arc::new(Recorder {
            name,
            calls: calls.clone(),
        })
    };

    let auth = AuthenticatorFactory::build(&AuthConfig {
        strategy: "apikey".into(),
        api_key: Some(ApiKeyConfig {
            keys: vec![ApiKeyEntry {
                name: "svc".into(),
                value: "k-123".into(),
                roles: vec![],
            }],
            ..Default::default()
        }),
        ..Default::default()
    })
    .unwrap();

    let limiter = RateLimiter::new(
        RateLimitConfig {
            enabled: true,
            requests_per_second: 1,
            burst_size: 1,
            ..Default::default()
        },
        "orders",
    )
    .unwrap();

    let global = GlobalStage::builder().with(GlobalSlot::Auth, Arc::new(auth)).build();
    let stage = RouteStage::builder()
        .with(RouteSlot::RateLimit, Arc::new(limiter))
        .with(RouteSlot::CircuitBreaker, recorder("circuit-breaker"))
        .with(RouteSlot::Filters, recorder("filters"))
        .build();
    let route = Route::with_stage(
        &RouteConfig {
            id: "orders".into(),
            path: "/orders".into(),
            backend_group: "orders".into(),
            ..Default::default()
        },
        stage,
    )
    .unwrap();
    let orchestrator = PipelineOrchestrator::new(global, Router::from_routes(vec![Arc::new(route)]));

    let mut ctx = RequestContext::new(request("/orders"));
    assert!(orchestrator.process(&mut ctx).await.is_forward());
    assert_eq!(*calls.lock().unwrap(), ["circuit-breaker", "filters"]);

    calls.lock().unwrap().clear();
    let mut ctx = RequestContext::new(request("/orders"));
    let abort = aborted(orchestrator.process(&mut ctx).await);
    assert_eq!(abort.status, StatusCode::TOO_MANY_REQUESTS);
    assert!(calls.lock().unwrap().is_empty());
    assert_eq!(ctx.abort_state().unwrap().status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_or_composite_falls_back_to_api_key() {
    let config = parse_config(
        r#"
        [global.auth]
        strategy = "jwt-or-api-key"

        [global.auth.jwt]
        secret = "0123456789abcdef0123456789abcdef"

        [[global.auth.api_key.keys]]
        name = "svc"
        value = "k-123"

        [[routes]]
        id = "all"
        path = "/"
        backend_group = "default"

        [[backends]]
        name = "b1"
        group = "default"
        address = "127.0.0.1:3000"
        "#,
    )
    .unwrap();
    let pipeline = Pipeline::from_config(&config).unwrap();

    let mut ctx = RequestContext::new(request("/anything"));
    assert!(pipeline.process(&mut ctx).await.is_forward());
    assert_eq!(ctx.fact_str(keys::USER_ID), Some("svc"));

    let mut ctx = RequestContext::new(InboundRequest::new(Method::GET, "/anything"));
    let abort = aborted(pipeline.process(&mut ctx).await);
    assert_eq!(abort.status, StatusCode::UNAUTHORIZED);
    assert_eq!(abort.error_message(), Some("Unauthorized: all authentication methods failed"));
    assert!(ctx.errors().len() >= 2);
}
