//! Gateway behavior over real sockets: client → gateway → mock backend.

use std::time::{SystemTime, UNIX_EPOCH};

use api_gateway::pipeline;
use api_gateway::resilience::CircuitState;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};

mod common;

const SECRET: &str = "0123456789abcdef0123456789abcdef";

#[tokio::test]
async fn test_forwards_with_filters_and_request_id() {
    let backend = common::start_echo_backend().await;
    let gateway = common::start_gateway(common::config(
        r#"
        [[routes]]
        id = "users"
        path = "/api/users"
        methods = ["GET"]
        backend_group = "users"

        [routes.filters]
        strip_prefix = "/api"
        add_request_headers = { x-gateway = "edge" }
        add_response_headers = { x-served-by = "gateway" }
        remove_response_headers = ["server"]

        [[backends]]
        name = "users-1"
        group = "users"
        address = "{backend}"
        "#,
        backend,
    ))
    .await;

    let res = common::client()
        .get(gateway.url("/api/users/7?full=1"))
        .header("x-request-id", "trace-1")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["x-request-id"], "trace-1");
    assert_eq!(res.headers()["x-served-by"], "gateway");
    assert!(res.headers().get("server").is_none());

    let seen: Value = res.json().await.unwrap();
    assert_eq!(seen["target"], "/users/7?full=1");
    assert_eq!(seen["headers"]["x-gateway"], "edge");
    assert_eq!(seen["headers"]["x-request-id"], "trace-1");
    assert_eq!(seen["headers"]["x-forwarded-for"], "127.0.0.1");
}

#[tokio::test]
async fn test_unmatched_route_and_method() {
    let backend = common::start_echo_backend().await;
    let gateway = common::start_gateway(common::config(
        r#"
        [[routes]]
        id = "users"
        path = "/users"
        match_type = "exact"
        methods = ["GET"]
        backend_group = "users"

        [[backends]]
        name = "users-1"
        group = "users"
        address = "{backend}"
        "#,
        backend,
    ))
    .await;
    let client = common::client();

    let res = client.get(gateway.url("/users/1")).send().await.unwrap();
    assert_eq!(res.status(), 404);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body, json!({ "error": "Not Found: no route matched" }));

    let res = client.delete(gateway.url("/users")).send().await.unwrap();
    assert_eq!(res.status(), 404);
}

#[tokio::test]
async fn test_basic_auth_challenge() {
    let backend = common::start_echo_backend().await;
    let gateway = common::start_gateway(common::config(
        r#"
        [[routes]]
        id = "reports"
        path = "/reports"
        backend_group = "reports"

        [routes.auth]
        strategy = "basic"

        [routes.auth.basic]
        username = "ops"
        password = "hunter2"
        realm = "reports"

        [[backends]]
        name = "reports-1"
        group = "reports"
        address = "{backend}"
        "#,
        backend,
    ))
    .await;
    let client = common::client();

    let res = client.get(gateway.url("/reports")).send().await.unwrap();
    assert_eq!(res.status(), 401);
    assert_eq!(res.headers()["www-authenticate"], "Basic realm=\"reports\"");

    let res = client
        .get(gateway.url("/reports"))
        .basic_auth("ops", Some("hunter3"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 401);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "Unauthorized: invalid username or password");

    let res = client
        .get(gateway.url("/reports"))
        .basic_auth("ops", Some("hunter2"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
}

#[tokio::test]
async fn test_cors_preflight_and_simple_request() {
    let backend = common::start_echo_backend().await;
    let gateway = common::start_gateway(common::config(
        r#"
        [global.cors]
        enabled = true
        allowed_origins = ["https://app.example.com"]

        [[routes]]
        id = "all"
        path = "/"
        backend_group = "web"

        [[backends]]
        name = "web-1"
        group = "web"
        address = "{backend}"
        "#,
        backend,
    ))
    .await;
    let client = common::client();

    let res = client
        .request(reqwest::Method::OPTIONS, gateway.url("/items"))
        .header("origin", "https://app.example.com")
        .header("access-control-request-method", "POST")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 204);
    assert_eq!(res.headers()["access-control-allow-origin"], "https://app.example.com");
    assert!(res.headers().contains_key("access-control-allow-methods"));

    let res = client
        .get(gateway.url("/items"))
        .header("origin", "https://app.example.com")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["access-control-allow-origin"], "https://app.example.com");

    let res = client
        .get(gateway.url("/items"))
        .header("origin", "https://evil.example.com")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 403);
}

#[tokio::test]
async fn test_circuit_opens_after_upstream_failures() {
    let backend = common::start_programmable_backend(|_| async { (500, "{}".to_string()) }).await;
    let gateway = common::start_gateway(common::config(
        r#"
        [[routes]]
        id = "flaky"
        path = "/"
        backend_group = "flaky"

        [routes.circuit_breaker]
        enabled = true
        failure_threshold = 2
        recovery_timeout_secs = 60

        [[backends]]
        name = "flaky-1"
        group = "flaky"
        address = "{backend}"
        "#,
        backend,
    ))
    .await;
    let client = common::client();

    for _ in 0..2 {
        let res = client.get(gateway.url("/")).send().await.unwrap();
        assert_eq!(res.status(), 500);
    }

    let res = client.get(gateway.url("/")).send().await.unwrap();
    assert_eq!(res.status(), 503);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "Service Unavailable: circuit open");
}

#[tokio::test]
async fn test_unreachable_backend_is_502() {
    let closed = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let gateway = common::start_gateway(common::config(
        r#"
        [[routes]]
        id = "gone"
        path = "/"
        backend_group = "gone"

        [[backends]]
        name = "gone-1"
        group = "gone"
        address = "{backend}"
        "#,
        closed,
    ))
    .await;

    let res = common::client().get(gateway.url("/")).send().await.unwrap();
    assert_eq!(res.status(), 502);
}

#[tokio::test]
async fn test_jwt_refresh_header_on_proxied_response() {
    let backend = common::start_echo_backend().await;
    let gateway = common::start_gateway(common::config(
        &format!(
            r#"
            [global.auth]
            strategy = "jwt"
            excluded_paths = ["/health"]

            [global.auth.jwt]
            secret = "{}"
            refresh_window_secs = 300

            [[routes]]
            id = "all"
            path = "/"
            backend_group = "web"

            [[backends]]
            name = "web-1"
            group = "web"
            address = "{{backend}}"
            "#,
            SECRET
        ),
        backend,
    ))
    .await;
    let client = common::client();

    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
    let token = encode(
        &Header::default(),
        &json!({ "sub": "alice", "iat": now, "exp": now + 60 }),
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap();

    let res = client.get(gateway.url("/me")).bearer_auth(&token).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["x-token-refresh"], "true");

    let res = client.get(gateway.url("/me")).send().await.unwrap();
    assert_eq!(res.status(), 401);

    let res = client.get(gateway.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), 200);
}

#[tokio::test]
async fn test_reload_swaps_routes_live() {
    let backend = common::start_echo_backend().await;
    let base = r#"
        [[routes]]
        id = "v1"
        path = "/v1"
        backend_group = "web"

        [[backends]]
        name = "web-1"
        group = "web"
        address = "{backend}"
        "#;
    let gateway = common::start_gateway(common::config(base, backend)).await;
    let client = common::client();

    assert_eq!(client.get(gateway.url("/v2")).send().await.unwrap().status(), 404);

    let next = common::config(&base.replace("/v1", "/v2"), backend);
    pipeline::reload(&gateway.pipeline, &next).unwrap();

    assert_eq!(client.get(gateway.url("/v2")).send().await.unwrap().status(), 200);
    assert_eq!(client.get(gateway.url("/v1")).send().await.unwrap().status(), 404);
}

#[tokio::test]
async fn test_transport_failure_reaches_admitting_breaker() {
    let closed = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let gateway = common::start_gateway(common::config(
        r#"
        [[routes]]
        id = "gone"
        path = "/"
        backend_group = "gone"

        [routes.circuit_breaker]
        enabled = true
        failure_threshold = 1
        recovery_timeout_secs = 60

        [[backends]]
        name = "gone-1"
        group = "gone"
        address = "{backend}"
        "#,
        closed,
    ))
    .await;
    let client = common::client();

    assert_eq!(client.get(gateway.url("/")).send().await.unwrap().status(), 502);
    let state = gateway.pipeline.load().router().routes()[0]
        .stage()
        .circuit_breaker()
        .unwrap()
        .state();
    assert_eq!(state, CircuitState::Open);

    assert_eq!(client.get(gateway.url("/")).send().await.unwrap().status(), 503);
}
