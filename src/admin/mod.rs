//! Read-only admin API.
//!
//! # Data Flow
//! ```text
//! GET /admin/* with `Authorization: Bearer <admin.api_key>`
//!     → auth.rs (constant-time token check, 401 otherwise)
//!     → handlers.rs (snapshot of the current pipeline generation)
//! ```
//!
//! # Design Decisions
//! - Served on its own listener, never on the gateway port
//! - Reads the same `ArcSwap` the gateway serves from, so snapshots follow reloads

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::{middleware, routing::get, Router};

use crate::pipeline::SharedPipeline;

use self::auth::admin_auth_middleware;
use self::handlers::{get_backends, get_pipeline, get_routes, get_status};

/// State shared by the admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub pipeline: SharedPipeline,
    pub api_key: Arc<str>,
    pub started_at: Instant,
}

impl AdminState {
    pub fn new(pipeline: SharedPipeline, api_key: &str) -> Self {
        Self {
            pipeline,
            api_key: Arc::from(api_key),
            started_at: Instant::now(),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/pipeline", get(get_pipeline))
        .route("/admin/routes", get(get_routes))
        .route("/admin/backends", get(get_backends))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, GatewayConfig, RouteConfig};
    use crate::pipeline::{self, Pipeline};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn router() -> Router {
        let config = GatewayConfig {
            routes: vec![RouteConfig {
                id: "orders".into(),
                path: "/orders".into(),
                backend_group: "orders".into(),
                ..Default::default()
            }],
            backends: vec![BackendConfig {
                name: "orders-1".into(),
                group: "orders".into(),
                address: "127.0.0.1:3000".into(),
                max_connections: 10,
            }],
            ..Default::default()
        };
        let shared = pipeline::shared(Pipeline::from_config(&config).unwrap());
        setup_admin_router(AdminState::new(shared, "s3cret"))
    }

    fn get(path: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_requires_token() {
        let res = router().oneshot(get("/admin/status", None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = router().oneshot(get("/admin/status", Some("wrong"))).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_routes_snapshot() {
        let res = router().oneshot(get("/admin/routes", Some("s3cret"))).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(res.into_body(), 64 * 1024).await.unwrap();
        let routes: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(routes[0]["id"], "orders");
        assert_eq!(routes[0]["backend_group"], "orders");
    }
}
