//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the gateway fallback handler
//! - Wire up middleware (tracing, concurrency limit, request ID)
//! - Bind server to listener (plain or TLS)
//! - Run every request through the current pipeline generation
//! - Forward passing requests to upstream backends
//! - Record circuit breaker outcomes and request metrics

use std::future::Future;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{
        header,
        request::Parts,
        uri::{Authority, PathAndQuery, Scheme},
        HeaderValue, Request, Uri,
    },
    response::{IntoResponse, Response},
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::net::TcpListener;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::config::GatewayConfig;
use crate::context::{Abort, InboundRequest, RequestContext};
use crate::http::request::{RequestId, RequestIdLayer, X_REQUEST_ID};
use crate::http::response::{bad_gateway, merge_headers, no_backend, strip_hop_by_hop, upstream_timeout};
use crate::observability::metrics;
use crate::pipeline::{Disposition, Handler, SharedPipeline};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: SharedPipeline,
    pub client: Client<HttpConnector, Body>,
    pub request_timeout: Duration,
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    pipeline: SharedPipeline,
}

impl HttpServer {
    pub fn new(config: &GatewayConfig, pipeline: SharedPipeline) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(config.timeouts.connect_secs)));

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(config.timeouts.idle_secs))
            .build(connector);

        let state = AppState {
            pipeline: pipeline.clone(),
            client,
            request_timeout: Duration::from_secs(config.timeouts.request_secs),
        };

        let router = Router::new()
            .fallback(gateway_handler)
            .with_state(state)
            .layer(GlobalConcurrencyLimitLayer::new(config.listener.max_connections))
            .layer(RequestIdLayer)
            .layer(TraceLayer::new_for_http());

        Self { router, pipeline }
    }

    pub fn pipeline(&self) -> SharedPipeline {
        self.pipeline.clone()
    }

    /// The axum router, for serving it on a custom listener.
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Run the server with TLS. Stops when `handle` is told to shut down.
    pub async fn run_tls(
        self,
        addr: SocketAddr,
        tls: RustlsConfig,
        handle: axum_server::Handle,
    ) -> Result<(), std::io::Error> {
        tracing::info!(address = %addr, "HTTPS server starting");

        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(self.router.into_make_service_with_connect_info::<SocketAddr>())
            .await?;

        tracing::info!("HTTPS server stopped");
        Ok(())
    }
}

/// Every request lands here: pipeline first, then the upstream.
async fn gateway_handler(
    State(state): State<AppState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let start_time = std::time::Instant::now();
    let pipeline = state.pipeline.load_full();
    let (parts, body) = request.into_parts();

    let inbound = InboundRequest::from_parts(&parts.method, &parts.uri, &parts.headers, remote_addr);
    let mut ctx = RequestContext::new(inbound)
        .with_deadline(tokio::time::Instant::now() + state.request_timeout);
    if let Some(RequestId(id)) = parts.extensions.get::<RequestId>() {
        ctx = ctx.with_request_id(id.clone());
    }
    let method = parts.method.to_string();

    tracing::debug!(
        request_id = %ctx.request_id(),
        method = %method,
        path = %parts.uri.path(),
        "Processing request"
    );

    let route = match pipeline.process(&mut ctx).await {
        Disposition::Forward(route) => route,
        Disposition::Aborted(abort) => {
            let route_id = ctx.route().map(|r| r.id.as_str()).unwrap_or("none");
            metrics::record_request(&method, abort.status.as_u16(), route_id, start_time);
            return respond(abort, &ctx);
        }
    };

    let backend = match pipeline.backends().get(&route.backend_group) {
        Some(backend) => backend,
        None => {
            tracing::warn!(
                request_id = %ctx.request_id(),
                group = %route.backend_group,
                "No backend available"
            );
            record_outcome(&mut ctx, false);
            metrics::record_request(&method, 503, &route.id, start_time);
            return respond(no_backend(), &ctx);
        }
    };

    let upstream = match upstream_request(&ctx, &parts, backend.addr, body) {
        Ok(req) => req,
        Err(abort) => {
            record_outcome(&mut ctx, false);
            metrics::record_request(&method, abort.status.as_u16(), &route.id, start_time);
            return respond(abort, &ctx);
        }
    };

    let outcome = tokio::time::timeout_at(ctx.deadline(), state.client.request(upstream)).await;
    drop(backend);

    match outcome {
        Ok(Ok(response)) => {
            let status = response.status();
            record_outcome(&mut ctx, !status.is_server_error());
            metrics::record_request(&method, status.as_u16(), &route.id, start_time);

            let (mut parts, body) = response.into_parts();
            strip_hop_by_hop(&mut parts.headers);
            if let Some(filters) = route.stage().filters().filter(|f| f.is_enabled()) {
                filters.apply_response(&mut parts.headers);
            }
            merge_headers(&mut parts.headers, ctx.response_headers());
            Response::from_parts(parts, Body::new(body))
        }
        Ok(Err(e)) => {
            tracing::error!(request_id = %ctx.request_id(), route = %route.id, error = %e, "Upstream error");
            record_outcome(&mut ctx, false);
            metrics::record_request(&method, 502, &route.id, start_time);
            respond(bad_gateway(), &ctx)
        }
        Err(_) => {
            tracing::warn!(request_id = %ctx.request_id(), route = %route.id, "Upstream deadline exceeded");
            record_outcome(&mut ctx, false);
            metrics::record_request(&method, 504, &route.id, start_time);
            respond(upstream_timeout(), &ctx)
        }
    }
}

fn respond(abort: Abort, ctx: &RequestContext) -> Response {
    let mut response = abort.into_response();
    merge_headers(response.headers_mut(), ctx.response_headers());
    response
}

/// Report the upstream result to the breaker that admitted this request.
fn record_outcome(ctx: &mut RequestContext, success: bool) {
    if let Some(permit) = ctx.take_circuit_permit() {
        permit.record(success);
    }
}

/// The request as it leaves for the backend: filtered headers and path from
/// the context, body streamed from the client.
fn upstream_request(
    ctx: &RequestContext,
    parts: &Parts,
    backend: SocketAddr,
    body: Body,
) -> Result<Request<Body>, Abort> {
    let inbound = ctx.request();

    let mut uri_parts = parts.uri.clone().into_parts();
    uri_parts.scheme = Some(Scheme::HTTP);
    uri_parts.authority = Authority::from_str(&backend.to_string()).ok();
    uri_parts.path_and_query = PathAndQuery::from_str(&inbound.path_and_query()).ok();
    let uri = Uri::from_parts(uri_parts).map_err(|e| {
        tracing::warn!(request_id = %ctx.request_id(), error = %e, "Invalid upstream URI");
        bad_gateway()
    })?;

    let mut builder = Request::builder()
        .method(parts.method.clone())
        .version(parts.version)
        .uri(uri);

    if let Some(headers) = builder.headers_mut() {
        headers.extend(inbound.headers.clone());
        strip_hop_by_hop(headers);
        if let Ok(value) = HeaderValue::from_str(ctx.request_id()) {
            headers.insert(X_REQUEST_ID, value);
        }
        let client_ip = inbound.remote_addr.ip().to_string();
        let forwarded = match inbound.header("x-forwarded-for") {
            Some(existing) => format!("{}, {}", existing, client_ip),
            None => client_ip,
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded) {
            headers.insert(header::HeaderName::from_static("x-forwarded-for"), value);
        }
    }

    builder.body(body).map_err(|e| {
        tracing::warn!(request_id = %ctx.request_id(), error = %e, "Failed to build upstream request");
        bad_gateway()
    })
}
