//! Per-request state shared by every handler in the pipeline.
//!
//! # Data Flow
//! ```text
//! axum request (parts + ConnectInfo)
//!     → InboundRequest (method, path, query, headers, remote address)
//!     → RequestContext (fact bag, error list, abort state, deadline)
//!     → global stage → route resolution → route stage
//!     → Abort converted to a response, or the request is proxied
//! ```
//!
//! # Design Decisions
//! - One context per request, owned by the task serving it (never shared)
//! - Facts are `serde_json::Value` so downstream consumers can log them as-is
//! - The first abort wins; an aborted context cannot be un-aborted

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use serde_json::{json, Value};
use tokio::time::Instant;

use crate::resilience::CircuitPermit;
use crate::routing::Route;

/// Deadline applied when the caller does not provide one.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

/// Well-known fact keys written by authenticators.
pub mod keys {
    pub const AUTH_METHOD: &str = "auth_method";
    pub const USER_ID: &str = "user_id";
    pub const USER_ROLES: &str = "user_roles";
    pub const API_KEY_NAME: &str = "api_key_name";
    pub const API_KEY_ROLES: &str = "api_key_roles";
    pub const JWT_CLAIMS: &str = "jwt_claims";
    pub const JWT_TOKEN: &str = "jwt_token";
    pub const JWT_REFRESH_DUE: &str = "jwt_refresh_due";
    pub const OAUTH2_CLIENT_ID: &str = "oauth2_client_id";
    pub const OAUTH2_SCOPE: &str = "oauth2_scope";
}

/// The inbound request as seen by the pipeline.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub remote_addr: SocketAddr,
}

impl InboundRequest {
    /// Build a request from a method and a `path?query` target.
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (target.to_string(), None),
        };

        Self {
            method,
            path: if path.is_empty() { "/".to_string() } else { path },
            query,
            headers: HeaderMap::new(),
            remote_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        }
    }

    /// Build a request from the parts axum hands us.
    pub fn from_parts(method: &Method, uri: &Uri, headers: &HeaderMap, remote_addr: SocketAddr) -> Self {
        Self {
            method: method.clone(),
            path: uri.path().to_string(),
            query: uri.query().map(str::to_string),
            headers: headers.clone(),
            remote_addr,
        }
    }

    /// Set a header, replacing any previous value. Invalid names or values are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = addr;
        self
    }

    /// Header value as UTF-8, if present and valid.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// First value of a URL-decoded query parameter.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.query.as_deref()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    /// Cookie value by name, searching every `Cookie` header.
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| key.trim() == name)
            .map(|(_, value)| value.trim().to_string())
    }

    /// `path` plus `?query` when a query is present.
    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        }
    }
}

/// Terminal response recorded when a handler stops the chain.
#[derive(Debug, Clone)]
pub struct Abort {
    pub status: StatusCode,
    pub body: Option<Value>,
    pub headers: HeaderMap,
}

impl Abort {
    /// An abort with a JSON body of the form `{"error": message}`.
    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            body: Some(json!({ "error": message.into() })),
            headers: HeaderMap::new(),
        }
    }

    /// 401 with `Unauthorized: <reason>`.
    pub fn unauthorized(reason: impl AsRef<str>) -> Self {
        Self::error(StatusCode::UNAUTHORIZED, format!("Unauthorized: {}", reason.as_ref()))
    }

    /// 403 naming the access-control dimension that rejected the request.
    pub fn forbidden(dimension: &str) -> Self {
        Self::error(StatusCode::FORBIDDEN, format!("{} access denied", dimension))
    }

    pub fn internal() -> Self {
        Self::error(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
    }

    /// An abort with no body (CORS preflight replies, for instance).
    pub fn empty(status: StatusCode) -> Self {
        Self {
            status,
            body: None,
            headers: HeaderMap::new(),
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// The `error` field of the body, if any.
    pub fn error_message(&self) -> Option<&str> {
        self.body.as_ref()?.get("error")?.as_str()
    }
}

/// Mutable state for one request.
#[derive(Debug)]
pub struct RequestContext {
    request_id: String,
    request: InboundRequest,
    facts: HashMap<String, Value>,
    errors: Vec<String>,
    abort: Option<Abort>,
    deadline: Instant,
    route: Option<Arc<Route>>,
    response_headers: HeaderMap,
    circuit_permit: Option<CircuitPermit>,
}

impl RequestContext {
    pub fn new(request: InboundRequest) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            request,
            facts: HashMap::new(),
            errors: Vec::new(),
            abort: None,
            deadline: Instant::now() + DEFAULT_DEADLINE,
            route: None,
            response_headers: HeaderMap::new(),
            circuit_permit: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn request(&self) -> &InboundRequest {
        &self.request
    }

    /// Mutable access for pre-request filters.
    pub fn request_mut(&mut self) -> &mut InboundRequest {
        &mut self.request
    }

    pub fn set_fact(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.facts.insert(key.into(), value.into());
    }

    pub fn fact(&self, key: &str) -> Option<&Value> {
        self.facts.get(key)
    }

    pub fn fact_str(&self, key: &str) -> Option<&str> {
        self.facts.get(key).and_then(Value::as_str)
    }

    pub fn facts(&self) -> &HashMap<String, Value> {
        &self.facts
    }

    pub fn push_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Record the terminal abort state.
    ///
    /// Returns `false` when the context was already aborted; the earlier
    /// abort is kept.
    pub fn abort(&mut self, abort: Abort) -> bool {
        if self.abort.is_some() {
            return false;
        }
        self.abort = Some(abort);
        true
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_some()
    }

    pub fn abort_state(&self) -> Option<&Abort> {
        self.abort.as_ref()
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the request deadline.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn set_route(&mut self, route: Arc<Route>) {
        self.route = Some(route);
    }

    pub fn route(&self) -> Option<&Arc<Route>> {
        self.route.as_ref()
    }

    /// Held until the proxy reports the upstream outcome. Dropping the
    /// context without taking it releases the breaker slot.
    pub fn set_circuit_permit(&mut self, permit: CircuitPermit) {
        self.circuit_permit = Some(permit);
    }

    pub fn take_circuit_permit(&mut self) -> Option<CircuitPermit> {
        self.circuit_permit.take()
    }

    /// Headers to merge into whatever response is eventually written.
    pub fn response_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    pub fn response_headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.response_headers
    }
}
