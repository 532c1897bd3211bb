//! Cross-origin resource sharing.
//!
//! Requests without an `Origin` header are not CORS requests and pass
//! untouched. Preflights are answered here and never reach a backend.

use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::{Abort, RequestContext};
use crate::error::{BuildError, BuildResult};
use crate::pipeline::{Flow, Handler};

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CorsConfig {
    pub name: String,
    pub enabled: bool,
    /// Exact origins, or `*` for any.
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub exposed_headers: Vec<String>,
    pub allow_credentials: bool,
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            name: "cors".to_string(),
            enabled: false,
            allowed_origins: vec!["*".to_string()],
            allowed_methods: ["GET", "POST", "PUT", "DELETE", "PATCH", "OPTIONS"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            allowed_headers: vec!["content-type".to_string(), "authorization".to_string()],
            exposed_headers: Vec::new(),
            allow_credentials: false,
            max_age_secs: 3600,
        }
    }
}

pub struct CorsHandler {
    config: CorsConfig,
    any_origin: bool,
    allow_methods: HeaderValue,
    allow_headers: HeaderValue,
    expose_headers: Option<HeaderValue>,
    max_age: HeaderValue,
}

fn joined(component: &str, field: &'static str, values: &[String]) -> BuildResult<HeaderValue> {
    HeaderValue::from_str(&values.join(", "))
        .map_err(|e| BuildError::invalid(component, field, e.to_string()))
}

impl CorsHandler {
    pub fn new(config: CorsConfig) -> BuildResult<Self> {
        let name = config.name.clone();
        if config.allowed_origins.is_empty() {
            return Err(BuildError::missing(name, "allowed_origins"));
        }
        for method in &config.allowed_methods {
            method
                .parse::<Method>()
                .map_err(|e| BuildError::invalid(name.clone(), "allowed_methods", e.to_string()))?;
        }
        let any_origin = config.allowed_origins.iter().any(|o| o == "*");
        if any_origin && config.allow_credentials {
            return Err(BuildError::invalid(
                name,
                "allow_credentials",
                "cannot be combined with a `*` origin",
            ));
        }

        Ok(Self {
            any_origin,
            allow_methods: joined(&name, "allowed_methods", &config.allowed_methods)?,
            allow_headers: joined(&name, "allowed_headers", &config.allowed_headers)?,
            expose_headers: if config.exposed_headers.is_empty() {
                None
            } else {
                Some(joined(&name, "exposed_headers", &config.exposed_headers)?)
            },
            max_age: HeaderValue::from(config.max_age_secs),
            config,
        })
    }

    pub fn origin_allowed(&self, origin: &str) -> bool {
        self.any_origin || self.config.allowed_origins.iter().any(|o| o.eq_ignore_ascii_case(origin))
    }

    fn origin_headers(&self, origin: HeaderValue) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if self.any_origin {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        } else {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
            headers.insert(header::VARY, HeaderValue::from_static("origin"));
        }
        if self.config.allow_credentials {
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }
        headers
    }
}

#[async_trait]
impl Handler for CorsHandler {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn config(&self) -> Value {
        serde_json::to_value(&self.config).unwrap_or(Value::Null)
    }

    async fn handle(&self, ctx: &mut RequestContext) -> Flow {
        if !self.config.enabled {
            return Flow::Continue;
        }
        let Some(origin) = ctx.request().headers.get(header::ORIGIN).cloned() else {
            return Flow::Continue;
        };

        let allowed = origin.to_str().map(|o| self.origin_allowed(o)).unwrap_or(false);
        if !allowed {
            tracing::debug!(
                request_id = %ctx.request_id(),
                origin = ?origin,
                "CORS origin rejected"
            );
            ctx.push_error("cors: origin not allowed");
            return Flow::Stop(Abort::error(StatusCode::FORBIDDEN, "CORS origin not allowed"));
        }

        let headers = self.origin_headers(origin);
        let preflight = ctx.request().method == Method::OPTIONS
            && ctx.request().headers.contains_key(header::ACCESS_CONTROL_REQUEST_METHOD);

        if preflight {
            let mut abort = Abort::empty(StatusCode::NO_CONTENT);
            abort.headers.extend(headers);
            abort
                .headers
                .insert(header::ACCESS_CONTROL_ALLOW_METHODS, self.allow_methods.clone());
            abort
                .headers
                .insert(header::ACCESS_CONTROL_ALLOW_HEADERS, self.allow_headers.clone());
            abort.headers.insert(header::ACCESS_CONTROL_MAX_AGE, self.max_age.clone());
            return Flow::Stop(abort);
        }

        ctx.response_headers_mut().extend(headers);
        if let Some(expose) = &self.expose_headers {
            ctx.response_headers_mut()
                .insert(header::ACCESS_CONTROL_EXPOSE_HEADERS, expose.clone());
        }
        Flow::Continue
    }
}
