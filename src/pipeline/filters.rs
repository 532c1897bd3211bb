//! Request and response transformation filters.
//!
//! Pre-filters run as the last route-stage handler, after every policy and
//! identity check has passed. Post-filters are applied to the upstream
//! response by the proxy.

use std::collections::BTreeMap;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::RequestContext;
use crate::error::{BuildError, BuildResult};
use crate::pipeline::{Flow, Handler};

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RewriteConfig {
    /// Regex applied to the path.
    pub pattern: String,
    /// Replacement, `$1`-style groups allowed.
    pub replacement: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct FilterConfig {
    pub enabled: Option<bool>,
    pub add_request_headers: BTreeMap<String, String>,
    pub remove_request_headers: Vec<String>,
    pub strip_prefix: Option<String>,
    pub rewrite_path: Option<RewriteConfig>,
    pub add_response_headers: BTreeMap<String, String>,
    pub remove_response_headers: Vec<String>,
}

impl FilterConfig {
    pub fn is_empty(&self) -> bool {
        self.add_request_headers.is_empty()
            && self.remove_request_headers.is_empty()
            && self.strip_prefix.is_none()
            && self.rewrite_path.is_none()
            && self.add_response_headers.is_empty()
            && self.remove_response_headers.is_empty()
    }
}

#[derive(Debug)]
pub struct FilterChain {
    name: String,
    config: FilterConfig,
    add_request: Vec<(HeaderName, HeaderValue)>,
    remove_request: Vec<HeaderName>,
    rewrite: Option<(Regex, String)>,
    add_response: Vec<(HeaderName, HeaderValue)>,
    remove_response: Vec<HeaderName>,
}

fn header_pairs(
    component: &str,
    field: &'static str,
    map: &BTreeMap<String, String>,
) -> BuildResult<Vec<(HeaderName, HeaderValue)>> {
    map.iter()
        .map(|(name, value)| {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| BuildError::invalid(component, field, format!("`{}`: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| BuildError::invalid(component, field, e.to_string()))?;
            Ok((name, value))
        })
        .collect()
}

fn header_names(component: &str, field: &'static str, names: &[String]) -> BuildResult<Vec<HeaderName>> {
    names
        .iter()
        .map(|name| {
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| BuildError::invalid(component, field, format!("`{}`: {}", name, e)))
        })
        .collect()
}

impl FilterChain {
    pub fn new(name: impl Into<String>, config: FilterConfig) -> BuildResult<Self> {
        let name = name.into();
        let rewrite = match &config.rewrite_path {
            Some(rewrite) => {
                let re = Regex::new(&rewrite.pattern)
                    .map_err(|e| BuildError::invalid(name.clone(), "rewrite_path", e.to_string()))?;
                Some((re, rewrite.replacement.clone()))
            }
            None => None,
        };
        if config.strip_prefix.as_deref().is_some_and(|p| !p.starts_with('/')) {
            return Err(BuildError::invalid(name, "strip_prefix", "must start with `/`"));
        }

        Ok(Self {
            add_request: header_pairs(&name, "add_request_headers", &config.add_request_headers)?,
            remove_request: header_names(&name, "remove_request_headers", &config.remove_request_headers)?,
            add_response: header_pairs(&name, "add_response_headers", &config.add_response_headers)?,
            remove_response: header_names(&name, "remove_response_headers", &config.remove_response_headers)?,
            rewrite,
            name,
            config,
        })
    }

    /// Rewrite a path: strip the prefix first, then apply the regex.
    pub fn rewrite(&self, path: &str) -> String {
        let mut path = path.to_string();
        if let Some(prefix) = &self.config.strip_prefix {
            if let Some(rest) = path.strip_prefix(prefix.as_str()) {
                path = if rest.starts_with('/') {
                    rest.to_string()
                } else {
                    format!("/{}", rest)
                };
            }
        }
        if let Some((re, replacement)) = &self.rewrite {
            path = re.replace(&path, replacement.as_str()).into_owned();
        }
        path
    }

    /// Post-filter: applied to the upstream response headers.
    pub fn apply_response(&self, headers: &mut HeaderMap) {
        for name in &self.remove_response {
            headers.remove(name);
        }
        for (name, value) in &self.add_response {
            headers.insert(name.clone(), value.clone());
        }
    }
}

#[async_trait]
impl Handler for FilterChain {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled.unwrap_or(true)
    }

    fn config(&self) -> Value {
        serde_json::to_value(&self.config).unwrap_or(Value::Null)
    }

    async fn handle(&self, ctx: &mut RequestContext) -> Flow {
        let rewritten = self.rewrite(&ctx.request().path);
        let request = ctx.request_mut();
        for name in &self.remove_request {
            request.headers.remove(name);
        }
        for (name, value) in &self.add_request {
            request.headers.insert(name.clone(), value.clone());
        }
        if rewritten != request.path {
            tracing::debug!(from = %request.path, to = %rewritten, "Path rewritten");
            request.path = rewritten;
        }
        Flow::Continue
    }
}
