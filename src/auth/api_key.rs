//! API key strategy.
//!
//! Keys are read from a header, query parameter or cookie. With no configured
//! keys every non-empty key is accepted (identification-only deployments);
//! otherwise the first entry that matches, exactly or by prefix, wins.

use async_trait::async_trait;
use axum::http::StatusCode;
use serde_json::Value;
use subtle::ConstantTimeEq;

use crate::auth::{reject, ApiKeyConfig, ApiKeyEntry, AuthBase, AuthStrategy, KeyLocation};
use crate::context::{keys, Abort, InboundRequest, RequestContext};
use crate::error::{BuildError, BuildResult};
use crate::pipeline::{Flow, Handler};

/// User id recorded when keys are accepted without a configured key list.
pub const ANONYMOUS_USER: &str = "anonymous";

/// Outcome of looking an extracted key up in the configured list.
#[derive(Debug, PartialEq)]
pub enum KeyMatch<'a> {
    /// No keys configured; any non-empty key passes.
    PassThrough,
    Entry(&'a ApiKeyEntry),
    NoMatch,
}

pub struct ApiKeyAuthenticator {
    base: AuthBase,
    config: ApiKeyConfig,
    error_status: StatusCode,
}

impl ApiKeyAuthenticator {
    pub(crate) fn base_mut(&mut self) -> &mut AuthBase {
        &mut self.base
    }

    pub fn new(base: AuthBase, config: ApiKeyConfig) -> BuildResult<Self> {
        config.validate(&base.name)?;
        let error_status = StatusCode::from_u16(config.error_status_code)
            .map_err(|e| BuildError::invalid(base.name.clone(), "error_status_code", e.to_string()))?;

        Ok(Self {
            base,
            config,
            error_status,
        })
    }

    /// Read the key from the configured location.
    pub fn extract(&self, request: &InboundRequest) -> Option<String> {
        let raw = match self.config.location {
            KeyLocation::Header => request.header(&self.config.param_name).map(str::to_string),
            KeyLocation::Query => request.query_param(&self.config.param_name),
            KeyLocation::Cookie => request.cookie(&self.config.param_name),
        };
        raw.map(|k| k.trim().to_string()).filter(|k| !k.is_empty())
    }

    /// Look the key up. List order is significant.
    pub fn lookup(&self, key: &str) -> KeyMatch<'_> {
        if self.config.keys.is_empty() {
            return KeyMatch::PassThrough;
        }

        let found = self.config.keys.iter().find(|entry| {
            if self.config.prefix_match {
                key.starts_with(entry.value.as_str())
            } else {
                bool::from(key.as_bytes().ct_eq(entry.value.as_bytes()))
            }
        });

        match found {
            Some(entry) => KeyMatch::Entry(entry),
            None => KeyMatch::NoMatch,
        }
    }

    fn fail(&self, ctx: &mut RequestContext, reason: &str) -> Flow {
        let abort = Abort::error(self.error_status, format!("Unauthorized: {}", reason));
        reject(ctx, AuthStrategy::ApiKey, &self.base, reason, abort)
    }
}

#[async_trait]
impl Handler for ApiKeyAuthenticator {
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
        self.base.snapshot(AuthStrategy::ApiKey, settings)
    }

    async fn handle(&self, ctx: &mut RequestContext) -> Flow {
        if self.base.skips(ctx.request()) {
            return Flow::Continue;
        }

        let key = match self.extract(ctx.request()) {
            Some(key) => key,
            None => {
                let reason = format!("no API Key found in {}", self.config.location.as_str());
                return self.fail(ctx, &reason);
            }
        };

        let (name, roles) = match self.lookup(&key) {
            KeyMatch::PassThrough => (String::new(), Vec::new()),
            KeyMatch::Entry(entry) => (entry.name.clone(), entry.roles.clone()),
            KeyMatch::NoMatch => return self.fail(ctx, "invalid API Key"),
        };

        tracing::debug!(request_id = %ctx.request_id(), key_name = %name, "API key accepted");
        ctx.set_fact(keys::AUTH_METHOD, AuthStrategy::ApiKey.as_str());
        // A named key is the caller's identity; an unnamed one never replaces
        // a subject another strategy already established.
        if !name.is_empty() {
            ctx.set_fact(keys::USER_ID, name.clone());
        } else if ctx.fact(keys::USER_ID).is_none() {
            ctx.set_fact(keys::USER_ID, ANONYMOUS_USER);
        }
        ctx.set_fact(keys::API_KEY_NAME, name);
        if !roles.is_empty() || ctx.fact(keys::USER_ROLES).is_none() {
            ctx.set_fact(keys::USER_ROLES, roles.clone());
        }
        ctx.set_fact(keys::API_KEY_ROLES, roles);
        Flow::Continue
    }
}
