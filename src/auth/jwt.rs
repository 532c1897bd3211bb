//! JWT strategy.
//!
//! HS256/HS384/HS512 treat the configured secret as the HMAC key; RS256
//! treats it as a PEM-encoded public key. Expiration and issuer checks are
//! individually switchable.

use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::auth::{unauthorized, AuthBase, AuthStrategy, JwtConfig};
use crate::context::{keys, InboundRequest, RequestContext};
use crate::error::{BuildError, BuildResult};
use crate::pipeline::{Flow, Handler};

/// Response header set when the token is inside its refresh window.
pub const TOKEN_REFRESH_HEADER: &str = "x-token-refresh";

/// Errors from issuing tokens.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token issuing requires an HMAC algorithm")]
    IssueUnsupported,

    #[error("failed to sign token: {0}")]
    Sign(#[from] jsonwebtoken::errors::Error),
}

pub struct JwtAuthenticator {
    base: AuthBase,
    config: JwtConfig,
    algorithm: Algorithm,
    decoding_key: DecodingKey,
    encoding_key: Option<EncodingKey>,
    validation: Validation,
    echo_header: Option<HeaderName>,
}

/// Parse a supported algorithm name.
pub fn parse_algorithm(name: &str) -> Option<Algorithm> {
    match name.trim().to_ascii_uppercase().as_str() {
        "HS256" => Some(Algorithm::HS256),
        "HS384" => Some(Algorithm::HS384),
        "HS512" => Some(Algorithm::HS512),
        "RS256" => Some(Algorithm::RS256),
        _ => None,
    }
}

impl JwtAuthenticator {
    pub(crate) fn base_mut(&mut self) -> &mut AuthBase {
        &mut self.base
    }

    pub fn new(base: AuthBase, config: JwtConfig) -> BuildResult<Self> {
        let component = base.name.clone();

        if config.secret.is_empty() {
            return Err(BuildError::missing(component, "secret"));
        }
        if config.algorithm.trim().is_empty() {
            return Err(BuildError::missing(component, "algorithm"));
        }
        let algorithm = parse_algorithm(&config.algorithm).ok_or_else(|| {
            BuildError::invalid(
                component.clone(),
                "algorithm",
                format!("`{}` is not one of HS256, HS384, HS512, RS256", config.algorithm),
            )
        })?;
        if config.expiration_secs <= 0 {
            return Err(BuildError::invalid(component, "expiration_secs", "must be positive"));
        }
        if config.verify_issuer && config.issuer.is_empty() {
            return Err(BuildError::missing(component, "issuer"));
        }
        if config.header_name.trim().is_empty() {
            return Err(BuildError::missing(component, "header_name"));
        }

        let (decoding_key, encoding_key) = match algorithm {
            Algorithm::RS256 => {
                let key = DecodingKey::from_rsa_pem(config.secret.as_bytes())
                    .map_err(|e| BuildError::invalid(component.clone(), "secret", e.to_string()))?;
                (key, None)
            }
            _ => (
                DecodingKey::from_secret(config.secret.as_bytes()),
                Some(EncodingKey::from_secret(config.secret.as_bytes())),
            ),
        };

        let echo_header = config
            .echo_subject_header
            .as_deref()
            .map(|name| {
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                    BuildError::invalid(component.clone(), "echo_subject_header", e.to_string())
                })
            })
            .transpose()?;

        let mut validation = Validation::new(algorithm);
        validation.leeway = config.leeway_secs;
        validation.validate_aud = false;
        validation.validate_exp = config.verify_expiration;
        if config.verify_expiration {
            validation.set_required_spec_claims(&["exp"]);
        } else {
            validation.set_required_spec_claims::<&str>(&[]);
        }
        if config.verify_issuer {
            validation.set_issuer(&[config.issuer.as_str()]);
        }

        Ok(Self {
            base,
            config,
            algorithm,
            decoding_key,
            encoding_key,
            validation,
            echo_header,
        })
    }

    /// Token from the configured header, with or without a `Bearer` prefix.
    pub fn extract(&self, request: &InboundRequest) -> Option<String> {
        let value = request.header(&self.config.header_name)?.trim();
        let token = match value.split_once(' ') {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
            _ => value,
        };
        (!token.is_empty()).then(|| token.to_string())
    }

    /// Verify a token and return its claim set, or a client-facing reason.
    pub fn verify(&self, token: &str) -> Result<Map<String, Value>, String> {
        decode::<Map<String, Value>>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => "token has expired".to_string(),
                ErrorKind::InvalidSignature => "invalid token signature".to_string(),
                ErrorKind::InvalidIssuer => "invalid token issuer".to_string(),
                ErrorKind::InvalidAlgorithm => "token algorithm not accepted".to_string(),
                ErrorKind::ImmatureSignature => "token is not yet valid".to_string(),
                ErrorKind::MissingRequiredClaim(claim) => {
                    format!("token missing required claim `{}`", claim)
                }
                _ => "malformed token".to_string(),
            })
    }

    /// Sign a token for `subject` valid for `expiration_secs`.
    pub fn issue_token(&self, subject: &str, roles: &[String]) -> Result<String, TokenError> {
        let key = self.encoding_key.as_ref().ok_or(TokenError::IssueUnsupported)?;
        let now = jsonwebtoken::get_current_timestamp();

        let mut claims = json!({
            "sub": subject,
            "roles": roles,
            "iat": now,
            "exp": now + self.config.expiration_secs as u64,
        });
        if !self.config.issuer.is_empty() {
            claims["iss"] = Value::String(self.config.issuer.clone());
        }

        Ok(encode(&Header::new(self.algorithm), &claims, key)?)
    }

    fn refresh_due(&self, claims: &Map<String, Value>) -> bool {
        if self.config.refresh_window_secs == 0 {
            return false;
        }
        let Some(exp) = claims.get("exp").and_then(Value::as_u64) else {
            return false;
        };
        let now = jsonwebtoken::get_current_timestamp();
        exp >= now && exp - now <= self.config.refresh_window_secs
    }
}

#[async_trait]
impl Handler for JwtAuthenticator {
    fn name(&self) -> &str {
        &self.base.name
    }

    fn is_enabled(&self) -> bool {
        self.base.enabled
    }

    fn config(&self) -> Value {
        let settings = serde_json::to_value(&self.config).unwrap_or(Value::Null);
        self.base.snapshot(AuthStrategy::Jwt, settings)
    }

    async fn handle(&self, ctx: &mut RequestContext) -> Flow {
        if self.base.skips(ctx.request()) {
            return Flow::Continue;
        }

        let Some(token) = self.extract(ctx.request()) else {
            return unauthorized(ctx, AuthStrategy::Jwt, &self.base, "missing token");
        };

        let claims = match self.verify(&token) {
            Ok(claims) => claims,
            Err(reason) => return unauthorized(ctx, AuthStrategy::Jwt, &self.base, &reason),
        };

        let Some(subject) = claims.get("sub").and_then(Value::as_str).map(str::to_string) else {
            return unauthorized(
                ctx,
                AuthStrategy::Jwt,
                &self.base,
                "token missing required claim `sub`",
            );
        };

        if let Some(roles) = claims.get("roles").filter(|r| r.is_array()) {
            ctx.set_fact(keys::USER_ROLES, roles.clone());
        }
        if self.refresh_due(&claims) {
            ctx.set_fact(keys::JWT_REFRESH_DUE, true);
            ctx.response_headers_mut().insert(
                HeaderName::from_static(TOKEN_REFRESH_HEADER),
                HeaderValue::from_static("true"),
            );
        }
        if let Some(name) = &self.echo_header {
            if let Ok(value) = HeaderValue::from_str(&subject) {
                ctx.response_headers_mut().insert(name.clone(), value);
            }
        }

        ctx.set_fact(keys::AUTH_METHOD, AuthStrategy::Jwt.as_str());
        ctx.set_fact(keys::USER_ID, subject);
        ctx.set_fact(keys::JWT_CLAIMS, Value::Object(claims));
        ctx.set_fact(keys::JWT_TOKEN, token);
        Flow::Continue
    }
}
