//! HTTP Basic strategy against a single configured credential pair.

use async_trait::async_trait;
use axum::http::{header, HeaderValue};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::Value;
use subtle::ConstantTimeEq;

use crate::auth::{reject, AuthBase, AuthStrategy, BasicConfig};
use crate::context::{keys, Abort, InboundRequest, RequestContext};
use crate::error::{BuildError, BuildResult};
use crate::pipeline::{Flow, Handler};

pub struct BasicAuthenticator {
    base: AuthBase,
    config: BasicConfig,
    challenge: HeaderValue,
}

/// Why credentials could not be read from the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractError {
    Missing,
    WrongScheme,
    Malformed,
}

impl ExtractError {
    fn reason(&self) -> &'static str {
        match self {
            ExtractError::Missing => "missing Basic credentials",
            ExtractError::WrongScheme => "authorization scheme is not Basic",
            ExtractError::Malformed => "malformed Basic credentials",
        }
    }
}

impl BasicAuthenticator {
    pub(crate) fn base_mut(&mut self) -> &mut AuthBase {
        &mut self.base
    }

    pub fn new(base: AuthBase, config: BasicConfig) -> BuildResult<Self> {
        config.validate(&base.name)?;
        let challenge = HeaderValue::from_str(&format!("Basic realm=\"{}\"", config.realm))
            .map_err(|e| BuildError::invalid(base.name.clone(), "realm", e.to_string()))?;

        Ok(Self {
            base,
            config,
            challenge,
        })
    }

    /// Decode `Authorization: Basic <base64(user:pass)>`.
    pub fn extract(request: &InboundRequest) -> Result<(String, String), ExtractError> {
        let value = request
            .header(header::AUTHORIZATION.as_str())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(ExtractError::Missing)?;

        let (scheme, encoded) = value.split_once(' ').ok_or(ExtractError::WrongScheme)?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return Err(ExtractError::WrongScheme);
        }

        let decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|_| ExtractError::Malformed)?;
        let decoded = String::from_utf8(decoded).map_err(|_| ExtractError::Malformed)?;
        let (username, password) = decoded.split_once(':').ok_or(ExtractError::Malformed)?;

        Ok((username.to_string(), password.to_string()))
    }

    fn credentials_match(&self, username: &str, password: &str) -> bool {
        let user_ok = username.as_bytes().ct_eq(self.config.username.as_bytes());
        let pass_ok = password.as_bytes().ct_eq(self.config.password.as_bytes());
        bool::from(user_ok & pass_ok)
    }

    fn fail(&self, ctx: &mut RequestContext, reason: &str) -> Flow {
        let abort = Abort::unauthorized(reason)
            .with_header(header::WWW_AUTHENTICATE, self.challenge.clone());
        reject(ctx, AuthStrategy::Basic, &self.base, reason, abort)
    }
}

#[async_trait]
impl Handler for BasicAuthenticator {
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
        self.base.snapshot(AuthStrategy::Basic, settings)
    }

    async fn handle(&self, ctx: &mut RequestContext) -> Flow {
        if self.base.skips(ctx.request()) {
            return Flow::Continue;
        }

        let (username, password) = match Self::extract(ctx.request()) {
            Ok(credentials) => credentials,
            Err(e) => return self.fail(ctx, e.reason()),
        };

        if !self.credentials_match(&username, &password) {
            return self.fail(ctx, "invalid username or password");
        }

        ctx.set_fact(keys::AUTH_METHOD, AuthStrategy::Basic.as_str());
        ctx.set_fact(keys::USER_ID, username);
        Flow::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Method, StatusCode};

    fn authenticator() -> BasicAuthenticator {
        BasicAuthenticator::new(
            AuthBase::named("basic"),
            BasicConfig {
                username: "admin".into(),
                password: "s3cret!".into(),
                realm: "gateway".into(),
            },
        )
        .unwrap()
    }

    fn request(username: &str, password: &str) -> RequestContext {
        let encoded = STANDARD.encode(format!("{}:{}", username, password));
        RequestContext::new(
            InboundRequest::new(Method::GET, "/admin")
                .with_header("authorization", &format!("Basic {}", encoded)),
        )
    }

    #[tokio::test]
    async fn test_round_trip_succeeds() {
        let auth = authenticator();
        let mut ctx = request("admin", "s3cret!");

        assert!(auth.handle(&mut ctx).await.is_continue());
        assert_eq!(ctx.fact_str(keys::AUTH_METHOD), Some("basic"));
        assert_eq!(ctx.fact_str(keys::USER_ID), Some("admin"));
    }

    #[tokio::test]
    async fn test_any_single_character_mutation_fails() {
        let auth = authenticator();
        let mutate = |s: &str, i: usize| -> String {
            s.char_indices()
                .map(|(j, c)| if j == i { if c == 'x' { 'y' } else { 'x' } } else { c })
                .collect()
        };

        for i in 0.."admin".len() {
            let mut ctx = request(&mutate("admin", i), "s3cret!");
            assert!(!auth.handle(&mut ctx).await.is_continue(), "username mutation at {}", i);
        }
        for i in 0.."s3cret!".len() {
            let mut ctx = request("admin", &mutate("s3cret!", i));
            assert!(!auth.handle(&mut ctx).await.is_continue(), "password mutation at {}", i);
        }
    }

    #[tokio::test]
    async fn test_failure_carries_challenge() {
        let auth = authenticator();
        let mut ctx = request("admin", "wrong");

        match auth.handle(&mut ctx).await {
            Flow::Stop(abort) => {
                assert_eq!(abort.status, StatusCode::UNAUTHORIZED);
                assert_eq!(
                    abort.headers.get(header::WWW_AUTHENTICATE).unwrap(),
                    "Basic realm=\"gateway\""
                );
                assert_eq!(
                    abort.error_message(),
                    Some("Unauthorized: invalid username or password")
                );
            }
            Flow::Continue => panic!("wrong password accepted"),
        }
    }

    #[tokio::test]
    async fn test_password_may_contain_colon() {
        let auth = BasicAuthenticator::new(
            AuthBase::named("basic"),
            BasicConfig {
                username: "svc".into(),
                password: "a:b:c".into(),
                realm: "r".into(),
            },
        )
        .unwrap();
        let mut ctx = request("svc", "a:b:c");
        assert!(auth.handle(&mut ctx).await.is_continue());
    }

    #[test]
    fn test_extract_errors() {
        let missing = InboundRequest::new(Method::GET, "/");
        assert_eq!(BasicAuthenticator::extract(&missing), Err(ExtractError::Missing));

        let bearer = InboundRequest::new(Method::GET, "/").with_header("authorization", "Bearer abc");
        assert_eq!(BasicAuthenticator::extract(&bearer), Err(ExtractError::WrongScheme));

        let garbage = InboundRequest::new(Method::GET, "/").with_header("authorization", "Basic !!!");
        assert_eq!(BasicAuthenticator::extract(&garbage), Err(ExtractError::Malformed));

        let no_colon = InboundRequest::new(Method::GET, "/")
            .with_header("authorization", &format!("Basic {}", STANDARD.encode("nocolon")));
        assert_eq!(BasicAuthenticator::extract(&no_colon), Err(ExtractError::Malformed));
    }

    #[test]
    fn test_missing_password_is_build_error() {
        let err = BasicAuthenticator::new(
            AuthBase::named("basic"),
            BasicConfig {
                username: "admin".into(),
                ..Default::default()
            },
        )
        .err()
        .unwrap();
        assert!(matches!(err, BuildError::MissingField { field: "password", .. }));
    }
}
