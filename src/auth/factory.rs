//! Strategy tag → authenticator.

use crate::auth::{
    ApiKeyAuthenticator, AuthBase, AuthConfig, AuthStrategy, Authenticator, BasicAuthenticator,
    CompositeAuthenticator, JwtAuthenticator, NoAuthenticator, OAuth2Authenticator,
};
use crate::error::{BuildError, BuildResult};
use crate::pipeline::Handler;

/// Builds authenticators from declarative configuration.
///
/// Every failure here is a construction error: a pipeline whose auth config
/// does not build refuses to start instead of silently skipping authentication.
pub struct AuthenticatorFactory;

impl AuthenticatorFactory {
    pub fn build(config: &AuthConfig) -> BuildResult<Authenticator> {
        let strategy: AuthStrategy = config.strategy.parse()?;
        let base = AuthBase::from_config(config, strategy)?;

        let authenticator = match strategy.composite_parts() {
            Some((mode, parts)) => {
                let members = parts
                    .iter()
                    .map(|part| Self::member(config, &base, *part))
                    .collect::<BuildResult<Vec<_>>>()?;
                Authenticator::Composite(CompositeAuthenticator::new(
                    base, strategy, mode, members,
                )?)
            }
            None => Self::single(config, base, strategy)?,
        };

        authenticator.validate()?;
        tracing::debug!(
            name = %authenticator.name(),
            strategy = %strategy,
            enabled = authenticator.is_enabled(),
            "Authenticator built"
        );
        Ok(authenticator)
    }

    /// A composite member: same config sections, no exclusions of its own.
    fn member(config: &AuthConfig, parent: &AuthBase, strategy: AuthStrategy) -> BuildResult<Authenticator> {
        let base = AuthBase::named(format!("{}/{}", parent.name, strategy));
        Self::single(config, base, strategy)
    }

    fn single(config: &AuthConfig, base: AuthBase, strategy: AuthStrategy) -> BuildResult<Authenticator> {
        let authenticator = match strategy {
            AuthStrategy::None => Authenticator::None(NoAuthenticator::new(base)),
            AuthStrategy::Jwt => {
                Authenticator::Jwt(JwtAuthenticator::new(base, config.jwt.clone().unwrap_or_default())?)
            }
            AuthStrategy::ApiKey => Authenticator::ApiKey(ApiKeyAuthenticator::new(
                base,
                config.api_key.clone().unwrap_or_default(),
            )?),
            AuthStrategy::Basic => Authenticator::Basic(BasicAuthenticator::new(
                base,
                config.basic.clone().unwrap_or_default(),
            )?),
            AuthStrategy::OAuth2 => Authenticator::OAuth2(OAuth2Authenticator::new(
                base,
                config.oauth2.clone().unwrap_or_default(),
            )?),
            AuthStrategy::JwtAndApiKey | AuthStrategy::JwtOrApiKey => {
                return Err(BuildError::invalid(
                    base.name,
                    "strategy",
                    "composite strategies cannot be nested",
                ));
            }
        };
        Ok(authenticator)
    }
}
