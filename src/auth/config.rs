//! Authenticator configuration schema.
//!
//! One [`AuthConfig`] describes one authenticator. Strategy-specific fields
//! live in typed sub-sections; `extra` is an open map for forward-compatible
//! settings that nothing validates.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::{BuildError, BuildResult};

/// The closed set of authentication strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AuthStrategy {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "jwt")]
    Jwt,
    #[serde(rename = "api-key")]
    ApiKey,
    #[serde(rename = "basic")]
    Basic,
    #[serde(rename = "oauth2")]
    OAuth2,
    #[serde(rename = "jwt-and-api-key")]
    JwtAndApiKey,
    #[serde(rename = "jwt-or-api-key")]
    JwtOrApiKey,
}

/// How a composite combines its members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompositeMode {
    And,
    Or,
}

impl AuthStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthStrategy::None => "none",
            AuthStrategy::Jwt => "jwt",
            AuthStrategy::ApiKey => "api-key",
            AuthStrategy::Basic => "basic",
            AuthStrategy::OAuth2 => "oauth2",
            AuthStrategy::JwtAndApiKey => "jwt-and-api-key",
            AuthStrategy::JwtOrApiKey => "jwt-or-api-key",
        }
    }

    /// Mode and members implied by a composite tag.
    pub fn composite_parts(&self) -> Option<(CompositeMode, [AuthStrategy; 2])> {
        match self {
            AuthStrategy::JwtAndApiKey => {
                Some((CompositeMode::And, [AuthStrategy::Jwt, AuthStrategy::ApiKey]))
            }
            AuthStrategy::JwtOrApiKey => {
                Some((CompositeMode::Or, [AuthStrategy::Jwt, AuthStrategy::ApiKey]))
            }
            _ => None,
        }
    }
}

impl fmt::Display for AuthStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthStrategy {
    type Err = BuildError;

    /// Case-insensitive; `_` and `-` are interchangeable and `api-key` may be
    /// written `apikey`.
    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        let normalized = tag.trim().to_ascii_lowercase().replace('_', "-");
        let compact = normalized.replace("api-key", "apikey");

        let strategy = match compact.as_str() {
            "none" | "noauth" | "no-auth" => AuthStrategy::None,
            "jwt" => AuthStrategy::Jwt,
            "apikey" => AuthStrategy::ApiKey,
            "basic" | "basic-auth" | "basicauth" => AuthStrategy::Basic,
            "oauth2" | "oauth" | "oauth-2" => AuthStrategy::OAuth2,
            "jwt-and-apikey" | "jwt+apikey" | "jwt&apikey" => AuthStrategy::JwtAndApiKey,
            "jwt-or-apikey" | "jwt|apikey" => AuthStrategy::JwtOrApiKey,
            _ => return Err(BuildError::UnknownStrategy(tag.to_string())),
        };
        Ok(strategy)
    }
}

/// Declarative description of one authenticator.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    pub id: String,
    pub enabled: bool,
    /// Strategy tag, normalized by the factory.
    pub strategy: String,
    pub name: String,
    /// Path patterns (`*` wildcards) that bypass authentication.
    pub excluded_paths: Vec<String>,
    pub jwt: Option<JwtConfig>,
    pub api_key: Option<ApiKeyConfig>,
    pub basic: Option<BasicConfig>,
    pub oauth2: Option<OAuth2Config>,
    /// Unvalidated extension settings.
    pub extra: HashMap<String, serde_json::Value>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            enabled: true,
            strategy: "none".to_string(),
            name: String::new(),
            excluded_paths: Vec::new(),
            jwt: None,
            api_key: None,
            basic: None,
            oauth2: None,
            extra: HashMap::new(),
        }
    }
}

/// Where an API key is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum KeyLocation {
    #[default]
    Header,
    Query,
    Cookie,
}

impl KeyLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyLocation::Header => "header",
            KeyLocation::Query => "query",
            KeyLocation::Cookie => "cookie",
        }
    }
}

/// One accepted API key.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ApiKeyEntry {
    pub name: String,
    #[serde(skip_serializing)]
    pub value: String,
    pub roles: Vec<String>,
}

/// API key strategy settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiKeyConfig {
    pub param_name: String,
    pub location: KeyLocation,
    /// Ordered; first match wins. Empty accepts any non-empty key.
    pub keys: Vec<ApiKeyEntry>,
    pub prefix_match: bool,
    pub error_status_code: u16,
}

impl Default for ApiKeyConfig {
    fn default() -> Self {
        Self {
            param_name: "api-key".to_string(),
            location: KeyLocation::Header,
            keys: Vec::new(),
            prefix_match: false,
            error_status_code: 401,
        }
    }
}

impl ApiKeyConfig {
    pub fn validate(&self, component: &str) -> BuildResult<()> {
        if self.param_name.trim().is_empty() {
            return Err(BuildError::missing(component, "param_name"));
        }
        if !(400..=599).contains(&self.error_status_code)
            || StatusCode::from_u16(self.error_status_code).is_err()
        {
            return Err(BuildError::invalid(
                component,
                "error_status_code",
                format!("{} is outside 400..=599", self.error_status_code),
            ));
        }
        if let Some(index) = self.keys.iter().position(|k| k.value.is_empty()) {
            return Err(BuildError::invalid(
                component,
                "keys",
                format!("entry {} has an empty value", index),
            ));
        }
        Ok(())
    }
}

/// JWT strategy settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct JwtConfig {
    /// HMAC secret, or the PEM public key for RS256.
    #[serde(skip_serializing)]
    pub secret: String,
    pub issuer: String,
    /// Lifetime of tokens issued by this gateway.
    pub expiration_secs: i64,
    pub algorithm: String,
    pub verify_expiration: bool,
    pub verify_issuer: bool,
    pub refresh_window_secs: u64,
    pub leeway_secs: u64,
    /// Header the token is read from.
    pub header_name: String,
    /// Response header that echoes the authenticated subject.
    pub echo_subject_header: Option<String>,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            issuer: String::new(),
            expiration_secs: 3600,
            algorithm: "HS256".to_string(),
            verify_expiration: true,
            verify_issuer: false,
            refresh_window_secs: 300,
            leeway_secs: 0,
            header_name: "Authorization".to_string(),
            echo_subject_header: None,
        }
    }
}

/// Basic strategy settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BasicConfig {
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub realm: String,
}

impl Default for BasicConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            realm: "api-gateway".to_string(),
        }
    }
}

impl BasicConfig {
    pub fn validate(&self, component: &str) -> BuildResult<()> {
        if self.username.is_empty() {
            return Err(BuildError::missing(component, "username"));
        }
        if self.password.is_empty() {
            return Err(BuildError::missing(component, "password"));
        }
        if self.realm.contains('"') {
            return Err(BuildError::invalid(component, "realm", "must not contain quotes"));
        }
        Ok(())
    }
}

/// OAuth2 token introspection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OAuth2Config {
    pub introspection_url: String,
    pub client_id: String,
    #[serde(skip_serializing)]
    pub client_secret: String,
    pub timeout_ms: u64,
    /// Every listed scope must be granted.
    pub required_scopes: Vec<String>,
}

impl Default for OAuth2Config {
    fn default() -> Self {
        Self {
            introspection_url: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            timeout_ms: 5000,
            required_scopes: Vec::new(),
        }
    }
}

impl OAuth2Config {
    pub fn validate(&self, component: &str) -> BuildResult<()> {
        if self.introspection_url.is_empty() {
            return Err(BuildError::missing(component, "introspection_url"));
        }
        url::Url::parse(&self.introspection_url)
            .map_err(|e| BuildError::invalid(component, "introspection_url", e.to_string()))?;
        if self.client_id.is_empty() {
            return Err(BuildError::missing(component, "client_id"));
        }
        if self.timeout_ms == 0 {
            return Err(BuildError::invalid(component, "timeout_ms", "must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_synonyms() {
        for tag in ["apikey", "api_key", "api-key", "API-KEY", " ApiKey "] {
            assert_eq!(tag.parse::<AuthStrategy>().unwrap(), AuthStrategy::ApiKey, "{}", tag);
        }
        assert_eq!("JWT_OR_APIKEY".parse::<AuthStrategy>().unwrap(), AuthStrategy::JwtOrApiKey);
        assert_eq!("jwt_and_api_key".parse::<AuthStrategy>().unwrap(), AuthStrategy::JwtAndApiKey);
        assert_eq!("OAuth".parse::<AuthStrategy>().unwrap(), AuthStrategy::OAuth2);
        assert_eq!("noauth".parse::<AuthStrategy>().unwrap(), AuthStrategy::None);
    }

    #[test]
    fn test_unknown_strategy() {
        let err = "kerberos".parse::<AuthStrategy>().unwrap_err();
        assert_eq!(err, BuildError::UnknownStrategy("kerberos".to_string()));
    }

    #[test]
    fn test_composite_parts() {
        let (mode, members) = AuthStrategy::JwtOrApiKey.composite_parts().unwrap();
        assert_eq!(mode, CompositeMode::Or);
        assert_eq!(members, [AuthStrategy::Jwt, AuthStrategy::ApiKey]);
        assert!(AuthStrategy::Basic.composite_parts().is_none());
    }

    #[test]
    fn test_api_key_defaults() {
        let config = ApiKeyConfig::default();
        assert_eq!(config.param_name, "api-key");
        assert_eq!(config.location, KeyLocation::Header);
        assert!(config.keys.is_empty());
        assert!(!config.prefix_match);
        assert_eq!(config.error_status_code, 401);
        assert!(config.validate("test").is_ok());
    }

    #[test]
    fn test_api_key_status_range() {
        let config = ApiKeyConfig {
            error_status_code: 302,
            ..Default::default()
        };
        assert!(matches!(
            config.validate("test"),
            Err(BuildError::InvalidValue { field: "error_status_code", .. })
        ));
    }

    #[test]
    fn test_jwt_defaults() {
        let config = JwtConfig::default();
        assert_eq!(config.algorithm, "HS256");
        assert!(config.verify_expiration);
        assert!(!config.verify_issuer);
        assert_eq!(config.expiration_secs, 3600);
        assert_eq!(config.refresh_window_secs, 300);
    }

    #[test]
    fn test_secrets_not_serialized() {
        let config = BasicConfig {
            username: "admin".into(),
            password: "hunter2".into(),
            realm: "r".into(),
        };
        let json = serde_json::to_value(&config).unwrap();
        assert!(json.get("password").is_none());
        assert_eq!(json["username"], "admin");
    }

    #[test]
    fn test_unknown_location_rejected() {
        let parsed: Result<ApiKeyConfig, _> = toml::from_str("location = \"body\"");
        assert!(parsed.is_err());
    }
}
