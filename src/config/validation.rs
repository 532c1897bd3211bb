//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (routes reference existing backend groups)
//! - Validate value ranges (timeouts > 0, addresses parse, status codes)
//! - Detect duplicate route and backend identifiers
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system; handler construction
//!   (`Pipeline::from_config`) is the second gate

use std::collections::HashSet;
use std::net::SocketAddr;

use regex::Regex;
use thiserror::Error;

use crate::auth::{AuthConfig, AuthStrategy};
use crate::config::schema::GatewayConfig;
use crate::routing::{MatchType, PredicateSource};
use crate::security::RateLimitConfig;

/// One semantic problem in a configuration file.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

fn check_addr(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(field, format!("`{}` is not a socket address", value)));
    }
}

fn check_auth(errors: &mut Vec<ValidationError>, field: &str, auth: &AuthConfig) {
    if auth.strategy.parse::<AuthStrategy>().is_err() {
        errors.push(ValidationError::new(
            format!("{}.strategy", field),
            format!("unknown strategy `{}`", auth.strategy),
        ));
    }
    if let Some(api_key) = &auth.api_key {
        if !(400..=599).contains(&api_key.error_status_code) {
            errors.push(ValidationError::new(
                format!("{}.api_key.error_status_code", field),
                "must be between 400 and 599",
            ));
        }
    }
}

fn check_rate_limit(errors: &mut Vec<ValidationError>, field: &str, rl: &RateLimitConfig) {
    if rl.requests_per_second == 0 {
        errors.push(ValidationError::new(
            format!("{}.requests_per_second", field),
            "must be positive",
        ));
    }
    if rl.burst_size == 0 {
        errors.push(ValidationError::new(format!("{}.burst_size", field), "must be positive"));
    }
}

/// Check everything serde cannot.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_addr(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be positive"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be positive"));
    }
    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::new("timeouts.connect_secs", "must be positive"));
    }

    let level = config.observability.log_level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("`{}` is not one of {}", config.observability.log_level, LOG_LEVELS.join(", ")),
        ));
    }
    if config.observability.metrics_enabled {
        check_addr(&mut errors, "observability.metrics_address", &config.observability.metrics_address);
    }

    if config.admin.enabled {
        check_addr(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::new("admin.api_key", "required when admin is enabled"));
        }
    }

    if let Some(auth) = &config.global.auth {
        check_auth(&mut errors, "global.auth", auth);
    }
    if let Some(rl) = &config.global.rate_limit {
        check_rate_limit(&mut errors, "global.rate_limit", rl);
    }

    let mut groups = HashSet::new();
    let mut backend_names = HashSet::new();
    for (i, backend) in config.backends.iter().enumerate() {
        let field = format!("backends[{}]", i);
        if backend.name.is_empty() {
            errors.push(ValidationError::new(format!("{}.name", field), "must not be empty"));
        } else if !backend_names.insert(backend.name.as_str()) {
            errors.push(ValidationError::new(
                format!("{}.name", field),
                format!("duplicate backend `{}`", backend.name),
            ));
        }
        if backend.group.is_empty() {
            errors.push(ValidationError::new(format!("{}.group", field), "must not be empty"));
        }
        check_addr(&mut errors, &format!("{}.address", field), &backend.address);
        if backend.max_connections == 0 {
            errors.push(ValidationError::new(format!("{}.max_connections", field), "must be positive"));
        }
        groups.insert(backend.group.as_str());
    }

    let mut route_ids = HashSet::new();
    for (i, route) in config.routes.iter().enumerate() {
        let field = format!("routes[{}]", i);
        if route.id.is_empty() {
            errors.push(ValidationError::new(format!("{}.id", field), "must not be empty"));
        } else if !route_ids.insert(route.id.as_str()) {
            errors.push(ValidationError::new(
                format!("{}.id", field),
                format!("duplicate route `{}`", route.id),
            ));
        }
        if route.path.is_empty() {
            errors.push(ValidationError::new(format!("{}.path", field), "must not be empty"));
        } else if route.match_type == MatchType::Regex {
            if let Err(e) = Regex::new(&route.path) {
                errors.push(ValidationError::new(format!("{}.path", field), e.to_string()));
            }
        }
        for method in &route.methods {
            if method.trim().to_ascii_uppercase().parse::<axum::http::Method>().is_err() {
                errors.push(ValidationError::new(
                    format!("{}.methods", field),
                    format!("invalid method `{}`", method),
                ));
            }
        }
        if !groups.contains(route.backend_group.as_str()) {
            errors.push(ValidationError::new(
                format!("{}.backend_group", field),
                format!("unknown backend group `{}`", route.backend_group),
            ));
        }
        if let Some(assertions) = &route.assertions {
            if assertions.predicates.iter().any(|p| p.source == PredicateSource::Body) {
                errors.push(ValidationError::new(
                    format!("{}.assertions", field),
                    "body predicates are not supported",
                ));
            }
        }
        if let Some(auth) = &route.auth {
            check_auth(&mut errors, &format!("{}.auth", field), auth);
        }
        if let Some(rl) = &route.rate_limit {
            check_rate_limit(&mut errors, &format!("{}.rate_limit", field), rl);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{BackendConfig, RouteConfig};

    fn valid() -> GatewayConfig {
        GatewayConfig {
            routes: vec![RouteConfig {
                id: "api".into(),
                path: "/api".into(),
                backend_group: "api".into(),
                ..Default::default()
            }],
            backends: vec![BackendConfig {
                name: "api-1".into(),
                group: "api".into(),
                address: "127.0.0.1:3000".into(),
                max_connections: 10,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert_eq!(validate_config(&valid()), Ok(()));
    }

    #[test]
    fn test_all_errors_are_collected() {
        let mut config = valid();
        config.routes[0].backend_group = "missing".into();
        config.routes.push(config.routes[0].clone());
        config.global.auth = Some(AuthConfig {
            strategy: "magic".into(),
            ..Default::default()
        });
        config.observability.log_level = "loud".into();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"routes[0].backend_group"));
        assert!(fields.contains(&"routes[1].id"));
        assert!(fields.contains(&"global.auth.strategy"));
        assert!(fields.contains(&"observability.log_level"));
    }

    #[test]
    fn test_bad_backend_address() {
        let mut config = valid();
        config.backends[0].address = "not-an-address".into();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "backends[0].address");
    }
}
