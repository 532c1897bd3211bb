//! Domain (Host header) dimension.

use axum::http::header;
use serde::{Deserialize, Serialize};

use crate::context::InboundRequest;
use crate::security::policy::{evaluate, AccessDimension, DefaultPolicy, Verdict};

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DomainAccessConfig {
    pub enabled: bool,
    pub default_policy: DefaultPolicy,
    pub whitelist: Vec<String>,
    pub blacklist: Vec<String>,
    /// Plain entries also cover their subdomains.
    pub allow_subdomains: bool,
}

pub struct DomainDimension {
    config: DomainAccessConfig,
    whitelist: Vec<String>,
    blacklist: Vec<String>,
}

/// Host header, lowercased, without any `:port` suffix.
pub fn request_host(request: &InboundRequest) -> String {
    let host = request.header(header::HOST.as_str()).unwrap_or("").trim();
    let bare = if let Some(rest) = host.strip_prefix('[') {
        // [v6]:port
        rest.split(']').next().unwrap_or(rest)
    } else {
        match host.rsplit_once(':') {
            Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
            _ => host,
        }
    };
    bare.to_ascii_lowercase()
}

impl DomainDimension {
    pub fn new(config: DomainAccessConfig) -> Self {
        let normalize = |entries: &[String]| {
            entries
                .iter()
                .map(|e| e.trim().to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .collect::<Vec<String>>()
        };
        Self {
            whitelist: normalize(&config.whitelist),
            blacklist: normalize(&config.blacklist),
            config,
        }
    }

    pub fn config(&self) -> &DomainAccessConfig {
        &self.config
    }

    fn entry_matches(&self, entry: &str, host: &str) -> bool {
        if let Some(parent) = entry.strip_prefix("*.") {
            return host.len() > parent.len() + 1 && host.ends_with(&entry[1..]);
        }
        if host == entry {
            return true;
        }
        self.config.allow_subdomains
            && host.len() > entry.len()
            && host.ends_with(entry)
            && host.as_bytes()[host.len() - entry.len() - 1] == b'.'
    }
}

impl AccessDimension for DomainDimension {
    fn dimension(&self) -> &'static str {
        "Domain"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn check(&self, request: &InboundRequest) -> Verdict {
        let host = request_host(request);
        evaluate(
            self.config.default_policy,
            || self.blacklist.iter().any(|e| self.entry_matches(e, &host)),
            || self.whitelist.iter().any(|e| self.entry_matches(e, &host)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;

    fn host(value: &str) -> InboundRequest {
        InboundRequest::new(Method::GET, "/").with_header("host", value)
    }

    #[test]
    fn test_port_is_stripped() {
        assert_eq!(request_host(&host("API.Example.com:8443")), "api.example.com");
        assert_eq!(request_host(&host("[::1]:8080")), "::1");
        assert_eq!(request_host(&host("example.com")), "example.com");
    }

    #[test]
    fn test_subdomains_only_when_allowed() {
        let strict = DomainDimension::new(DomainAccessConfig {
            enabled: true,
            default_policy: DefaultPolicy::Deny,
            whitelist: vec!["example.com".into()],
            ..Default::default()
        });
        assert!(strict.check(&host("example.com:80")).is_allowed());
        assert!(!strict.check(&host("api.example.com")).is_allowed());

        let lenient = DomainDimension::new(DomainAccessConfig {
            allow_subdomains: true,
            ..strict.config().clone()
        });
        assert!(lenient.check(&host("api.example.com")).is_allowed());
        assert!(!lenient.check(&host("badexample.com")).is_allowed());
    }

    #[test]
    fn test_star_entry_is_suffix() {
        let domain = DomainDimension::new(DomainAccessConfig {
            enabled: true,
            blacklist: vec!["*.evil.test".into()],
            ..Default::default()
        });
        assert!(!domain.check(&host("a.b.evil.test")).is_allowed());
        assert!(domain.check(&host("evil.test")).is_allowed());
        assert!(domain.check(&host("notevil.test")).is_allowed());
    }
}
