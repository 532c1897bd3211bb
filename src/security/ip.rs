//! IP address dimension.

use std::net::IpAddr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::context::InboundRequest;
use crate::error::{BuildError, BuildResult};
use crate::security::policy::{evaluate, AccessDimension, DefaultPolicy, Verdict};

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct IpAccessConfig {
    pub enabled: bool,
    pub default_policy: DefaultPolicy,
    /// Exact addresses.
    pub whitelist: Vec<String>,
    pub blacklist: Vec<String>,
    /// CIDR blocks, e.g. `10.0.0.0/8`.
    pub whitelist_cidrs: Vec<String>,
    pub blacklist_cidrs: Vec<String>,
    pub trust_forwarded_for: bool,
    pub trust_real_ip: bool,
}

impl Default for IpAccessConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            default_policy: DefaultPolicy::Allow,
            whitelist: Vec::new(),
            blacklist: Vec::new(),
            whitelist_cidrs: Vec::new(),
            blacklist_cidrs: Vec::new(),
            trust_forwarded_for: true,
            trust_real_ip: true,
        }
    }
}

pub struct IpDimension {
    config: IpAccessConfig,
    whitelist_cidrs: Vec<IpNet>,
    blacklist_cidrs: Vec<IpNet>,
}

fn parse_cidrs(component: &str, field: &'static str, entries: &[String]) -> BuildResult<Vec<IpNet>> {
    entries
        .iter()
        .map(|entry| {
            entry
                .trim()
                .parse::<IpNet>()
                .map_err(|e| BuildError::invalid(component, field, format!("`{}`: {}", entry, e)))
        })
        .collect()
}

/// Client address as seen through the trusted forwarding headers.
pub fn client_ip(request: &InboundRequest, trust_forwarded_for: bool, trust_real_ip: bool) -> String {
    if trust_forwarded_for {
        if let Some(first) = request
            .header("x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            return first.to_string();
        }
    }
    if trust_real_ip {
        if let Some(real) = request.header("x-real-ip").map(str::trim).filter(|v| !v.is_empty()) {
            return real.to_string();
        }
    }
    request.remote_addr.ip().to_string()
}

impl IpDimension {
    pub fn new(component: &str, config: IpAccessConfig) -> BuildResult<Self> {
        let whitelist_cidrs = parse_cidrs(component, "ip.whitelist_cidrs", &config.whitelist_cidrs)?;
        let blacklist_cidrs = parse_cidrs(component, "ip.blacklist_cidrs", &config.blacklist_cidrs)?;

        Ok(Self {
            config,
            whitelist_cidrs,
            blacklist_cidrs,
        })
    }

    pub fn config(&self) -> &IpAccessConfig {
        &self.config
    }

    fn listed(ip: &str, parsed: Option<IpAddr>, exact: &[String], cidrs: &[IpNet]) -> bool {
        exact.iter().any(|entry| entry.trim() == ip)
            || parsed.is_some_and(|addr| cidrs.iter().any(|net| net.contains(&addr)))
    }
}

impl AccessDimension for IpDimension {
    fn dimension(&self) -> &'static str {
        "IP"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn check(&self, request: &InboundRequest) -> Verdict {
        let ip = client_ip(request, self.config.trust_forwarded_for, self.config.trust_real_ip);
        let parsed = ip.parse::<IpAddr>().ok();

        evaluate(
            self.config.default_policy,
            || Self::listed(&ip, parsed, &self.config.blacklist, &self.blacklist_cidrs),
            || Self::listed(&ip, parsed, &self.config.whitelist, &self.whitelist_cidrs),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;

    fn from(addr: &str) -> InboundRequest {
        InboundRequest::new(Method::GET, "/").with_remote_addr(format!("{}:5555", addr).parse().unwrap())
    }

    fn dimension(config: IpAccessConfig) -> IpDimension {
        IpDimension::new("security", IpAccessConfig { enabled: true, ..config }).unwrap()
    }

    #[test]
    fn test_blacklisted_even_if_whitelisted() {
        let ip = dimension(IpAccessConfig {
            blacklist: vec!["10.0.0.5".into()],
            whitelist: vec!["10.0.0.5".into()],
            ..Default::default()
        });
        assert_eq!(ip.check(&from("10.0.0.5")), Verdict::deny("blacklist"));
        assert!(ip.check(&from("10.0.0.6")).is_allowed());
    }

    #[test]
    fn test_cidr_lists() {
        let ip = dimension(IpAccessConfig {
            default_policy: DefaultPolicy::Deny,
            whitelist_cidrs: vec!["192.168.0.0/16".into()],
            blacklist_cidrs: vec!["192.168.66.0/24".into()],
            ..Default::default()
        });
        assert!(ip.check(&from("192.168.1.20")).is_allowed());
        assert!(!ip.check(&from("192.168.66.1")).is_allowed());
        assert_eq!(ip.check(&from("172.16.0.1")), Verdict::deny("default policy"));
    }

    #[test]
    fn test_forwarding_header_precedence() {
        let request = from("127.0.0.1")
            .with_header("x-forwarded-for", " 203.0.113.7 , 10.0.0.1")
            .with_header("x-real-ip", "198.51.100.2");
        assert_eq!(client_ip(&request, true, true), "203.0.113.7");
        assert_eq!(client_ip(&request, false, true), "198.51.100.2");
        assert_eq!(client_ip(&request, false, false), "127.0.0.1");

        let real_only = from("127.0.0.1").with_header("x-real-ip", " 198.51.100.2 ");
        assert_eq!(client_ip(&real_only, true, true), "198.51.100.2");
    }

    #[test]
    fn test_invalid_cidr_is_build_error() {
        let err = IpDimension::new(
            "security",
            IpAccessConfig {
                blacklist_cidrs: vec!["10.0.0.0/33".into()],
                ..Default::default()
            },
        )
        .err()
        .unwrap();
        assert!(matches!(err, BuildError::InvalidValue { field: "ip.blacklist_cidrs", .. }));
    }
}
