//! Route matching logic.
//!
//! # Responsibilities
//! - Match host header (exact match, case-insensitive)
//! - Match path (exact, prefix or regex)
//! - Match method list
//! - Evaluate assertion groups over header/query/cookie/path/ip predicates
//! - Combine conditions with AND semantics
//!
//! # Design Decisions
//! - Host matching is case-insensitive (RFC 7230)
//! - Path matching is case-sensitive
//! - Empty condition = always matches (wildcard)
//! - Regexes are compiled once when the router is built

use std::net::IpAddr;

use axum::http::Method;
use ipnet::IpNet;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::context::InboundRequest;
use crate::security::ip::client_ip;

/// Trait for matching requests against conditions.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns true if the request matches this condition.
    fn matches(&self, req: &InboundRequest) -> bool;
}

/// Matches the Host header.
#[derive(Debug, Clone)]
pub struct HostMatcher {
    expected_host: String,
}

impl HostMatcher {
    /// The host is normalized to lowercase for case-insensitive matching.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            expected_host: host.into().to_lowercase(),
        }
    }
}

impl Matcher for HostMatcher {
    fn matches(&self, req: &InboundRequest) -> bool {
        req.header("host")
            .map(|h| {
                let h = h.to_lowercase();
                h == self.expected_host
                    || h.rsplit_once(':').is_some_and(|(name, _)| name == self.expected_host)
            })
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    #[default]
    Prefix,
    Regex,
}

/// Matches the request path.
#[derive(Debug, Clone)]
pub enum PathMatcher {
    Exact(String),
    Prefix(String),
    Regex(Regex),
}

impl PathMatcher {
    pub fn new(match_type: MatchType, path: &str) -> Result<Self, regex::Error> {
        Ok(match match_type {
            MatchType::Exact => PathMatcher::Exact(path.to_string()),
            MatchType::Prefix => PathMatcher::Prefix(path.to_string()),
            MatchType::Regex => PathMatcher::Regex(Regex::new(path)?),
        })
    }
}

impl Matcher for PathMatcher {
    fn matches(&self, req: &InboundRequest) -> bool {
        match self {
            PathMatcher::Exact(path) => req.path == *path,
            PathMatcher::Prefix(prefix) => req.path.starts_with(prefix.as_str()),
            PathMatcher::Regex(re) => re.is_match(&req.path),
        }
    }
}

/// Matches when the method is in the list.
#[derive(Debug, Clone)]
pub struct MethodMatcher {
    methods: Vec<Method>,
}

impl MethodMatcher {
    pub fn new(methods: &[String]) -> Result<Self, String> {
        let methods = methods
            .iter()
            .map(|m| {
                m.trim()
                    .to_ascii_uppercase()
                    .parse::<Method>()
                    .map_err(|_| format!("invalid method `{}`", m))
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { methods })
    }
}

impl Matcher for MethodMatcher {
    fn matches(&self, req: &InboundRequest) -> bool {
        self.methods.contains(&req.method)
    }
}

/// Where an assertion predicate reads its value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PredicateSource {
    Header,
    Query,
    Cookie,
    Path,
    Ip,
    Body,
}

/// One predicate as written in configuration.
///
/// `pattern` is a regex for header/query/cookie/path and an address or CIDR
/// block for ip. Without a pattern, header/query/cookie test for presence.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PredicateConfig {
    pub source: PredicateSource,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub negate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AssertionMode {
    #[default]
    All,
    Any,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AssertionGroupConfig {
    pub mode: AssertionMode,
    pub predicates: Vec<PredicateConfig>,
}

#[derive(Debug)]
enum Test {
    Present,
    Regex(Regex),
    Net(IpNet),
    Addr(IpAddr),
}

#[derive(Debug)]
struct Predicate {
    source: PredicateSource,
    name: String,
    test: Test,
    negate: bool,
}

impl Predicate {
    fn compile(config: &PredicateConfig) -> Result<Self, String> {
        let test = match (config.source, config.pattern.as_deref()) {
            (PredicateSource::Body, _) => return Err("body predicates are not supported".into()),
            (PredicateSource::Ip, Some(pattern)) => {
                if let Ok(net) = pattern.parse::<IpNet>() {
                    Test::Net(net)
                } else {
                    Test::Addr(
                        pattern
                            .parse::<IpAddr>()
                            .map_err(|_| format!("`{}` is neither an address nor a CIDR block", pattern))?,
                    )
                }
            }
            (PredicateSource::Ip, None) => return Err("ip predicate needs a pattern".into()),
            (PredicateSource::Path, None) => return Err("path predicate needs a pattern".into()),
            (_, Some(pattern)) => Test::Regex(Regex::new(pattern).map_err(|e| e.to_string())?),
            (_, None) => Test::Present,
        };
        let named = matches!(
            config.source,
            PredicateSource::Header | PredicateSource::Query | PredicateSource::Cookie
        );
        if named && config.name.is_empty() {
            return Err("predicate needs a name".into());
        }

        Ok(Self {
            source: config.source,
            name: config.name.clone(),
            test,
            negate: config.negate,
        })
    }

    fn evaluate(&self, req: &InboundRequest) -> bool {
        let value: Option<String> = match self.source {
            PredicateSource::Header => req.header(&self.name).map(str::to_string),
            PredicateSource::Query => req.query_param(&self.name),
            PredicateSource::Cookie => req.cookie(&self.name),
            PredicateSource::Path => Some(req.path.clone()),
            PredicateSource::Ip => Some(client_ip(req, true, true)),
            PredicateSource::Body => None,
        };

        let result = match (&self.test, value) {
            (_, None) => false,
            (Test::Present, Some(_)) => true,
            (Test::Regex(re), Some(v)) => re.is_match(&v),
            (Test::Net(net), Some(v)) => v.parse::<IpAddr>().is_ok_and(|ip| net.contains(&ip)),
            (Test::Addr(addr), Some(v)) => v.parse::<IpAddr>().is_ok_and(|ip| ip == *addr),
        };
        result != self.negate
    }
}

/// Boolean combination of predicates gating a route.
#[derive(Debug)]
pub struct AssertionMatcher {
    mode: AssertionMode,
    predicates: Vec<Predicate>,
}

impl AssertionMatcher {
    pub fn new(config: &AssertionGroupConfig) -> Result<Self, String> {
        let predicates = config
            .predicates
            .iter()
            .map(Predicate::compile)
            .collect::<Result<_, _>>()?;
        Ok(Self {
            mode: config.mode,
            predicates,
        })
    }
}

impl Matcher for AssertionMatcher {
    fn matches(&self, req: &InboundRequest) -> bool {
        match self.mode {
            AssertionMode::All => self.predicates.iter().all(|p| p.evaluate(req)),
            AssertionMode::Any => {
                self.predicates.is_empty() || self.predicates.iter().any(|p| p.evaluate(req))
            }
        }
    }
}

/// Combines multiple matchers with AND semantics.
#[derive(Debug)]
pub struct AndMatcher {
    matchers: Vec<Box<dyn Matcher>>,
}

impl AndMatcher {
    pub fn new(matchers: Vec<Box<dyn Matcher>>) -> Self {
        Self { matchers }
    }
}

impl Matcher for AndMatcher {
    fn matches(&self, req: &InboundRequest) -> bool {
        self.matchers.iter().all(|m| m.matches(req))
    }
}
