//! API dimension: method restrictions, then path lists.

use serde::{Deserialize, Serialize};

use crate::context::InboundRequest;
use crate::error::{BuildError, BuildResult};
use crate::security::patterns::{compile_wildcards, WildcardPattern};
use crate::security::policy::{evaluate, AccessDimension, DefaultPolicy, Verdict};

pub const STANDARD_METHODS: [&str; 9] = [
    "GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS", "CONNECT", "TRACE",
];

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ApiAccessConfig {
    pub enabled: bool,
    pub default_policy: DefaultPolicy,
    /// Path patterns; `*` and `?` are wildcards.
    pub whitelist: Vec<String>,
    pub blacklist: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub blocked_methods: Vec<String>,
}

impl Default for ApiAccessConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            default_policy: DefaultPolicy::Allow,
            whitelist: Vec::new(),
            blacklist: Vec::new(),
            allowed_methods: STANDARD_METHODS.iter().map(|m| m.to_string()).collect(),
            blocked_methods: Vec::new(),
        }
    }
}

pub struct ApiDimension {
    config: ApiAccessConfig,
    whitelist: Vec<WildcardPattern>,
    blacklist: Vec<WildcardPattern>,
}

impl ApiDimension {
    pub fn new(component: &str, config: ApiAccessConfig) -> BuildResult<Self> {
        let whitelist = compile_wildcards(&config.whitelist)
            .map_err(|reason| BuildError::invalid(component, "api.whitelist", reason))?;
        let blacklist = compile_wildcards(&config.blacklist)
            .map_err(|reason| BuildError::invalid(component, "api.blacklist", reason))?;

        Ok(Self {
            config,
            whitelist,
            blacklist,
        })
    }

    pub fn config(&self) -> &ApiAccessConfig {
        &self.config
    }

    fn method_listed(list: &[String], method: &str) -> bool {
        list.iter().any(|m| m.trim().eq_ignore_ascii_case(method))
    }
}

impl AccessDimension for ApiDimension {
    fn dimension(&self) -> &'static str {
        "API"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn check(&self, request: &InboundRequest) -> Verdict {
        let method = request.method.as_str();
        if Self::method_listed(&self.config.blocked_methods, method) {
            return Verdict::deny("blocked method");
        }
        if !Self::method_listed(&self.config.allowed_methods, method) {
            return Verdict::deny("method not allowed");
        }

        let path = request.path.as_str();
        evaluate(
            self.config.default_policy,
            || self.blacklist.iter().any(|p| p.matches(path)),
            || self.whitelist.iter().any(|p| p.matches(path)),
        )
    }
}
