//! User-Agent dimension.

use axum::http::header;
use serde::{Deserialize, Serialize};

use crate::context::InboundRequest;
use crate::security::patterns::TextPattern;
use crate::security::policy::{evaluate, AccessDimension, DefaultPolicy, Verdict};

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct UserAgentAccessConfig {
    pub enabled: bool,
    pub default_policy: DefaultPolicy,
    /// Regex or exact strings.
    pub whitelist: Vec<String>,
    pub blacklist: Vec<String>,
    /// Reject requests without a User-Agent before consulting the lists.
    pub block_empty: bool,
}

pub struct UserAgentDimension {
    config: UserAgentAccessConfig,
    whitelist: Vec<TextPattern>,
    blacklist: Vec<TextPattern>,
}

impl UserAgentDimension {
    pub fn new(config: UserAgentAccessConfig) -> Self {
        let whitelist = config.whitelist.iter().map(|p| TextPattern::new(p)).collect();
        let blacklist = config.blacklist.iter().map(|p| TextPattern::new(p)).collect();
        Self {
            config,
            whitelist,
            blacklist,
        }
    }

    pub fn config(&self) -> &UserAgentAccessConfig {
        &self.config
    }
}

impl AccessDimension for UserAgentDimension {
    fn dimension(&self) -> &'static str {
        "User-Agent"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn check(&self, request: &InboundRequest) -> Verdict {
        let agent = request.header(header::USER_AGENT.as_str()).unwrap_or("").trim();
        if agent.is_empty() && self.config.block_empty {
            return Verdict::deny("empty user agent");
        }

        evaluate(
            self.config.default_policy,
            || self.blacklist.iter().any(|p| p.matches(agent)),
            || self.whitelist.iter().any(|p| p.matches(agent)),
        )
    }
}
