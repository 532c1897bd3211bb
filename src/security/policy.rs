//! The blacklist → whitelist → default-policy decision shared by every
//! access-control dimension.

use serde::{Deserialize, Serialize};

use crate::context::InboundRequest;

/// Outcome applied when neither list matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultPolicy {
    #[default]
    Allow,
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

/// A decision and the rule that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub decision: Decision,
    pub rule: &'static str,
}

impl Verdict {
    pub fn allow(rule: &'static str) -> Self {
        Self {
            decision: Decision::Allow,
            rule,
        }
    }

    pub fn deny(rule: &'static str) -> Self {
        Self {
            decision: Decision::Deny,
            rule,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.decision == Decision::Allow
    }
}

/// Blacklist wins over whitelist, whitelist wins over the default policy.
///
/// The whitelist is only consulted when the candidate is not blacklisted.
pub fn evaluate(
    default_policy: DefaultPolicy,
    blacklisted: impl FnOnce() -> bool,
    whitelisted: impl FnOnce() -> bool,
) -> Verdict {
    if blacklisted() {
        return Verdict::deny("blacklist");
    }
    if whitelisted() {
        return Verdict::allow("whitelist");
    }
    match default_policy {
        DefaultPolicy::Allow => Verdict::allow("default policy"),
        DefaultPolicy::Deny => Verdict::deny("default policy"),
    }
}

/// One independent access-control check.
pub trait AccessDimension: Send + Sync {
    /// Name used in the denial body, e.g. `IP`.
    fn dimension(&self) -> &'static str;

    fn is_enabled(&self) -> bool;

    fn check(&self, request: &InboundRequest) -> Verdict;
}
