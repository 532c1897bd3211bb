//! Multi-dimensional access control as a pipeline handler.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::{Abort, RequestContext};
use crate::error::BuildResult;
use crate::observability::metrics;
use crate::pipeline::{Flow, Handler};
use crate::security::api::{ApiAccessConfig, ApiDimension};
use crate::security::domain::{DomainAccessConfig, DomainDimension};
use crate::security::ip::{IpAccessConfig, IpDimension};
use crate::security::policy::AccessDimension;
use crate::security::user_agent::{UserAgentAccessConfig, UserAgentDimension};

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SecurityConfig {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub ip: IpAccessConfig,
    pub user_agent: UserAgentAccessConfig,
    pub api: ApiAccessConfig,
    pub domain: DomainAccessConfig,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: "security".to_string(),
            enabled: true,
            ip: IpAccessConfig::default(),
            user_agent: UserAgentAccessConfig::default(),
            api: ApiAccessConfig::default(),
            domain: DomainAccessConfig::default(),
        }
    }
}

impl SecurityConfig {
    /// True when at least one dimension would run.
    pub fn is_active(&self) -> bool {
        self.enabled
            && (self.ip.enabled || self.user_agent.enabled || self.api.enabled || self.domain.enabled)
    }
}

/// Runs IP, User-Agent, API and Domain checks in that order; the first
/// denial stops the request with 403.
pub struct SecurityPolicyEngine {
    config: SecurityConfig,
    dimensions: Vec<Box<dyn AccessDimension>>,
}

impl SecurityPolicyEngine {
    pub fn new(config: SecurityConfig) -> BuildResult<Self> {
        let name = config.name.clone();
        let dimensions: Vec<Box<dyn AccessDimension>> = vec![
            Box::new(IpDimension::new(&name, config.ip.clone())?),
            Box::new(UserAgentDimension::new(config.user_agent.clone())),
            Box::new(ApiDimension::new(&name, config.api.clone())?),
            Box::new(DomainDimension::new(config.domain.clone())),
        ];

        Ok(Self { config, dimensions })
    }
}

#[async_trait]
impl Handler for SecurityPolicyEngine {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn config(&self) -> Value {
        serde_json::to_value(&self.config).unwrap_or(Value::Null)
    }

    async fn handle(&self, ctx: &mut RequestContext) -> Flow {
        if !self.config.enabled {
            return Flow::Continue;
        }

        for dimension in self.dimensions.iter().filter(|d| d.is_enabled()) {
            let verdict = dimension.check(ctx.request());
            if verdict.is_allowed() {
                continue;
            }

            let name = dimension.dimension();
            tracing::warn!(
                request_id = %ctx.request_id(),
                handler = %self.config.name,
                dimension = name,
                rule = verdict.rule,
                path = %ctx.request().path,
                "Access denied"
            );
            metrics::record_security_denial(name);
            ctx.push_error(format!("security: {} denied by {}", name, verdict.rule));
            return Flow::Stop(Abort::forbidden(name));
        }

        Flow::Continue
    }
}
