//! AND / OR combination of two or more strategies.
//!
//! AND stops at the first failing member and surfaces that member's abort
//! untouched. OR keeps the first success; when every member fails the caller
//! gets a synthesized "all authentication methods failed" 401 carrying every
//! member's challenge header, while each member's own reason stays in the
//! context error list.

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use serde_json::{json, Value};

use crate::auth::{record_failure, reject, AuthBase, AuthStrategy, Authenticator, CompositeMode};
use crate::context::{keys, Abort, RequestContext};
use crate::error::{BuildError, BuildResult};
use crate::pipeline::{Flow, Handler};

/// Reason used when an OR composite exhausts its members.
pub const ALL_METHODS_FAILED: &str = "all authentication methods failed";

pub struct CompositeAuthenticator {
    base: AuthBase,
    strategy: AuthStrategy,
    mode: CompositeMode,
    members: Vec<Authenticator>,
}

impl CompositeAuthenticator {
    pub(crate) fn base_mut(&mut self) -> &mut AuthBase {
        &mut self.base
    }

    pub fn new(
        base: AuthBase,
        strategy: AuthStrategy,
        mode: CompositeMode,
        mut members: Vec<Authenticator>,
    ) -> BuildResult<Self> {
        if members.len() < 2 {
            return Err(BuildError::invalid(
                base.name.clone(),
                "strategy",
                format!("composite needs at least two members, got {}", members.len()),
            ));
        }
        for member in &mut members {
            member.validate()?;
            member.mark_member();
        }

        Ok(Self {
            base,
            strategy,
            mode,
            members,
        })
    }

    pub fn strategy(&self) -> AuthStrategy {
        self.strategy
    }

    pub fn mode(&self) -> CompositeMode {
        self.mode
    }

    pub fn members(&self) -> &[Authenticator] {
        &self.members
    }

    async fn all(&self, ctx: &mut RequestContext) -> Flow {
        for member in &self.members {
            if let Flow::Stop(abort) = member.handle(ctx).await {
                let reason = ctx.errors().last().cloned().unwrap_or_default();
                record_failure(ctx, member.strategy(), member.name(), &reason);
                return Flow::Stop(abort);
            }
        }
        ctx.set_fact(keys::AUTH_METHOD, self.strategy.as_str());
        Flow::Continue
    }

    async fn any(&self, ctx: &mut RequestContext) -> Flow {
        let mut challenges = HeaderMap::new();

        for member in &self.members {
            match member.handle(ctx).await {
                Flow::Continue => {
                    tracing::debug!(
                        request_id = %ctx.request_id(),
                        composite = %self.base.name,
                        accepted_by = %member.strategy(),
                        "Composite authentication satisfied"
                    );
                    return Flow::Continue;
                }
                Flow::Stop(abort) => {
                    for value in abort.headers.get_all(header::WWW_AUTHENTICATE) {
                        challenges.append(header::WWW_AUTHENTICATE, value.clone());
                    }
                }
            }
        }

        let mut abort = Abort::unauthorized(ALL_METHODS_FAILED);
        abort.headers.extend(challenges);
        reject(ctx, self.strategy, &self.base, ALL_METHODS_FAILED, abort)
    }
}

#[async_trait]
impl Handler for CompositeAuthenticator {
    fn name(&self) -> &str {
        &self.base.name
    }

    fn is_enabled(&self) -> bool {
        self.base.enabled
    }

    fn validate(&self) -> BuildResult<()> {
        self.members.iter().try_for_each(|m| m.validate())
    }

    fn config(&self) -> Value {
        let members: Vec<Value> = self.members.iter().map(|m| m.config()).collect();
        let settings = json!({
            "mode": match self.mode {
                CompositeMode::And => "and",
                CompositeMode::Or => "or",
            },
            "members": members,
        });
        self.base.snapshot(self.strategy, settings)
    }

    async fn handle(&self, ctx: &mut RequestContext) -> Flow {
        if self.base.skips(ctx.request()) {
            return Flow::Continue;
        }

        match self.mode {
            CompositeMode::And => self.all(ctx).await,
            CompositeMode::Or => self.any(ctx).await,
        }
    }

    fn close(&self) -> BuildResult<()> {
        self.members.iter().try_for_each(|m| m.close())
    }
}
