//! Strategy that accepts every request.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::auth::{AuthBase, AuthStrategy};
use crate::context::{keys, RequestContext};
use crate::pipeline::{Flow, Handler};

#[derive(Debug, Clone)]
pub struct NoAuthenticator {
    base: AuthBase,
}

impl NoAuthenticator {
    pub(crate) fn base_mut(&mut self) -> &mut AuthBase {
        &mut self.base
    }

    pub fn new(base: AuthBase) -> Self {
        Self { base }
    }
}

#[async_trait]
impl Handler for NoAuthenticator {
    fn name(&self) -> &str {
        &self.base.name
    }

    fn is_enabled(&self) -> bool {
        self.base.enabled
    }

    fn config(&self) -> Value {
        self.base.snapshot(AuthStrategy::None, json!({}))
    }

    async fn handle(&self, ctx: &mut RequestContext) -> Flow {
        if self.base.skips(ctx.request()) {
            return Flow::Continue;
        }
        ctx.set_fact(keys::AUTH_METHOD, AuthStrategy::None.as_str());
        Flow::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::InboundRequest;
    use axum::http::Method;

    #[tokio::test]
    async fn test_marks_method_only() {
        let auth = NoAuthenticator::new(AuthBase::named("open"));
        let mut ctx = RequestContext::new(InboundRequest::new(Method::GET, "/"));

        assert!(auth.handle(&mut ctx).await.is_continue());
        assert_eq!(ctx.fact_str(keys::AUTH_METHOD), Some("none"));
        assert!(ctx.fact(keys::USER_ID).is_none());
    }
}
