//! Response construction.
//!
//! # Responsibilities
//! - Turn an [`Abort`] into the HTTP response written to the client
//! - Merge headers collected on the context into any response
//! - Strip hop-by-hop headers from upstream responses
//! - Map upstream failures to gateway status codes
//!
//! # Design Decisions
//! - Upstream bodies are streamed, never buffered
//! - Upstream errors result in 502, no capacity in 503, deadline in 504

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::context::Abort;

const HOP_BY_HOP: [HeaderName; 6] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
];

impl IntoResponse for Abort {
    fn into_response(self) -> Response {
        let mut response = match self.body {
            Some(body) => (self.status, Json(body)).into_response(),
            None => {
                let mut response = Response::new(Body::empty());
                *response.status_mut() = self.status;
                response
            }
        };
        merge_headers(response.headers_mut(), &self.headers);
        response
    }
}

/// Append `extra` to `target`. Multi-valued headers keep every value.
pub fn merge_headers(target: &mut HeaderMap, extra: &HeaderMap) {
    for (name, value) in extra {
        target.append(name.clone(), value.clone());
    }
}

pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove("keep-alive");
    headers.remove(header::UPGRADE);
}

pub fn bad_gateway() -> Abort {
    Abort::error(StatusCode::BAD_GATEWAY, "Bad Gateway: upstream request failed")
}

pub fn no_backend() -> Abort {
    Abort::error(StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable: no backend available")
}

pub fn upstream_timeout() -> Abort {
    Abort::error(StatusCode::GATEWAY_TIMEOUT, "Gateway Timeout: upstream did not respond in time")
}
