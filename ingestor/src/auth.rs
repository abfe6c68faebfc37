//! Shared-secret authentication for every non-health route.
//!
//! Clients send the key in the `X-API-Key` header. The check runs as a route
//! layer, before any body is parsed or any service is called.

use crate::errors::Error;
use crate::metrics::AUTH_FAILURES_TOTAL;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::warn;

pub const API_KEY_HEADER: &str = "X-API-Key";

#[derive(Clone)]
pub struct ApiKey(Arc<str>);

impl ApiKey {
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Self(key.into())
    }

    /// Constant-time comparison against the configured key.
    pub fn matches(&self, provided: &str) -> bool {
        self.0.as_bytes().ct_eq(provided.as_bytes()).into()
    }
}

pub async fn require_api_key(
    State(expected): State<ApiKey>,
    request: Request,
    next: Next,
) -> Result<Response, Error> {
    let authorized = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|key| expected.matches(key));

    if authorized {
        return Ok(next.run(request).await);
    }

    AUTH_FAILURES_TOTAL.inc();
    warn!(
        "API key authentication failed for {} {}",
        request.method(),
        request.uri().path()
    );
    Err(Error::Unauthorized)
}
