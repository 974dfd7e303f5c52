//! `X-Correlation-ID` plumbing.
//!
//! Every request carries or receives a correlation id: the middleware
//! accepts the inbound header (or generates a UUID), stores it in request
//! extensions, and echoes it on the response. Handlers read it through the
//! [`Correlation`] extractor, so downstream audit emissions never thread
//! it by hand.

use axum::{
    extract::{FromRequestParts, Request},
    http::{header::HeaderName, request::Parts, HeaderValue},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use gk_audit::NO_CORRELATION_ID;

pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Request-scoped correlation id.
#[derive(Debug, Clone)]
pub struct Correlation(pub String);

impl Correlation {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Correlation {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<Correlation>()
            .cloned()
            .unwrap_or_else(|| Correlation(NO_CORRELATION_ID.to_string())))
    }
}

/// Accept-or-generate middleware; attach with `middleware::from_fn`.
pub async fn correlation_middleware(mut request: Request, next: Next) -> Response {
    let correlation_id = request
        .headers()
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request
        .extensions_mut()
        .insert(Correlation(correlation_id.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(CORRELATION_HEADER), value);
    }
    response
}
