//! Gateway middleware: bearer-token authentication against C5 and a
//! per-client rate limiter (§5 "Backpressure", §6 `RATE_LIMIT_*`).
//!
//! Generalized from the donor's `auth_middleware`/`rate_limit_middleware`
//! pair (`State<Arc<_>>` + `Request`/`Next` signature, claims stashed in
//! request extensions) onto C5's `AuthCore::validate` and a fixed-window
//! counter kept in C1 instead of the donor's in-process `RateLimiter`. The
//! donor's excluded-path list, API-key header, and role-based checks have
//! no counterpart — spec's auth core carries no roles.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::Error;

use super::state::GatewayState;

fn extract_bearer(request: &Request) -> Option<String> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

/// Validates `Authorization: Bearer <token>` against C5 and inserts the
/// decoded [`TokenClaims`](crate::enterprise::auth::TokenClaims) into
/// request extensions for downstream handlers.
pub async fn auth_middleware(
    State(state): State<Arc<GatewayState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match extract_bearer(&request) {
        Some(t) => t,
        None => return Error::Unauthorized("missing bearer token".into()).into_response(),
    };

    match state.auth.validate(&token).await {
        Ok(claims) => {
            request.extensions_mut().insert(claims);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

/// Per-client fixed-window throttle, enforced ahead of every route it
/// wraps — including, per §4.6 step 1, ahead of the idempotency check on
/// `/notifications/send`. A cache outage fails open rather than blocking
/// traffic on an unrelated dependency.
pub async fn rate_limit_middleware(
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let key = format!("ratelimit:{}", addr.ip());

    let count = match state.cache.incr(&key).await {
        Ok(count) => count,
        Err(e) => {
            tracing::warn!(error = %e, "rate limiter cache unavailable, failing open");
            return next.run(request).await;
        }
    };

    if count == 1 {
        let _ = state.cache.expire(&key, state.config.rate_limit_ttl).await;
    }

    if count > state.config.rate_limit_max as i64 {
        return Error::Forbidden("rate limit exceeded".into()).into_response();
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_key_is_scoped_per_client_ip() {
        let addr: SocketAddr = "203.0.113.7:54321".parse().unwrap();
        assert_eq!(format!("ratelimit:{}", addr.ip()), "ratelimit:203.0.113.7");
    }
}
