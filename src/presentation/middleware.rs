//! Axum integration of the API key guard

use axum::{
    extract::{ConnectInfo, FromRequestParts, MatchedPath, Request, State},
    http::{StatusCode, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::application::guard::{ApiKeyGuard, GuardRequest};
use crate::domain::auth::ApiKeyRecord;

/// Key admitted for the current request
#[derive(Debug, Clone)]
pub struct AuthenticatedKey(pub Arc<ApiKeyRecord>);

/// Client address supplied by a proxy-aware layer in front of the guard
///
/// Takes precedence over the socket peer address.
#[derive(Debug, Clone, Copy)]
pub struct ClientIp(pub IpAddr);

/// Middleware running the guard on every request
///
/// Install with `axum::middleware::from_fn_with_state(guard, require_api_key)`.
/// Rejections are answered directly; admitted requests carry an
/// [`AuthenticatedKey`] extension and get the limiter headers appended to
/// the handler's response.
pub async fn require_api_key(
    State(guard): State<Arc<ApiKeyGuard>>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();

    let mut guard_request = GuardRequest::from_parts(&parts, client_ip(&parts));
    if let Some(matched) = parts.extensions.get::<MatchedPath>() {
        guard_request = guard_request.with_route(format!("{} {}", parts.method, matched.as_str()));
    }

    match guard.validate(&guard_request).await {
        Ok(admission) => {
            parts
                .extensions
                .insert(AuthenticatedKey(Arc::new(admission.record)));
            let mut response = next.run(Request::from_parts(parts, body)).await;
            response.headers_mut().extend(admission.headers);
            response
        }
        Err(rejection) => rejection.into_response(),
    }
}

fn client_ip(parts: &Parts) -> Option<IpAddr> {
    parts
        .extensions
        .get::<ClientIp>()
        .map(|ClientIp(ip)| *ip)
        .or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip())
        })
}

impl<S> FromRequestParts<S> for AuthenticatedKey
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedKey>()
            .cloned()
            .ok_or(StatusCode::UNAUTHORIZED)
    }
}
