//! Guard decisions and their HTTP rendering

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::auth::{ApiKeyRecord, DenialClass, DenyReason};
use crate::infrastructure::quota::QuotaStatus;
use crate::infrastructure::rate_limiter::RateLimitResult;

pub const RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";
pub const ENDPOINT_RATE_LIMIT_LIMIT: &str = "x-endpoint-ratelimit-limit";
pub const ENDPOINT_RATE_LIMIT_REMAINING: &str = "x-endpoint-ratelimit-remaining";
pub const ENDPOINT_RATE_LIMIT_RESET: &str = "x-endpoint-ratelimit-reset";
pub const QUOTA_LIMIT: &str = "x-quota-limit";
pub const QUOTA_USED: &str = "x-quota-used";
pub const QUOTA_REMAINING: &str = "x-quota-remaining";
pub const QUOTA_RESET: &str = "x-quota-reset";

/// A request the guard let through
#[derive(Debug, Clone)]
pub struct Admission {
    /// Resolved key, to be attached to the request context
    pub record: ApiKeyRecord,
    /// Rate and quota headers for the response
    pub headers: HeaderMap,
    pub correlation_id: Uuid,
}

/// Why a request was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    Denied(DenyReason),
    /// Unexpected failure inside the guard; details are only logged
    Internal,
}

/// A request the guard refused
#[derive(Debug, Clone)]
pub struct GuardRejection {
    pub kind: RejectionKind,
    /// Headers of every check that ran, including the failing one
    pub headers: HeaderMap,
    pub correlation_id: Uuid,
}

pub type GuardDecision = Result<Admission, GuardRejection>;

impl GuardRejection {
    pub fn deny_reason(&self) -> Option<DenyReason> {
        match self.kind {
            RejectionKind::Denied(reason) => Some(reason),
            RejectionKind::Internal => None,
        }
    }

    pub fn is_internal(&self) -> bool {
        self.kind == RejectionKind::Internal
    }

    pub fn status(&self) -> StatusCode {
        match self.kind {
            RejectionKind::Denied(reason) => match reason.class() {
                DenialClass::Unauthorized => StatusCode::UNAUTHORIZED,
                DenialClass::Forbidden => StatusCode::FORBIDDEN,
                DenialClass::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            },
            RejectionKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self.kind {
            RejectionKind::Denied(reason) => reason.code(),
            RejectionKind::Internal => "internal_error",
        }
    }

    pub fn message(&self) -> &'static str {
        match self.kind {
            RejectionKind::Denied(reason) => reason.message(),
            RejectionKind::Internal => "An internal error occurred",
        }
    }
}

/// JSON error body of a rejection
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub request_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

impl IntoResponse for GuardRejection {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.message().to_string(),
            request_id: self.correlation_id,
            timestamp: Utc::now(),
        };

        let mut response = (self.status(), axum::Json(body)).into_response();
        response.headers_mut().extend(self.headers);
        response
    }
}

fn insert(headers: &mut HeaderMap, name: &'static str, value: impl ToString) {
    if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
        headers.insert(HeaderName::from_static(name), value);
    }
}

/// `X-RateLimit-*` headers, plus `Retry-After` when blocked
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, result: &RateLimitResult) {
    insert(headers, RATE_LIMIT_LIMIT, result.limit);
    insert(headers, RATE_LIMIT_REMAINING, result.remaining);
    insert(headers, RATE_LIMIT_RESET, result.reset_unix());
    apply_retry_after(headers, result);
}

/// `X-Endpoint-RateLimit-*` headers, plus `Retry-After` when blocked
pub fn apply_endpoint_rate_limit_headers(headers: &mut HeaderMap, result: &RateLimitResult) {
    insert(headers, ENDPOINT_RATE_LIMIT_LIMIT, result.limit);
    insert(headers, ENDPOINT_RATE_LIMIT_REMAINING, result.remaining);
    insert(headers, ENDPOINT_RATE_LIMIT_RESET, result.reset_unix());
    apply_retry_after(headers, result);
}

fn apply_retry_after(headers: &mut HeaderMap, result: &RateLimitResult) {
    if let Some(retry_after) = result.retry_after {
        if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
            headers.insert(header::RETRY_AFTER, value);
        }
    }
}

/// `X-Quota-*` headers; nothing for keys without a quota
pub fn apply_quota_headers(headers: &mut HeaderMap, status: &QuotaStatus) {
    let (Some(limit), Some(remaining), Some(reset_at)) = (status.limit, status.remaining, status.reset_at) else {
        return;
    };
    insert(headers, QUOTA_LIMIT, limit);
    insert(headers, QUOTA_USED, status.used);
    insert(headers, QUOTA_REMAINING, remaining);
    insert(headers, QUOTA_RESET, reset_at.timestamp());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let rejection = |kind| GuardRejection {
            kind,
            headers: HeaderMap::new(),
            correlation_id: Uuid::new_v4(),
        };

        assert_eq!(
            rejection(RejectionKind::Denied(DenyReason::InvalidApiKey)).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            rejection(RejectionKind::Denied(DenyReason::IpNotAllowed)).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            rejection(RejectionKind::Denied(DenyReason::QuotaExceeded)).status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        let internal = rejection(RejectionKind::Internal);
        assert_eq!(internal.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(internal.code(), "internal_error");
    }

    #[test]
    fn test_rate_limit_headers() {
        let now = Utc::now();
        let mut headers = HeaderMap::new();
        apply_rate_limit_headers(&mut headers, &RateLimitResult::blocked(2, now + chrono::Duration::seconds(30), now));

        assert_eq!(headers[RATE_LIMIT_LIMIT], "2");
        assert_eq!(headers[RATE_LIMIT_REMAINING], "0");
        assert_eq!(headers[RATE_LIMIT_RESET], (now + chrono::Duration::seconds(30)).timestamp().to_string());
        assert_eq!(headers[header::RETRY_AFTER], "30");
    }

    #[test]
    fn test_quota_headers_skip_unlimited() {
        let mut headers = HeaderMap::new();
        apply_quota_headers(&mut headers, &QuotaStatus::unlimited());
        assert!(headers.is_empty());

        apply_quota_headers(&mut headers, &QuotaStatus::limited(10, 3, Utc::now()));
        assert_eq!(headers[QUOTA_USED], "3");
        assert_eq!(headers[QUOTA_REMAINING], "7");
    }

    #[test]
    fn test_rejection_response_carries_headers() {
        let mut headers = HeaderMap::new();
        insert(&mut headers, RATE_LIMIT_REMAINING, 0);
        let response = GuardRejection {
            kind: RejectionKind::Denied(DenyReason::RateLimitExceeded),
            headers,
            correlation_id: Uuid::new_v4(),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RATE_LIMIT_REMAINING], "0");
    }
}
