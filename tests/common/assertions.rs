//! Assertions on guard decisions

use axum::http::StatusCode;

use keyguard::application::guard::{Admission, GuardDecision, GuardRejection};
use keyguard::domain::auth::DenyReason;

pub trait DecisionAssertions {
    /// Assert the request was admitted and return the admission
    fn assert_admitted(&self) -> &Admission;

    /// Assert the request was denied for `reason` and return the rejection
    fn assert_denied(&self, reason: DenyReason) -> &GuardRejection;

    /// Assert the guard failed internally
    fn assert_internal(&self) -> &GuardRejection;

    /// Header value from either outcome
    fn header(&self, name: &str) -> Option<String>;
}

impl DecisionAssertions for GuardDecision {
    fn assert_admitted(&self) -> &Admission {
        match self {
            Ok(admission) => admission,
            Err(rejection) => panic!("expected admission, got {:?}", rejection.kind),
        }
    }

    fn assert_denied(&self, reason: DenyReason) -> &GuardRejection {
        match self {
            Ok(admission) => panic!("expected {reason} denial, key {} was admitted", admission.record.id),
            Err(rejection) => {
                assert_eq!(rejection.deny_reason(), Some(reason), "unexpected rejection");
                rejection
            }
        }
    }

    fn assert_internal(&self) -> &GuardRejection {
        match self {
            Ok(admission) => panic!("expected internal failure, key {} was admitted", admission.record.id),
            Err(rejection) => {
                assert!(rejection.is_internal(), "expected internal failure, got {:?}", rejection.kind);
                assert_eq!(rejection.status(), StatusCode::INTERNAL_SERVER_ERROR);
                rejection
            }
        }
    }

    fn header(&self, name: &str) -> Option<String> {
        let headers = match self {
            Ok(admission) => &admission.headers,
            Err(rejection) => &rejection.headers,
        };
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
}
