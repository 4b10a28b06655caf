//! Maps raw HTTP outcomes onto [`Outcome`].
//!
//! 409 (idempotent rejection / insufficient stock) and 503 (lock contention
//! backoff) are expected under contention and never count as failures.

use hyper::StatusCode;

use crate::error::TransportError;
use crate::models::metrics::{Classification, Outcome};

/// Classifies a status code; `None` marks a transport failure.
pub fn classify(status: Option<u16>) -> Classification {
    let outcome = match status {
        None => Outcome::TransportFailure,
        Some(200) | Some(201) => Outcome::Success,
        Some(409) => Outcome::Conflict,
        Some(503) => Outcome::ServiceUnavailable,
        Some(401) => Outcome::AuthFailure,
        Some(400..=499) => Outcome::OtherClientError,
        Some(500..=599) => Outcome::OtherServerError,
        Some(_) => Outcome::TransportFailure,
    };
    Classification {
        outcome,
        unexpected: is_unexpected(outcome),
    }
}

pub fn classify_response(response: &Result<StatusCode, TransportError>) -> Classification {
    classify(response.as_ref().ok().map(StatusCode::as_u16))
}

pub fn is_unexpected(outcome: Outcome) -> bool {
    !matches!(
        outcome,
        Outcome::Success | Outcome::Conflict | Outcome::ServiceUnavailable
    )
}
