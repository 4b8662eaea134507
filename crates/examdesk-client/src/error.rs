//! Mapping of HTTP responses and transport failures to `ServiceError`.

use examdesk_core::error::ServiceError;
use examdesk_core::model::SessionStatus;
use reqwest::StatusCode;
use serde::Deserialize;

/// Error body returned by the exam service.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    /// Current session status, present on 409 responses.
    #[serde(default)]
    status: Option<SessionStatus>,
}

/// Classify a non-success response.
///
/// 409 carries the session's current status and becomes `Rejected`; a 409
/// without one is reported as a plain API error.
pub fn from_response(status: StatusCode, body: &str) -> ServiceError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = if parsed.message.is_empty() {
        body.trim().to_string()
    } else {
        parsed.message
    };

    match status {
        StatusCode::CONFLICT => match parsed.status {
            Some(current) => ServiceError::Rejected {
                status: current,
                message,
            },
            None => ServiceError::Api {
                status: status.as_u16(),
                message,
            },
        },
        StatusCode::UNPROCESSABLE_ENTITY if message.to_lowercase().contains("token") => {
            ServiceError::InvalidToken
        }
        StatusCode::NOT_FOUND => ServiceError::NotFound(message),
        _ => ServiceError::Api {
            status: status.as_u16(),
            message,
        },
    }
}

/// Classify a transport-level failure.
pub fn from_transport(err: reqwest::Error, timeout_secs: u64) -> ServiceError {
    if err.is_timeout() {
        ServiceError::Timeout(timeout_secs)
    } else {
        ServiceError::Network(err.to_string())
    }
}
