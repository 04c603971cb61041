//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::DomainError;
use realtime::RealtimeError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed request outside the services' own validation.
    BadRequest(String),
    /// Identity headers missing or unreadable.
    Unauthorized(String),
    /// The caller is authenticated but not allowed.
    Forbidden(String),
    /// Cart or order service error.
    Domain(DomainError),
    /// Realtime layer error.
    Realtime(RealtimeError),
}

impl ApiError {
    fn status_and_message(self) -> (StatusCode, String) {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Domain(err) => (domain_status(&err), err.to_string()),
            ApiError::Realtime(err) => (realtime_status(&err), err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        if status.is_server_error() {
            tracing::error!(%status, error = %message, "request failed");
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn domain_status(err: &DomainError) -> StatusCode {
    match err {
        DomainError::Validation(_) => StatusCode::BAD_REQUEST,
        DomainError::Forbidden(_) => StatusCode::FORBIDDEN,
        DomainError::NotFound(_) => StatusCode::NOT_FOUND,
        DomainError::Conflict(_) => StatusCode::CONFLICT,
        DomainError::Catalog(_) => StatusCode::BAD_GATEWAY,
        DomainError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn realtime_status(err: &RealtimeError) -> StatusCode {
    match err {
        RealtimeError::InvalidJoin(_) | RealtimeError::InvalidRoom(_) => StatusCode::BAD_REQUEST,
        RealtimeError::Forbidden(_) => StatusCode::FORBIDDEN,
        RealtimeError::UnknownConnection(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Domain(err)
    }
}

impl From<RealtimeError> for ApiError {
    fn from(err: RealtimeError) -> Self {
        ApiError::Realtime(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_taxonomy_maps_to_status_codes() {
        let cases = [
            (DomainError::Validation("q".into()), StatusCode::BAD_REQUEST),
            (DomainError::Forbidden("f".into()), StatusCode::FORBIDDEN),
            (DomainError::NotFound("n".into()), StatusCode::NOT_FOUND),
            (DomainError::Conflict("c".into()), StatusCode::CONFLICT),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status_and_message().0, expected);
        }
    }

    #[test]
    fn test_realtime_errors() {
        let (status, message) =
            ApiError::from(RealtimeError::Forbidden("not your room".into())).status_and_message();
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(message.contains("not your room"));

        let (status, _) =
            ApiError::from(RealtimeError::Broker("down".into())).status_and_message();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
