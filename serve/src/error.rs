//! Mapping from internal failures to structured HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use steward::{ErrorBody, ErrorCode, ParseError};

/// 4xx for request validation failures.
pub fn validation_error(err: &ParseError) -> Response {
    let body = ErrorBody::new(ErrorCode::ValidationError, "request", err.to_string());
    (StatusCode::BAD_REQUEST, Json(body.to_response())).into_response()
}

/// 500 for failures that should not normally surface (the agent loop
/// degrades most errors into a final assistant message).
pub fn internal_error(message: impl Into<String>) -> Response {
    let body = ErrorBody::new(ErrorCode::UnknownError, "internal", message);
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body.to_response())).into_response()
}
