//! Maps the domain [`Error`] taxonomy onto HTTP responses (§7, §10.5).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use ov_domain::error::Error;

pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Authorization/existence mismatches must never distinguish
        // themselves from "does not exist" (§7, "never leak existence").
        let (status, message) = match &self.0 {
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Error::NotFound(what) => (StatusCode::NOT_FOUND, format!("{what} not found")),
            Error::Conflict(msg) => (StatusCode::OK, msg.clone()),
            Error::External(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            Error::Io(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            Error::Json(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            Error::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            Error::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// 404, unconditionally — used at endpoint boundaries to avoid leaking
/// whether a resource exists for another owner (§7 Authorization rule,
/// §8.2 "Ownership leak resistance").
pub fn not_found(what: &'static str) -> ApiError {
    ApiError(Error::NotFound(what))
}
