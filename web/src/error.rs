//! Error type for web handlers.
//!
//! [`AppError`] carries an HTTP status, a stable error code for clients and
//! an optional internal source that is logged but never returned.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use raffle_core::entry_store::EntryStoreError;
use serde::Serialize;
use std::fmt;

/// Application error returned by handlers.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    code: &'static str,
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create an error.
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>, code: &'static str) -> Self {
        Self {
            status,
            message: message.into(),
            code,
            source: None,
        }
    }

    /// Attach the internal cause.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// 400 Bad Request.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, "BAD_REQUEST")
    }

    /// 404 Not Found.
    #[must_use]
    pub fn not_found(resource: impl fmt::Display, id: impl fmt::Display) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            format!("{resource} with id {id} not found"),
            "NOT_FOUND",
        )
    }

    /// 409 Conflict.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message, "CONFLICT")
    }

    /// 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message, "INTERNAL_SERVER_ERROR")
    }

    /// 503 Service Unavailable.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message, "SERVICE_UNAVAILABLE")
    }

    /// HTTP status of this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Client-facing error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(
                status = %self.status,
                code = self.code,
                message = %self.message,
                error = ?self.source,
                "Request failed"
            );
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<EntryStoreError> for AppError {
    fn from(err: EntryStoreError) -> Self {
        match err {
            EntryStoreError::NotFound(id) => Self::not_found("Entry", id),
            EntryStoreError::AlreadyExists(id) => Self::conflict(format!("Entry {id} already exists")),
            e @ EntryStoreError::Unavailable(_) => {
                Self::unavailable("Entry store is temporarily unavailable").with_source(e.into())
            }
            e @ (EntryStoreError::DatabaseError(_) | EntryStoreError::SerializationError(_)) => {
                Self::internal("An internal error occurred").with_source(e.into())
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raffle_core::entry::EntryId;

    #[test]
    fn display_includes_code() {
        let err = AppError::bad_request("name is required");
        assert_eq!(err.to_string(), "[BAD_REQUEST] name is required");
    }

    #[test]
    fn missing_entry_is_404() {
        let err = AppError::from(EntryStoreError::NotFound(EntryId::new("E1")));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "[NOT_FOUND] Entry with id E1 not found");
    }

    #[test]
    fn throttled_store_is_503_with_source() {
        let err = AppError::from(EntryStoreError::Unavailable("pool exhausted".into()));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn duplicate_id_is_conflict() {
        let err = AppError::from(EntryStoreError::AlreadyExists(EntryId::new("E1")));
        assert_eq!(err.code(), "CONFLICT");
    }
}
