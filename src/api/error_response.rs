//! HTTP error response handling for the API
//!
//! Maps [`SplitError`] onto status codes and a JSON body of the form
//! `{"error": {"code": "...", "message": "..."}}`.

use crate::error::SplitError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// JSON error body returned by every failing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
            },
        }
    }
}

impl From<&SplitError> for ApiError {
    fn from(e: &SplitError) -> Self {
        Self::new(e.code(), e.to_string())
    }
}

/// HTTP status for a domain error.
pub fn status_code(e: &SplitError) -> StatusCode {
    match e {
        SplitError::JobNotFound { .. }
        | SplitError::FolderNotFound { .. }
        | SplitError::FileNotFound { .. } => StatusCode::NOT_FOUND,
        SplitError::InvalidFileType { .. }
        | SplitError::MissingUpload
        | SplitError::NotAPdf { .. } => StatusCode::BAD_REQUEST,
        SplitError::CorruptPdf { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        SplitError::JobInProgress { .. } | SplitError::DuplicateJob { .. } => StatusCode::CONFLICT,
        SplitError::StoreFull { .. } => StatusCode::SERVICE_UNAVAILABLE,
        SplitError::InvariantViolation { .. }
        | SplitError::ArchiveFailed { .. }
        | SplitError::Io { .. }
        | SplitError::InvalidConfig(_)
        | SplitError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for SplitError {
    fn into_response(self) -> Response {
        let status = status_code(&self);
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::debug!("Request rejected: {}", self);
        }
        (status, Json(ApiError::from(&self))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_family_is_404() {
        for e in [
            SplitError::JobNotFound { id: "1".into() },
            SplitError::FolderNotFound { folder: "a_1".into() },
            SplitError::FileNotFound {
                folder: "a_1".into(),
                file: "a_page1.pdf".into(),
            },
        ] {
            assert_eq!(status_code(&e), StatusCode::NOT_FOUND, "{e}");
        }
    }

    #[test]
    fn client_and_server_errors_are_distinct() {
        assert_eq!(
            status_code(&SplitError::MissingUpload),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_code(&SplitError::CorruptPdf {
                filename: "a.pdf".into(),
                detail: "no xref".into()
            }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_code(&SplitError::JobInProgress {
                folder: "a_1".into()
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_code(&SplitError::StoreFull { capacity: 4 }),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_code(&SplitError::ArchiveFailed {
                folder: "a_1".into(),
                detail: "disk full".into()
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn error_into_response_has_json_body() {
        let response = SplitError::JobNotFound { id: "42".into() }.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let api_error: ApiError = serde_json::from_slice(&body).unwrap();
        assert_eq!(api_error.error.code, "job_not_found");
        assert!(api_error.error.message.contains("42"));
    }
}
