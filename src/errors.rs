use crate::services::{
    analyser::AnalysisError, job_service::JobError, storage_service::StorageError,
};
use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = self.status.as_u16(), error = %self.message, "request failed");
        }

        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ArtifactNotFound(_) => AppError::not_found(err.to_string()),
            StorageError::InvalidName(_) => AppError::bad_request(err.to_string()),
            StorageError::Io(_) => AppError::internal(format!("storage error: {}", err)),
        }
    }
}

impl From<AnalysisError> for AppError {
    fn from(err: AnalysisError) -> Self {
        match err {
            AnalysisError::TimedOut(_) => AppError::new(StatusCode::GATEWAY_TIMEOUT, err.to_string()),
            _ => AppError::new(StatusCode::BAD_GATEWAY, format!("analysis failed: {}", err)),
        }
    }
}

impl From<JobError> for AppError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NotFound(_) => AppError::not_found(err.to_string()),
            JobError::MissingFile | JobError::InvalidFilename(_) | JobError::EmptyUpload => {
                AppError::bad_request(err.to_string())
            }
            JobError::NotReady { .. } | JobError::Busy { .. } => {
                AppError::new(StatusCode::CONFLICT, err.to_string())
            }
            JobError::ReportNotFound(_)
            | JobError::ReportParse { .. }
            | JobError::ReportShape(_) => {
                AppError::new(StatusCode::BAD_GATEWAY, err.to_string())
            }
            JobError::Analysis(inner) => inner.into(),
            JobError::Storage(inner) => inner.into(),
            JobError::Sqlx(inner) => AppError::internal(format!("database error: {}", inner)),
        }
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::new(err.status(), format!("invalid multipart body: {}", err.body_text()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn job_errors_map_to_client_statuses() {
        let id = Uuid::new_v4();
        let cases = [
            (JobError::NotFound(id), StatusCode::NOT_FOUND),
            (JobError::EmptyUpload, StatusCode::BAD_REQUEST),
            (JobError::MissingFile, StatusCode::BAD_REQUEST),
            (
                JobError::Busy {
                    id,
                    status: crate::models::job::JobStatus::Running,
                },
                StatusCode::CONFLICT,
            ),
            (JobError::ReportNotFound(id), StatusCode::BAD_GATEWAY),
            (JobError::ReportShape(id), StatusCode::BAD_GATEWAY),
            (
                JobError::Analysis(AnalysisError::MissingOutput),
                StatusCode::BAD_GATEWAY,
            ),
            (
                JobError::Analysis(AnalysisError::TimedOut(std::time::Duration::from_secs(1))),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                JobError::Storage(StorageError::ArtifactNotFound("x".into())),
                StatusCode::NOT_FOUND,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(AppError::from(err).status, expected);
        }
    }
}
