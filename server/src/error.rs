use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::database::DatabaseError;
use crate::ingest::IngestError;
use crate::security::SecurityError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("File size must be less than 5MB")]
    TooLarge,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Upload directory not writable: {0}")]
    StorageUnavailable(String),

    #[error("Image processing failed: {0}")]
    EncodeFailure(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn not_found(what: &str) -> Self {
        AppError::NotFound(format!("{what} not found"))
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidInput(_) | AppError::TooLarge => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::StorageUnavailable(_)
            | AppError::EncodeFailure(_)
            | AppError::Database(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::Database(DatabaseError::Sqlite(err))
    }
}

impl From<SecurityError> for AppError {
    fn from(err: SecurityError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::InvalidInput(msg) => AppError::InvalidInput(msg),
            IngestError::TooLarge { .. } => AppError::TooLarge,
            e @ IngestError::StorageUnavailable { .. } => AppError::StorageUnavailable(e.to_string()),
            e @ IngestError::Write { .. } => AppError::StorageUnavailable(e.to_string()),
            IngestError::EncodeFailure(msg) => AppError::EncodeFailure(msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Server-side causes are logged, never sent to the client.
        let message = match &self {
            AppError::StorageUnavailable(_) => {
                error!(error = %self, "Storage unavailable");
                "Upload directory not writable".to_string()
            }
            AppError::EncodeFailure(_) | AppError::Database(_) | AppError::Internal(_) => {
                error!(error = %self, "Request failed");
                "Internal Server Error".to_string()
            }
            _ => self.to_string(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
