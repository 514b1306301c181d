//! File system error types.
//!
//! Every variant is one entry of the media file system's error taxonomy.
//! The enum implements [`axum::response::IntoResponse`] so the media
//! middleware can simply return `Err(FsError::NotFound { .. })`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Result alias used throughout the library.
pub type FsResult<T> = Result<T, FsError>;

/// Generate a 16-character hex request ID.
pub fn generate_request_id() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes).to_uppercase()
}

/// Failures surfaced by the virtual file system.
#[derive(Debug, Error)]
pub enum FsError {
    /// A non-overriding write hit an existing blob.
    #[error("File already exists at {path}")]
    AlreadyExists { path: String },

    /// The requested blob does not exist.
    #[error("No file exists at {path}")]
    NotFound { path: String },

    /// The container name breaks the blob service naming rules.
    #[error("Invalid container name '{name}': {reason}")]
    InvalidContainerName { name: String, reason: String },

    /// The credential was rejected or the store could not be reached.
    #[error("Unable to connect to blob storage: {message}")]
    ConnectionFailure { message: String },

    /// The configuration is missing a required value or is malformed.
    #[error("{message}")]
    InvalidConfiguration { message: String },

    /// The flat blob namespace cannot provide this capability.
    #[error("Operation not supported by blob storage: {operation}")]
    UnsupportedOperation { operation: String },

    /// Catch-all for unexpected store failures.
    #[error("Blob storage request failed: {0}")]
    Storage(#[from] anyhow::Error),
}

impl FsError {
    /// Short, stable error code string.
    pub fn code(&self) -> &'static str {
        match self {
            FsError::AlreadyExists { .. } => "AlreadyExists",
            FsError::NotFound { .. } => "NotFound",
            FsError::InvalidContainerName { .. } => "InvalidContainerName",
            FsError::ConnectionFailure { .. } => "ConnectionFailure",
            FsError::InvalidConfiguration { .. } => "InvalidConfiguration",
            FsError::UnsupportedOperation { .. } => "UnsupportedOperation",
            FsError::Storage(_) => "StorageError",
        }
    }

    /// Return the appropriate HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            FsError::AlreadyExists { .. } => StatusCode::CONFLICT,
            FsError::NotFound { .. } => StatusCode::NOT_FOUND,
            FsError::InvalidContainerName { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            FsError::ConnectionFailure { .. } => StatusCode::BAD_GATEWAY,
            FsError::InvalidConfiguration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            FsError::UnsupportedOperation { .. } => StatusCode::NOT_IMPLEMENTED,
            FsError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub(crate) fn connection(message: impl Into<String>) -> Self {
        FsError::ConnectionFailure {
            message: message.into(),
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        FsError::InvalidConfiguration {
            message: message.into(),
        }
    }
}

impl IntoResponse for FsError {
    fn into_response(self) -> Response {
        let request_id = generate_request_id();
        let status = self.status_code();

        // Details of internal failures stay in the logs.
        let message = match &self {
            FsError::NotFound { .. } | FsError::AlreadyExists { .. } => self.to_string(),
            _ => status
                .canonical_reason()
                .unwrap_or("Internal Server Error")
                .to_string(),
        };
        let body = serde_json::json!({
            "code": self.code(),
            "message": message,
            "requestId": request_id,
        })
        .to_string();

        (
            status,
            [
                ("content-type", "application/json".to_string()),
                ("x-request-id", request_id),
            ],
            body,
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_format() {
        let id = generate_request_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn test_status_codes() {
        let not_found = FsError::NotFound {
            path: "1010/media.jpg".into(),
        };
        assert_eq!(not_found.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(not_found.code(), "NotFound");

        let exists = FsError::AlreadyExists {
            path: "1010/media.jpg".into(),
        };
        assert_eq!(exists.status_code(), StatusCode::CONFLICT);

        let conn = FsError::connection("forbidden");
        assert_eq!(conn.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(conn.code(), "ConnectionFailure");

        let unsupported = FsError::UnsupportedOperation {
            operation: "add_physical_file".into(),
        };
        assert_eq!(unsupported.status_code(), StatusCode::NOT_IMPLEMENTED);
    }

    #[test]
    fn test_anyhow_converts_to_storage() {
        let err: FsError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, FsError::Storage(_)));
        assert_eq!(err.code(), "StorageError");
    }

    #[test]
    fn test_messages_name_the_path() {
        let err = FsError::AlreadyExists {
            path: "forms/a.jpg".into(),
        };
        assert_eq!(err.to_string(), "File already exists at forms/a.jpg");
    }

    #[test]
    fn test_into_response_sets_headers() {
        let resp = FsError::NotFound { path: "x".into() }.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            resp.headers().get("content-type").unwrap(),
            "application/json"
        );
        assert!(resp.headers().contains_key("x-request-id"));
    }
}
