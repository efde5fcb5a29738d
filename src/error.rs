//! Error types for the drive_batch crate.

use thiserror::Error;

/// Errors that can occur when authorizing against or talking to Google Drive.
#[derive(Error, Debug)]
pub enum DriveError {
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Token refresh failed: {0}")]
    TokenRefreshError(String),

    #[error("Could not start local callback listener: {0}")]
    CallbackListener(#[source] std::io::Error),

    #[error("Authorization was not granted: {0}")]
    ConsentDenied(String),

    #[error("Invalid client secrets file: {0}")]
    InvalidClientSecrets(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Invalid URL or ID: {0}")]
    InvalidUrlOrId(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Server repeated page token {0:?}; aborting listing")]
    RepeatedPageToken(String),

    #[error("CSV write failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("Upload protocol error: {0}")]
    UploadProtocol(String),
}

/// Result type alias for DriveError.
pub type Result<T> = std::result::Result<T, DriveError>;
