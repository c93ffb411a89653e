//! Flower addon manager error abstractions.

use axum::http::StatusCode;

pub use flower_addon_core::AppError;

/// An extension trait for the flower addon core `AppError`.
pub trait AppErrorExt {
    /// Get the HTTP status code and message for this error.
    fn into_status(self) -> (StatusCode, String);
}

impl AppErrorExt for AppError {
    fn into_status(self) -> (StatusCode, String) {
        match self {
            AppError::InvalidInput(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::NotEnrolled(_) => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::Ise(ref err) => {
                tracing::error!(error = ?err, "internal error while serving request");
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
        }
    }
}

/// A result type used with the HTTP server.
pub type HttpResult<T> = ::std::result::Result<T, (StatusCode, String)>;
