//! Flower addon error abstractions.

use thiserror::Error;

/// Application error variants.
#[derive(Debug, Error)]
pub enum AppError {
    /// The given input was invalid.
    ///
    /// This always points at a bug in whichever collaborator produced the input, and is never retried.
    #[error("validation error: {0}")]
    InvalidInput(String),
    /// The given cluster is not part of the enrolled fleet.
    #[error("cluster {0:?} is not enrolled in the flower addon fleet")]
    NotEnrolled(String),
    /// An internal error was hit, but the process will remain online.
    #[error("internal server error")]
    Ise(anyhow::Error),
}

/// A result type where the error is an `AppError`.
pub type AppResult<T> = ::std::result::Result<T, AppError>;
