//! Storage error types.
//!
//! [`StorageError`] is the error surfaced by `save`, `read` and the serve
//! handler.  `exists` and `delete` never return it; they collapse every
//! failure into a boolean.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Errors produced by the image storage core.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No account holds a document for the requested path.
    #[error("{file} is not stored in any account")]
    NotFound { file: String },

    /// Transport, auth or server error from one account's document store.
    #[error("document store request to account '{alias}' failed: {source}")]
    StoreCommunication {
        alias: String,
        source: anyhow::Error,
    },

    /// A document's self link does not match any configured endpoint.
    #[error("no configured account owns {href}")]
    OwnershipUnresolved { href: String },

    /// Reading the temporary upload failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stored blob could not be encoded or decoded.
    #[error("malformed blob: {0}")]
    Codec(String),

    /// The account pool could not be built from the given configuration.
    #[error("invalid account configuration: {0}")]
    Config(String),
}

impl StorageError {
    /// Short error name, reported as `name` in the serve error body.
    pub fn name(&self) -> &'static str {
        match self {
            StorageError::NotFound { .. } => "NotFound",
            StorageError::StoreCommunication { .. } => "StoreCommunicationError",
            StorageError::OwnershipUnresolved { .. } => "OwnershipResolutionFailure",
            StorageError::Io(_) => "IoError",
            StorageError::Codec(_) => "CodecError",
            StorageError::Config(_) => "ConfigError",
        }
    }

    /// Wrap an error returned by an account's document client.
    pub fn store(alias: &str, source: anyhow::Error) -> Self {
        StorageError::StoreCommunication {
            alias: alias.to_string(),
            source,
        }
    }

    /// Whether this is a plain "path not stored" miss.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

/// JSON body written by the serve handler on failure.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub name: String,
    pub message: String,
}

impl From<&StorageError> for ErrorBody {
    fn from(err: &StorageError) -> Self {
        Self {
            name: err.name().to_string(),
            message: err.to_string(),
        }
    }
}

impl StorageError {
    /// Render the error as the serve endpoint's `404` JSON response.
    ///
    /// Every failure kind maps to `404`, not only [`StorageError::NotFound`].
    pub fn not_found_response(&self) -> Response {
        (StatusCode::NOT_FOUND, Json(ErrorBody::from(self))).into_response()
    }
}
