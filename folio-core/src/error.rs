use std::sync::Arc;

use folio_model::ModelError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Path escapes the media root: {0}")]
    PathEscape(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Failure observed through a memoised in-flight operation; every
    /// waiter receives the same underlying error.
    #[error(transparent)]
    Shared(Arc<LibraryError>),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LibraryError {
    /// Whether the caller is at fault (4xx class) as opposed to the
    /// environment (5xx class).
    pub fn is_client_error(&self) -> bool {
        match self {
            LibraryError::Validation(_)
            | LibraryError::PathEscape(_)
            | LibraryError::NotFound(_)
            | LibraryError::Conflict(_) => true,
            LibraryError::Shared(inner) => inner.is_client_error(),
            LibraryError::Io(_)
            | LibraryError::Encode(_)
            | LibraryError::Serialization(_)
            | LibraryError::Internal(_) => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            LibraryError::NotFound(_) => true,
            LibraryError::Io(err) => {
                err.kind() == std::io::ErrorKind::NotFound
            }
            LibraryError::Shared(inner) => inner.is_not_found(),
            _ => false,
        }
    }
}

impl From<ModelError> for LibraryError {
    fn from(err: ModelError) -> Self {
        LibraryError::Validation(err.to_string())
    }
}

impl From<tokio::task::JoinError> for LibraryError {
    fn from(err: tokio::task::JoinError) -> Self {
        LibraryError::Internal(format!("background task failed: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, LibraryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_map_to_4xx_class() {
        assert!(LibraryError::Validation("x".into()).is_client_error());
        assert!(LibraryError::PathEscape("../x".into()).is_client_error());
        assert!(LibraryError::Conflict("x".into()).is_client_error());
        assert!(!LibraryError::Encode("x".into()).is_client_error());

        let shared = LibraryError::Shared(Arc::new(LibraryError::NotFound(
            "gallery".into(),
        )));
        assert!(shared.is_client_error());
        assert!(shared.is_not_found());
    }
}
