//! Error type shared by the coordinators, the facade and the HTTP layer

use thiserror::Error;

use crate::storage::StorageError;

pub type DocumentResult<T> = std::result::Result<T, DocumentError>;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A record and its stored bytes disagree
    #[error("inconsistent state: {0}")]
    Inconsistent(String),

    #[error("storage error on {path}: {message}")]
    Storage { path: String, message: String },

    #[error("database error: {0}")]
    Database(sqlx::Error),

    #[error("local file error: {0}")]
    Io(#[from] std::io::Error),
}

impl DocumentError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DocumentError::NotFound(_))
    }
}

impl From<StorageError> for DocumentError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::NotFound(path) => DocumentError::NotFound(path),
            StorageError::AlreadyExists(path) => DocumentError::AlreadyExists(path),
            StorageError::PermissionDenied(msg) => DocumentError::PermissionDenied(msg),
            StorageError::Unavailable(msg) => DocumentError::Unavailable(msg),
            StorageError::Unsupported(msg) => DocumentError::Unsupported(msg),
            StorageError::InvalidPath(msg) => DocumentError::InvalidInput(msg),
            StorageError::Backend { path, message } => DocumentError::Storage { path, message },
        }
    }
}

impl From<sqlx::Error> for DocumentError {
    fn from(error: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_error) = &error {
            if db_error.is_unique_violation() {
                return DocumentError::AlreadyExists(db_error.message().to_string());
            }
            if db_error.is_foreign_key_violation() {
                return DocumentError::NotFound(format!("parent record ({})", db_error.message()));
            }
        }
        if matches!(error, sqlx::Error::RowNotFound) {
            return DocumentError::NotFound("record".to_string());
        }
        DocumentError::Database(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_errors_map_one_to_one() {
        let err: DocumentError = StorageError::NotFound("uploads/a/a.pdf".into()).into();
        assert!(err.is_not_found());

        let err: DocumentError = StorageError::InvalidPath("../x".into()).into();
        assert!(matches!(err, DocumentError::InvalidInput(_)));

        let err: DocumentError = StorageError::Unavailable("namenode down".into()).into();
        assert!(matches!(err, DocumentError::Unavailable(_)));

        let err: DocumentError = StorageError::Backend {
            path: "uploads".into(),
            message: "directory not empty".into(),
        }
        .into();
        assert!(matches!(err, DocumentError::Storage { .. }));
    }

    #[test]
    fn test_row_not_found_is_not_found() {
        let err: DocumentError = sqlx::Error::RowNotFound.into();
        assert!(err.is_not_found());

        let err: DocumentError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, DocumentError::Database(_)));
    }
}
