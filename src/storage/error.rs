//! Common failure taxonomy for storage backends
//!
//! Backends translate their native errors (io errors, WebHDFS responses,
//! transport failures) into [`StorageError`] so nothing above the storage
//! boundary has to know which backend is in use.

use serde::Deserialize;
use std::io;
use thiserror::Error;

pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    #[error("operation not supported: {0}")]
    Unsupported(String),

    #[error("invalid storage path: {0}")]
    InvalidPath(String),

    /// Backend-specific failure that fits none of the other kinds,
    /// e.g. a non-recursive delete of a non-empty directory.
    #[error("storage operation failed on {path}: {message}")]
    Backend { path: String, message: String },
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, StorageError::Unavailable(_))
    }

    /// Short name of the failure kind, used in log fields
    pub fn kind(&self) -> &'static str {
        match self {
            StorageError::NotFound(_) => "not_found",
            StorageError::AlreadyExists(_) => "already_exists",
            StorageError::PermissionDenied(_) => "permission_denied",
            StorageError::Unavailable(_) => "unavailable",
            StorageError::Unsupported(_) => "unsupported",
            StorageError::InvalidPath(_) => "invalid_path",
            StorageError::Backend { .. } => "backend",
        }
    }

    /// Classify a local filesystem error for the given path
    pub fn from_io(error: io::Error, path: &str) -> Self {
        match error.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound(path.to_string()),
            io::ErrorKind::AlreadyExists => StorageError::AlreadyExists(path.to_string()),
            io::ErrorKind::PermissionDenied => StorageError::PermissionDenied(path.to_string()),
            io::ErrorKind::Unsupported => {
                StorageError::Unsupported(format!("{}: {}", path, error))
            }
            io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe => {
                // Network filesystems surface outages as io errors
                StorageError::Unavailable(format!("{}: {}", path, error))
            }
            _ => StorageError::Backend {
                path: path.to_string(),
                message: error.to_string(),
            },
        }
    }

    /// Classify a transport-level failure of an HTTP backend
    pub fn from_reqwest(error: reqwest::Error, path: &str) -> Self {
        if error.is_timeout() {
            StorageError::Unavailable(format!("request for {} timed out: {}", path, error))
        } else if error.is_connect() || error.is_request() {
            StorageError::Unavailable(format!("cannot reach backend for {}: {}", path, error))
        } else if error.is_decode() || error.is_body() {
            StorageError::Backend {
                path: path.to_string(),
                message: format!("malformed response: {}", error),
            }
        } else {
            StorageError::Unavailable(format!("{}: {}", path, error))
        }
    }

    /// Classify a non-success WebHDFS response from its status code and
    /// (optional) RemoteException body.
    pub fn from_webhdfs(status: u16, remote: Option<&RemoteException>, path: &str) -> Self {
        if let Some(remote) = remote {
            match remote.exception.as_str() {
                "FileNotFoundException" => return StorageError::NotFound(path.to_string()),
                "FileAlreadyExistsException" | "AlreadyBeingCreatedException" => {
                    return StorageError::AlreadyExists(path.to_string())
                }
                "AccessControlException" | "SecurityException" | "AuthorizationException" => {
                    return StorageError::PermissionDenied(format!("{}: {}", path, remote.message))
                }
                "UnsupportedOperationException" => {
                    return StorageError::Unsupported(format!("{}: {}", path, remote.message))
                }
                "StandbyException" | "RetriableException" | "SafeModeException" => {
                    return StorageError::Unavailable(format!("{}: {}", path, remote.message))
                }
                "IllegalArgumentException" | "InvalidPathException" => {
                    return StorageError::InvalidPath(format!("{}: {}", path, remote.message))
                }
                // WebHDFS answers any other IOException with 403, so the status
                // is only trusted when there is no exception body to go by
                _ => {
                    return StorageError::Backend {
                        path: path.to_string(),
                        message: format!("{}: {}", remote.exception, remote.message),
                    }
                }
            }
        }

        match status {
            404 => StorageError::NotFound(path.to_string()),
            401 | 403 => StorageError::PermissionDenied(format!("{}: HTTP {}", path, status)),
            409 => StorageError::AlreadyExists(path.to_string()),
            500..=599 => StorageError::Unavailable(format!("{}: HTTP {}", path, status)),
            _ => StorageError::Backend {
                path: path.to_string(),
                message: format!("HTTP {}", status),
            },
        }
    }
}

/// Error payload returned by the namenode and datanodes
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteException {
    pub exception: String,
    #[serde(rename = "javaClassName", default)]
    pub java_class_name: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RemoteExceptionEnvelope {
    #[serde(rename = "RemoteException")]
    pub remote_exception: RemoteException,
}

impl RemoteException {
    pub fn parse(body: &str) -> Option<Self> {
        serde_json::from_str::<RemoteExceptionEnvelope>(body)
            .ok()
            .map(|envelope| envelope.remote_exception)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_classification() {
        let err = StorageError::from_io(io::Error::from(io::ErrorKind::NotFound), "a/b.pdf");
        assert!(err.is_not_found());

        let err = StorageError::from_io(io::Error::from(io::ErrorKind::PermissionDenied), "a");
        assert!(matches!(err, StorageError::PermissionDenied(_)));

        let err = StorageError::from_io(io::Error::from(io::ErrorKind::ConnectionRefused), "a");
        assert!(err.is_unavailable());

        let err = StorageError::from_io(io::Error::new(io::ErrorKind::Other, "weird"), "a");
        assert_eq!(err.kind(), "backend");
    }

    #[test]
    fn test_remote_exception_parsing() {
        let body = r#"{"RemoteException":{"exception":"FileNotFoundException","javaClassName":"java.io.FileNotFoundException","message":"File does not exist: /user/hdfs/x"}}"#;
        let remote = RemoteException::parse(body).expect("should parse");
        assert_eq!(remote.exception, "FileNotFoundException");
        assert_eq!(remote.java_class_name, "java.io.FileNotFoundException");

        assert!(RemoteException::parse("<html>gateway error</html>").is_none());
    }

    #[test]
    fn test_webhdfs_classification_prefers_exception_name() {
        let remote = RemoteException {
            exception: "AccessControlException".to_string(),
            java_class_name: String::new(),
            message: "Permission denied: user=web".to_string(),
        };
        let err = StorageError::from_webhdfs(500, Some(&remote), "uploads/a");
        assert!(matches!(err, StorageError::PermissionDenied(_)));

        let remote = RemoteException {
            exception: "PathIsNotEmptyDirectoryException".to_string(),
            java_class_name: String::new(),
            message: "uploads is non empty".to_string(),
        };
        let err = StorageError::from_webhdfs(403, Some(&remote), "uploads");
        assert_eq!(err.kind(), "backend");
    }

    #[test]
    fn test_webhdfs_classification_by_status() {
        assert!(StorageError::from_webhdfs(404, None, "x").is_not_found());
        assert!(StorageError::from_webhdfs(503, None, "x").is_unavailable());
        assert!(matches!(
            StorageError::from_webhdfs(409, None, "x"),
            StorageError::AlreadyExists(_)
        ));
        assert_eq!(StorageError::from_webhdfs(400, None, "x").kind(), "backend");
    }
}
