use std::path::PathBuf;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid or missing startup setting.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("open store at {path}: {source}")]
    StoreOpen {
        path: PathBuf,
        #[source]
        source: redb::DatabaseError,
    },

    #[error("listen on {addr}: {source}")]
    Listen {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Post-assembly initialization or migration failed.
    #[error("setup failed: {0}")]
    Setup(String),

    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("path escapes scope: {}", .0.display())]
    PathEscape(PathBuf),

    #[error("build failed: {0}")]
    Build(String),

    #[error("clean failed: {0}")]
    Clean(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("store: {0}")]
    Store(#[from] redb::Error),

    #[error("codec: {0}")]
    Codec(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Fatal errors end startup; everything else is scoped to one request.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::StoreOpen { .. } | Self::Listen { .. } | Self::Setup(_)
        )
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::DuplicateKey(_) => StatusCode::CONFLICT,
            Self::PathEscape(_) | Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Io(e) if e.kind() == std::io::ErrorKind::NotFound => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// redb splits its failures across several types; fold them into `Store`.
macro_rules! store_error_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Error {
                fn from(e: $ty) -> Self {
                    Self::Store(redb::Error::from(e))
                }
            }
        )*
    };
}

store_error_from!(
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_categories() {
        assert!(Error::Config("x".into()).is_fatal());
        assert!(Error::Setup("x".into()).is_fatal());
        assert!(!Error::DuplicateKey("alice".into()).is_fatal());
        assert!(!Error::PathEscape("../x".into()).is_fatal());
        assert!(!Error::Build("exit 1".into()).is_fatal());
    }

    #[test]
    fn recoverable_statuses() {
        assert_eq!(
            Error::DuplicateKey("alice".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            Error::PathEscape("../etc".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            Error::Clean("busy".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
