use std::path::PathBuf;

use crate::filter::FilterError;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the scan pipeline and the catalog store.
///
/// A scan-level caller treats most of these as per-candidate failures: the
/// offending path is logged and skipped, and the batch carries on.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Store(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("failed to probe {path}: {reason}")]
    Probe { path: PathBuf, reason: String },

    #[error("zip error on {path}: {source}")]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    /// Raised during a metadata backfill when a freshly computed hash
    /// belongs to a different record whose file is still present.
    #[error("{hash_kind} for {path} is the same as that of {existing}")]
    HashCollision {
        hash_kind: &'static str,
        path: String,
        existing: String,
    },

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error("worker task failed: {0}")]
    Worker(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn probe(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Probe {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn zip(path: impl Into<PathBuf>, source: zip::result::ZipError) -> Self {
        Error::Zip {
            path: path.into(),
            source,
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Worker(err.to_string())
    }
}
