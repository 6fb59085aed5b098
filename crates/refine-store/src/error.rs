use std::path::PathBuf;

use refine_core::collaborators::CollaboratorError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("cannot create {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("stored record does not decode: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("database schema v{found} is newer than this build (v{supported})")]
    UnsupportedSchema { found: u32, supported: u32 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

impl StoreError {
    /// Lock contention and I/O hiccups; the same statement may succeed later.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy
                    | rusqlite::ErrorCode::DatabaseLocked
                    | rusqlite::ErrorCode::SystemIoFailure
            ),
            Self::CreateDir { .. } => true,
            _ => false,
        }
    }
}

impl From<StoreError> for CollaboratorError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => CollaboratorError::NotFound(what),
            other if other.is_transient() => CollaboratorError::Unavailable(other.to_string()),
            other => CollaboratorError::Invalid(other.to_string()),
        }
    }
}
