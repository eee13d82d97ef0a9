use pdf_annotator_core::AnnotationId;

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("corrupt annotation record {id}: {reason}")]
    CorruptRecord { id: String, reason: String },
    #[error("flush queue is closed")]
    QueueClosed,
    #[error("unable to resolve local data directory")]
    NoDataDirectory,
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// SQLite primary result codes worth waiting out
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

impl PersistenceError {
    pub(crate) fn corrupt(id: impl ToString, reason: impl Into<String>) -> Self {
        Self::CorruptRecord { id: id.to_string(), reason: reason.into() }
    }

    pub(crate) fn corrupt_annotation(id: AnnotationId, reason: impl Into<String>) -> Self {
        Self::corrupt(id, reason)
    }

    /// Whether retrying the same operation may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            PersistenceError::Io(_) => true,
            PersistenceError::Database(error) => match error {
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed => true,
                sqlx::Error::Database(db_error) => db_error
                    .code()
                    .and_then(|code| code.parse::<i32>().ok())
                    .is_some_and(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED)),
                _ => false,
            },
            PersistenceError::Serialization(_)
            | PersistenceError::CorruptRecord { .. }
            | PersistenceError::QueueClosed
            | PersistenceError::NoDataDirectory => false,
        }
    }
}
