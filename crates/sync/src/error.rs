use pdf_annotator_core::StoreError;
use pdf_annotator_storage::PersistenceError;
use pdf_engine::{ExportError, PdfEngineError};

use crate::state::{SyncEvent, SyncState};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Pdf(#[from] PdfEngineError),
    #[error("export failed: {0}")]
    Export(#[from] ExportError),
    #[error("storage error: {0}")]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot handle '{event}' while {from}")]
    InvalidTransition { from: SyncState, event: SyncEvent },
    #[error("no document loaded (state: {0})")]
    NotReady(SyncState),
    #[error("background task failed: {0}")]
    TaskFailed(String),
}

impl SessionError {
    /// True when the session state rejected the call; nothing was changed
    pub fn is_rejected(&self) -> bool {
        matches!(self, SessionError::InvalidTransition { .. } | SessionError::NotReady(_))
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
