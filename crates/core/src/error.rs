use crate::annotation::{AnnotationId, AnnotationKind};

/// Errors raised by the annotation store
///
/// Every variant is raised before any state changes.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("invalid {kind} geometry: {reason}")]
    InvalidGeometry { kind: AnnotationKind, reason: String },
    #[error("annotation {0} not found")]
    NotFound(AnnotationId),
    #[error("annotation {0} belongs to another document")]
    ForeignDocument(AnnotationId),
}

impl StoreError {
    pub(crate) fn invalid_geometry(kind: AnnotationKind, reason: impl Into<String>) -> Self {
        StoreError::InvalidGeometry { kind, reason: reason.into() }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
