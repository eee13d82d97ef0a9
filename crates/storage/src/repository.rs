use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use pdf_annotator_core::{Annotation, DocumentId, PageSnapshot};

use crate::error::PersistenceResult;

/// Row of the `documents` table
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRecord {
    pub id: DocumentId,
    pub path: Option<PathBuf>,
    pub page_count: u32,
    /// Unix milliseconds
    pub last_opened: i64,
}

/// Storage backend for annotations
///
/// Implementations never touch the in-memory model; a failed write leaves
/// the caller's page dirty.
#[async_trait]
pub trait AnnotationRepository: Send + Sync {
    /// Apply one page snapshot atomically
    async fn write_page(&self, snapshot: &PageSnapshot) -> PersistenceResult<()>;

    /// Every stored annotation of a document, tombstones included, grouped
    /// by page and ordered by creation time
    async fn load_document(&self, document_id: &DocumentId) -> PersistenceResult<BTreeMap<u32, Vec<Annotation>>>;

    /// Insert or refresh a document row
    async fn record_document(&self, record: &DocumentRecord) -> PersistenceResult<()>;

    /// Documents by `last_opened`, newest first
    async fn recent_documents(&self, limit: u32) -> PersistenceResult<Vec<DocumentRecord>>;
}
