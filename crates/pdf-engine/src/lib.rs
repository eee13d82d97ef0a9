//! PDF access for the annotator
//!
//! Reads page geometry and document identity, writes annotations into a
//! page's `/Annots` array with appearance streams, and reads existing
//! annotations back. Pure Rust on top of `lopdf`.

use std::path::{Path, PathBuf};

pub mod appearance;
pub mod date;
pub mod document;
pub mod export;
pub mod import;
mod objects;

pub use document::{content_hash, DocumentInfo, PageInfo};
pub use export::{write_annotations, ExportError, ExportOptions, ExportOutcome, ExportSnapshot, PageFailure};
pub use import::{import_annotations, list_notes, ImportStats, ImportedAnnotations, NoteInfo};

#[cfg(any(test, feature = "test-util"))]
pub use document::blank_pdf;

#[derive(Debug, Clone)]
pub enum OpenSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl From<PathBuf> for OpenSource {
    fn from(value: PathBuf) -> Self {
        Self::Path(value)
    }
}

impl From<&Path> for OpenSource {
    fn from(value: &Path) -> Self {
        Self::Path(value.to_path_buf())
    }
}

impl From<Vec<u8>> for OpenSource {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PdfEngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF parse error: {0}")]
    Parse(#[from] lopdf::Error),
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: u32, page_count: u32 },
    #[error("encrypted PDFs are not supported")]
    EncryptedUnsupported,
    #[error("document has no pages")]
    NoPages,
    #[error("malformed document: {0}")]
    Malformed(String),
}
