//! Document inspection: identity, page sizes and rotation

use std::fs;
use std::path::PathBuf;

use lopdf::Document;
use pdf_annotator_core::{DocumentId, PageSize, Rotation};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::objects::{inherited, number, numbers};
use crate::{OpenSource, PdfEngineError};

/// Geometry of one page as the renderer and the exporter see it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageInfo {
    pub size: PageSize,
    /// Lower-left corner of the MediaBox in default user space
    pub origin: (f64, f64),
    pub rotation: Rotation,
}

/// Immutable description of an opened document
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentInfo {
    pub id: DocumentId,
    pub path: Option<PathBuf>,
    pub pages: Vec<PageInfo>,
}

impl DocumentInfo {
    /// Read the source and inspect it, keeping the bytes for later export
    pub fn open(source: impl Into<OpenSource>) -> Result<(Self, Vec<u8>), PdfEngineError> {
        let (path, bytes) = match source.into() {
            OpenSource::Path(path) => {
                let bytes = fs::read(&path)?;
                (Some(path), bytes)
            }
            OpenSource::Bytes(bytes) => (None, bytes),
        };
        let mut info = Self::inspect(&bytes)?;
        info.path = path;
        Ok((info, bytes))
    }

    pub fn inspect(bytes: &[u8]) -> Result<Self, PdfEngineError> {
        let doc = load_document(bytes)?;
        let pages = page_infos(&doc);
        if pages.is_empty() {
            return Err(PdfEngineError::NoPages);
        }

        let id = DocumentId::new(content_hash(bytes));
        debug!(document = %id, pages = pages.len(), "document inspected");
        Ok(Self { id, path: None, pages })
    }

    pub fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    pub fn page(&self, page_index: u32) -> Result<&PageInfo, PdfEngineError> {
        self.pages
            .get(page_index as usize)
            .ok_or(PdfEngineError::PageOutOfRange { page: page_index, page_count: self.page_count() })
    }
}

/// Parse a document, refusing encrypted files
///
/// Only the trailer decides; `/Encrypt` inside content or annotation text
/// does not count.
pub(crate) fn load_document(bytes: &[u8]) -> Result<Document, PdfEngineError> {
    match Document::load_mem(bytes) {
        Ok(doc) if doc.trailer.has(b"Encrypt") => Err(PdfEngineError::EncryptedUnsupported),
        Ok(doc) => Ok(doc),
        // The reader may give up while decrypting; look at the trailer ourselves
        Err(_) if trailer_mentions_encrypt(bytes) => Err(PdfEngineError::EncryptedUnsupported),
        Err(error) => Err(error.into()),
    }
}

/// Tail of the file from the last `trailer` keyword, or the final 2 KiB for
/// cross-reference streams
fn trailer_mentions_encrypt(bytes: &[u8]) -> bool {
    const KEYWORD: &[u8] = b"trailer";
    let start = bytes
        .windows(KEYWORD.len())
        .rposition(|window| window == KEYWORD)
        .unwrap_or_else(|| bytes.len().saturating_sub(2048));
    bytes[start..].windows(b"/Encrypt".len()).any(|window| window == b"/Encrypt")
}

/// Lowercase hex SHA-256 of the file bytes
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub(crate) fn page_infos(doc: &Document) -> Vec<PageInfo> {
    doc.get_pages()
        .into_values()
        .map(|page_id| page_info(doc, page_id))
        .collect()
}

pub(crate) fn page_info(doc: &Document, page_id: lopdf::ObjectId) -> PageInfo {
    let (origin, size) = inherited(doc, page_id, b"MediaBox")
        .and_then(|object| numbers(doc, object))
        .filter(|values| values.len() == 4)
        .map(|values| {
            let (x0, y0, x1, y1) = (values[0], values[1], values[2], values[3]);
            ((x0.min(x1), y0.min(y1)), PageSize::new((x1 - x0).abs(), (y1 - y0).abs()))
        })
        .unwrap_or(((0.0, 0.0), PageSize::letter()));

    let rotation = inherited(doc, page_id, b"Rotate")
        .and_then(number)
        .map(|degrees| Rotation::from_degrees(degrees as i64))
        .unwrap_or_default();

    PageInfo { size, origin, rotation }
}

/// Minimal document with one empty page per entry
#[cfg(any(test, feature = "test-util"))]
pub fn blank_pdf(pages: &[PageSize]) -> Vec<u8> {
    use lopdf::{dictionary, Object};

    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    let kids: Vec<Object> = pages
        .iter()
        .map(|size| {
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => Object::Reference(pages_id),
                "MediaBox" => vec![0.into(), 0.into(), Object::Real(size.width as f32), Object::Real(size.height as f32)],
            });
            Object::Reference(page_id)
        })
        .collect();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Count" => kids.len() as i64,
            "Kids" => kids,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
    });
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).expect("in-memory save");
    buffer
}
