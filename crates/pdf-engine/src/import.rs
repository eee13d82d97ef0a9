//! Reading annotations already present in a PDF
//!
//! Supported subtypes (Highlight, Underline, Ink, Square, FreeText, Text) are
//! converted back into [`Annotation`] values. `/NM` is reused as the
//! annotation ID when it is a UUID, so files written by the exporter import
//! with stable identities.

use std::collections::BTreeMap;

use lopdf::{Dictionary, Document, ObjectId};
use pdf_annotator_core::{
    now_millis, Annotation, AnnotationId, AnnotationStyle, AnnotationVariant, Color, DocumentId, PageCoordinate,
};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::date::parse_pdf_date;
use crate::document::{load_document, page_info};
use crate::objects::{dict_name, dict_text, number, numbers, resolve};
use crate::PdfEngineError;

/// Statistics about an import pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportStats {
    /// Annotation dictionaries found on all pages
    pub total_found: usize,
    pub imported: usize,
    /// Unsupported subtypes and unusable geometry
    pub skipped: usize,
    /// Found annotations per `/Subtype`
    pub by_subtype: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default)]
pub struct ImportedAnnotations {
    pub pages: BTreeMap<u32, Vec<Annotation>>,
    pub stats: ImportStats,
}

impl ImportedAnnotations {
    pub fn len(&self) -> usize {
        self.pages.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A text-bearing note found in the document
#[derive(Debug, Clone, PartialEq)]
pub struct NoteInfo {
    pub page_index: u32,
    /// `Text` or `FreeText`
    pub subtype: String,
    pub contents: String,
    pub author: Option<String>,
    /// Unix milliseconds from `/M`
    pub modified_at: Option<i64>,
}

/// Text and FreeText notes with non-empty contents, in page order
pub fn list_notes(bytes: &[u8]) -> Result<Vec<NoteInfo>, PdfEngineError> {
    let doc = load_document(bytes)?;
    let mut notes = Vec::new();
    for (page_index, page_id) in page_ids(&doc) {
        for dict in page_annotations(&doc, page_id) {
            let Some(subtype) = dict_name(dict, b"Subtype") else {
                continue;
            };
            if subtype != b"Text" && subtype != b"FreeText" {
                continue;
            }
            let Some(contents) = dict_text(&doc, dict, b"Contents").filter(|text| !text.trim().is_empty()) else {
                continue;
            };
            notes.push(NoteInfo {
                page_index,
                subtype: String::from_utf8_lossy(subtype).into_owned(),
                contents,
                author: dict_text(&doc, dict, b"T"),
                modified_at: dict_text(&doc, dict, b"M").as_deref().and_then(parse_pdf_date),
            });
        }
    }
    Ok(notes)
}

/// Convert every supported annotation of the document
pub fn import_annotations(bytes: &[u8], document_id: &DocumentId) -> Result<ImportedAnnotations, PdfEngineError> {
    let doc = load_document(bytes)?;
    let mut imported = ImportedAnnotations::default();

    for (page_index, page_id) in page_ids(&doc) {
        let origin = page_info(&doc, page_id).origin;
        for dict in page_annotations(&doc, page_id) {
            let subtype = dict_name(dict, b"Subtype")
                .map(|name| String::from_utf8_lossy(name).into_owned())
                .unwrap_or_else(|| "Unknown".to_string());
            imported.stats.total_found += 1;
            *imported.stats.by_subtype.entry(subtype.clone()).or_default() += 1;

            match convert(&doc, dict, &subtype, origin) {
                Some((variant, style)) if variant.validate().is_ok() => {
                    let annotation = finish(&doc, dict, document_id, page_index, variant, style);
                    trace!(id = %annotation.id(), page = page_index, %subtype, "annotation imported");
                    imported.pages.entry(page_index).or_default().push(annotation);
                    imported.stats.imported += 1;
                }
                _ => {
                    trace!(page = page_index, %subtype, "annotation skipped");
                    imported.stats.skipped += 1;
                }
            }
        }
    }

    debug!(
        document = %document_id,
        found = imported.stats.total_found,
        imported = imported.stats.imported,
        skipped = imported.stats.skipped,
        "annotations imported"
    );
    Ok(imported)
}

/// 0-based page indices with their object IDs
fn page_ids(doc: &Document) -> impl Iterator<Item = (u32, ObjectId)> {
    doc.get_pages().into_iter().map(|(number, id)| (number - 1, id))
}

fn page_annotations(doc: &Document, page_id: ObjectId) -> Vec<&Dictionary> {
    let Some(annots) = doc
        .get_dictionary(page_id)
        .ok()
        .and_then(|page| page.get(b"Annots").ok())
        .and_then(|annots| resolve(doc, annots))
        .and_then(|annots| annots.as_array().ok())
    else {
        return Vec::new();
    };
    annots
        .iter()
        .filter_map(|entry| resolve(doc, entry)?.as_dict().ok())
        .collect()
}

fn convert(
    doc: &Document,
    dict: &Dictionary,
    subtype: &str,
    origin: (f64, f64),
) -> Option<(AnnotationVariant, AnnotationStyle)> {
    let point = |x: f64, y: f64| PageCoordinate::new(x - origin.0, y - origin.1);
    let rect = dict.get(b"Rect").ok().and_then(|rect| numbers(doc, rect)).filter(|r| r.len() == 4);
    let rect = rect.map(|r| [r[0].min(r[2]), r[1].min(r[3]), r[0].max(r[2]), r[1].max(r[3])]);
    let color = dict.get(b"C").ok().and_then(|c| numbers(doc, c)).and_then(|c| color_from_components(&c));
    let opacity = dict
        .get(b"CA")
        .ok()
        .and_then(|ca| resolve(doc, ca))
        .and_then(number)
        .map(|ca| ca.clamp(0.0, 1.0))
        .unwrap_or(1.0);
    let border = border_width(doc, dict);

    let (variant, color, stroke_width) = match subtype {
        "Highlight" | "Underline" => {
            let quads = dict
                .get(b"QuadPoints")
                .ok()
                .and_then(|q| numbers(doc, q))
                .unwrap_or_default();
            let mut paths = Vec::new();
            let mut height = 0.0_f64;
            for quad in quads.chunks_exact(8) {
                // UL, UR, LL, LR
                let (ul, ur, ll, lr) = ((quad[0], quad[1]), (quad[2], quad[3]), (quad[4], quad[5]), (quad[6], quad[7]));
                let start = point((ul.0 + ll.0) / 2.0, (ul.1 + ll.1) / 2.0);
                let end = point((ur.0 + lr.0) / 2.0, (ur.1 + lr.1) / 2.0);
                height = height.max((ul.0 - ll.0).hypot(ul.1 - ll.1));
                paths.push(vec![start, end]);
            }
            if paths.is_empty() {
                let [x0, y0, x1, y1] = rect?;
                let mid = (y0 + y1) / 2.0;
                paths.push(vec![point(x0, mid), point(x1, mid)]);
                height = y1 - y0;
            }

            if subtype == "Highlight" {
                let width = if height > 0.0 { height } else { AnnotationStyle::highlighter().stroke_width };
                (AnnotationVariant::Highlight { paths }, color.unwrap_or(Color::YELLOW), width)
            } else {
                let width = if height > 0.0 { height } else { 1.0 };
                (AnnotationVariant::Underline { paths }, color.unwrap_or(Color::BLUE), width)
            }
        }
        "Ink" => {
            let ink_list = dict.get(b"InkList").ok().and_then(|list| resolve(doc, list))?;
            let paths: Vec<Vec<PageCoordinate>> = ink_list
                .as_array()
                .ok()?
                .iter()
                .filter_map(|path| numbers(doc, path))
                .map(|values| values.chunks_exact(2).map(|xy| point(xy[0], xy[1])).collect::<Vec<_>>())
                .filter(|path| !path.is_empty())
                .collect();
            (AnnotationVariant::FreehandStroke { paths }, color.unwrap_or(Color::BLACK), border.unwrap_or(1.0))
        }
        "Square" => {
            let [x0, y0, x1, y1] = rect?;
            let width = border.unwrap_or(1.0);
            let inset = (width / 2.0).min((x1 - x0) / 2.0).min((y1 - y0) / 2.0);
            let variant = AnnotationVariant::rectangle(point(x0 + inset, y0 + inset), point(x1 - inset, y1 - inset));
            (variant, color.unwrap_or(Color::BLACK), width)
        }
        "FreeText" | "Text" => {
            let [x0, _, _, y1] = rect?;
            let text = dict_text(doc, dict, b"Contents").unwrap_or_default();
            (AnnotationVariant::text_note(point(x0, y1), text), color.unwrap_or(Color::NOTE), 0.0)
        }
        _ => return None,
    };

    Some((variant, AnnotationStyle { color, stroke_width, opacity }))
}

fn finish(
    doc: &Document,
    dict: &Dictionary,
    document_id: &DocumentId,
    page_index: u32,
    variant: AnnotationVariant,
    style: AnnotationStyle,
) -> Annotation {
    let id: AnnotationId = dict_text(doc, dict, b"NM")
        .and_then(|nm| Uuid::parse_str(nm.trim()).ok())
        .unwrap_or_else(Uuid::new_v4);
    let modified = dict_text(doc, dict, b"M").as_deref().and_then(parse_pdf_date);
    let created = dict_text(doc, dict, b"CreationDate").as_deref().and_then(parse_pdf_date);
    let fallback = now_millis();
    let created_at = created.or(modified).unwrap_or(fallback);
    let modified_at = modified.unwrap_or(created_at).max(created_at);

    Annotation::with_id(id, document_id.clone(), page_index, variant, style)
        .with_author(dict_text(doc, dict, b"T"))
        .with_timestamps(created_at, modified_at)
}

/// `/BS /W`, falling back to the legacy `/Border` array
fn border_width(doc: &Document, dict: &Dictionary) -> Option<f64> {
    let from_style = dict
        .get(b"BS")
        .ok()
        .and_then(|bs| resolve(doc, bs))
        .and_then(|bs| bs.as_dict().ok())
        .and_then(|bs| bs.get(b"W").ok())
        .and_then(|w| resolve(doc, w))
        .and_then(number);
    from_style.or_else(|| {
        let border = numbers(doc, dict.get(b"Border").ok()?)?;
        border.get(2).copied()
    })
}

/// `/C`: gray, RGB or CMYK
fn color_from_components(components: &[f64]) -> Option<Color> {
    let channel = |value: f64| (value.clamp(0.0, 1.0) * 255.0).round() as u8;
    match *components {
        [gray] => Some(Color::rgb(channel(gray), channel(gray), channel(gray))),
        [r, g, b] => Some(Color::rgb(channel(r), channel(g), channel(b))),
        [c, m, y, k] => Some(Color::rgb(
            channel((1.0 - c) * (1.0 - k)),
            channel((1.0 - m) * (1.0 - k)),
            channel((1.0 - y) * (1.0 - k)),
        )),
        _ => None,
    }
}
