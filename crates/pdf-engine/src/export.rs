//! Writing annotations into a PDF's page `/Annots` arrays
//!
//! Annotations are identified in the file by `/NM` (their UUID). Before new
//! dictionaries are appended, any existing entry whose `/NM` belongs to the
//! snapshot, or to a retired (deleted) annotation, is removed, so exporting
//! the same model twice never duplicates annotations.

use std::collections::{BTreeMap, BTreeSet};

use lopdf::{dictionary, Dictionary, Document, Object, ObjectId};
use pdf_annotator_core::{
    Annotation, AnnotationId, AnnotationKind, AnnotationStore, AnnotationVariant, CancellationToken, Color,
    ExportConfig, PageCoordinate, TextNoteStyle, TEXT_NOTE_SIZE,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::appearance::{self, Point, Quad, FONT_NAME, LINE_HEIGHT};
use crate::date::to_pdf_date;
use crate::document::{load_document, page_info};
use crate::objects::{dict_text, inherited, name, real, reals, resolve, text_string};
use crate::PdfEngineError;

/// Inner margin of free-text boxes, in points
const TEXT_PADDING: f64 = 4.0;

/// Print flag
const FLAG_PRINT: i64 = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct ExportOptions {
    pub text_note_style: TextNoteStyle,
    pub font_size: f64,
    /// `/T` for annotations without an author of their own
    pub default_author: Option<String>,
    pub generate_appearances: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self::from(&ExportConfig::default())
    }
}

impl From<&ExportConfig> for ExportOptions {
    fn from(config: &ExportConfig) -> Self {
        Self {
            text_note_style: config.text_note_style,
            font_size: config.font_size,
            default_author: config.author.clone(),
            generate_appearances: config.generate_appearances,
        }
    }
}

/// Point-in-time copy of what an export should write
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportSnapshot {
    /// Active annotations by page
    pub annotations: BTreeMap<u32, Vec<Annotation>>,
    /// Soft-deleted annotations whose earlier exports must be removed
    pub retired: BTreeSet<AnnotationId>,
}

impl ExportSnapshot {
    pub fn from_store(store: &AnnotationStore) -> Self {
        let retired = store
            .pages()
            .flat_map(|page| store.list_for_page(page))
            .filter(|annotation| annotation.is_deleted())
            .map(Annotation::id)
            .collect();
        Self { annotations: store.snapshot_active(), retired }
    }

    pub fn annotation_count(&self) -> usize {
        self.annotations.values().map(Vec::len).sum()
    }

    fn managed_ids(&self) -> BTreeSet<AnnotationId> {
        self.annotations
            .values()
            .flatten()
            .map(Annotation::id)
            .chain(self.retired.iter().copied())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFailure {
    pub page_index: u32,
    pub reason: String,
}

#[derive(Debug)]
pub struct ExportOutcome {
    /// Complete serialized document
    pub bytes: Vec<u8>,
    /// Annotation dictionaries appended
    pub written: usize,
    /// Earlier dictionaries removed because they were rewritten or retired
    pub replaced: usize,
    /// Pages whose `/Annots` changed
    pub pages: Vec<u32>,
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("export cancelled")]
    Cancelled,
    #[error("export failed on {} page(s)", .0.len())]
    PagesFailed(Vec<PageFailure>),
    #[error(transparent)]
    Source(#[from] PdfEngineError),
    #[error("failed to write document: {0}")]
    Write(String),
}

impl ExportError {
    pub fn failed_pages(&self) -> &[PageFailure] {
        match self {
            ExportError::PagesFailed(failures) => failures,
            _ => &[],
        }
    }
}

/// Produce a copy of `source` carrying the snapshot's annotations
///
/// The cancellation token is checked between pages and before
/// serialization. Page failures are collected and reported together.
pub fn write_annotations(
    source: &[u8],
    snapshot: &ExportSnapshot,
    options: &ExportOptions,
    cancel: &CancellationToken,
) -> Result<ExportOutcome, ExportError> {
    let mut doc = load_document(source)?;
    let pages = doc.get_pages();
    let managed = snapshot.managed_ids();

    let mut failures = Vec::new();
    let mut touched = Vec::new();
    let mut written = 0;
    let mut replaced = 0;

    for (&page_number, &page_id) in &pages {
        if cancel.is_cancelled() {
            info!("export cancelled between pages");
            return Err(ExportError::Cancelled);
        }

        let page_index = page_number - 1;
        let annotations = snapshot.annotations.get(&page_index).map(Vec::as_slice).unwrap_or_default();
        match rewrite_page(&mut doc, page_id, annotations, &managed, options) {
            Ok((removed, added)) => {
                if removed > 0 || added > 0 {
                    touched.push(page_index);
                }
                replaced += removed;
                written += added;
                debug!(page = page_index, removed, added, "page annotations rewritten");
            }
            Err(reason) => {
                warn!(page = page_index, %reason, "page export failed");
                failures.push(PageFailure { page_index, reason });
            }
        }
    }

    let page_count = pages.len() as u32;
    for &page_index in snapshot.annotations.keys().filter(|&&page| page >= page_count) {
        warn!(page = page_index, page_count, "annotations on a page the document does not have");
        failures.push(PageFailure {
            page_index,
            reason: format!("page out of range (page_count={page_count})"),
        });
    }

    if !failures.is_empty() {
        return Err(ExportError::PagesFailed(failures));
    }
    if cancel.is_cancelled() {
        info!("export cancelled before serialization");
        return Err(ExportError::Cancelled);
    }

    if replaced > 0 {
        doc.prune_objects();
    }

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).map_err(|e| ExportError::Write(e.to_string()))?;
    info!(written, replaced, pages = touched.len(), "annotations exported");
    Ok(ExportOutcome { bytes, written, replaced, pages: touched })
}

/// Replace managed entries of one page's `/Annots`; returns (removed, added)
fn rewrite_page(
    doc: &mut Document,
    page_id: ObjectId,
    annotations: &[Annotation],
    managed: &BTreeSet<AnnotationId>,
    options: &ExportOptions,
) -> Result<(usize, usize), String> {
    let existing = existing_annots(doc, page_id)?;
    let before = existing.len();
    let mut kept: Vec<Object> = existing
        .into_iter()
        .filter(|entry| !annotation_uuid(doc, entry).is_some_and(|id| managed.contains(&id)))
        .collect();
    let removed = before - kept.len();

    if removed == 0 && annotations.is_empty() {
        return Ok((0, 0));
    }

    let origin = page_info(doc, page_id).origin;
    let mut added = 0;
    let mut flattened = Vec::new();
    for annotation in annotations.iter().filter(|annotation| !annotation.is_deleted()) {
        if options.text_note_style == TextNoteStyle::Flattened && annotation.kind() == AnnotationKind::TextNote {
            flattened.push(annotation);
            continue;
        }
        let (mut dict, form) = annotation_dict(annotation, origin, options).map_err(|e| e.to_string())?;
        dict.set("P", Object::Reference(page_id));
        if let Some(form) = form {
            let form_id = doc.add_object(form);
            dict.set("AP", dictionary! { "N" => Object::Reference(form_id) });
        }
        kept.push(Object::Reference(doc.add_object(dict)));
        added += 1;
    }

    let page = doc
        .get_dictionary_mut(page_id)
        .map_err(|e| format!("page dictionary unavailable: {e}"))?;
    if kept.is_empty() {
        page.remove(b"Annots");
    } else {
        page.set("Annots", Object::Array(kept));
    }

    if !flattened.is_empty() {
        added += flatten_notes(doc, page_id, &flattened, origin, options)?;
    }
    Ok((removed, added))
}

/// Draw text notes into the page content as Form XObjects
///
/// Existing content is wrapped in `q`/`Q` so its graphics state cannot leak
/// into the notes.
fn flatten_notes(
    doc: &mut Document,
    page_id: ObjectId,
    notes: &[&Annotation],
    origin: (f64, f64),
    options: &ExportOptions,
) -> Result<usize, String> {
    let mut resources = inherited(doc, page_id, b"Resources")
        .and_then(|object| object.as_dict().ok())
        .cloned()
        .unwrap_or_default();
    let mut xobjects = resources
        .get(b"XObject")
        .ok()
        .and_then(|object| resolve(doc, object))
        .and_then(|object| object.as_dict().ok())
        .cloned()
        .unwrap_or_default();

    let mut drawing = String::from("Q\n");
    for note in notes {
        let AnnotationVariant::TextNote { anchor, text } = note.variant() else {
            continue;
        };
        let anchor = (anchor.x + origin.0, anchor.y + origin.1);
        let opacity = note.style().opacity.clamp(0.0, 1.0);
        let (rect, content) = free_text_content(anchor, text, note.style().color, opacity, options)
            .map_err(|e| e.to_string())?;
        let form = appearance::form_xobject(content, rect, appearance::resources(opacity, false, true));
        let resource_name = format!("Note{}", note.id().simple());
        xobjects.set(resource_name.as_str(), Object::Reference(doc.add_object(form)));
        drawing.push_str(&format!("q /{resource_name} Do Q\n"));
    }
    resources.set("XObject", Object::Dictionary(xobjects));

    let mut contents = existing_contents(doc, page_id)?;
    let open = doc.add_object(lopdf::Stream::new(Dictionary::new(), b"q\n".to_vec()));
    let close = doc.add_object(lopdf::Stream::new(Dictionary::new(), drawing.into_bytes()));
    contents.insert(0, Object::Reference(open));
    contents.push(Object::Reference(close));

    let page = doc
        .get_dictionary_mut(page_id)
        .map_err(|e| format!("page dictionary unavailable: {e}"))?;
    page.set("Resources", Object::Dictionary(resources));
    page.set("Contents", Object::Array(contents));
    Ok(notes.len())
}

/// Current `/Contents` as a list of stream references
fn existing_contents(doc: &Document, page_id: ObjectId) -> Result<Vec<Object>, String> {
    let page = doc
        .get_dictionary(page_id)
        .map_err(|e| format!("page dictionary unavailable: {e}"))?;
    match page.get(b"Contents") {
        Err(_) => Ok(Vec::new()),
        Ok(Object::Array(items)) => Ok(items.clone()),
        Ok(Object::Reference(id)) => match doc.get_object(*id) {
            Ok(Object::Array(items)) => Ok(items.clone()),
            Ok(Object::Stream(_)) => Ok(vec![Object::Reference(*id)]),
            _ => Err("/Contents does not name a stream".to_string()),
        },
        Ok(_) => Err("/Contents is neither a reference nor an array".to_string()),
    }
}

/// Current `/Annots` entries, inline or behind a reference
fn existing_annots(doc: &Document, page_id: ObjectId) -> Result<Vec<Object>, String> {
    let page = doc
        .get_dictionary(page_id)
        .map_err(|e| format!("page dictionary unavailable: {e}"))?;
    let Ok(annots) = page.get(b"Annots") else {
        return Ok(Vec::new());
    };
    resolve(doc, annots)
        .and_then(|object| object.as_array().ok())
        .cloned()
        .ok_or_else(|| "/Annots is not an array".to_string())
}

/// `/NM` of an annotation entry, when it is a UUID
fn annotation_uuid(doc: &Document, entry: &Object) -> Option<Uuid> {
    let dict = resolve(doc, entry)?.as_dict().ok()?;
    let nm = dict_text(doc, dict, b"NM")?;
    Uuid::parse_str(nm.trim()).ok()
}

type BuiltAnnotation = (Dictionary, Option<lopdf::Stream>);

/// Annotation dictionary plus its normal appearance, without `/P` and `/AP`
fn annotation_dict(
    annotation: &Annotation,
    origin: (f64, f64),
    options: &ExportOptions,
) -> Result<BuiltAnnotation, std::fmt::Error> {
    let shift = |point: &PageCoordinate| -> Point { (point.x + origin.0, point.y + origin.1) };
    let style = annotation.style();
    let (r, g, b, _) = style.color.to_normalized();
    let opacity = style.opacity.clamp(0.0, 1.0);
    let half_width = style.stroke_width / 2.0;

    let bounds = annotation.bounding_box();
    let mut rect = [
        bounds.min_x + origin.0,
        bounds.min_y + origin.1,
        bounds.max_x + origin.0,
        bounds.max_y + origin.1,
    ];

    let mut dict = dictionary! {
        "Type" => "Annot",
        "NM" => text_string(&annotation.id().to_string()),
        "M" => text_string(&to_pdf_date(annotation.modified_at())),
        "CreationDate" => text_string(&to_pdf_date(annotation.created_at())),
        "F" => FLAG_PRINT,
        "C" => reals([r, g, b]),
    };
    if let Some(author) = annotation.author().or(options.default_author.as_deref()) {
        dict.set("T", text_string(author));
    }
    if opacity < 1.0 {
        dict.set("CA", real(opacity));
    }

    let (content, resources) = match annotation.variant() {
        AnnotationVariant::Highlight { paths } => {
            let quads = quads_for(paths, half_width, &shift);
            dict.set("Subtype", name("Highlight"));
            dict.set("QuadPoints", quad_points(&quads));
            let content = appearance::filled_quads(&quads, style.color, opacity)?;
            (content, appearance::resources(opacity, true, false))
        }
        AnnotationVariant::Underline { paths } => {
            let quads = quads_for(paths, half_width, &shift);
            dict.set("Subtype", name("Underline"));
            dict.set("QuadPoints", quad_points(&quads));
            let lines = shifted_paths(paths, &shift);
            let content = appearance::stroked_paths(&lines, style.color, style.stroke_width, opacity, false)?;
            (content, appearance::resources(opacity, false, false))
        }
        AnnotationVariant::FreehandStroke { paths } => {
            let lines = shifted_paths(paths, &shift);
            dict.set("Subtype", name("Ink"));
            dict.set(
                "InkList",
                Object::Array(
                    lines
                        .iter()
                        .map(|path| reals(path.iter().flat_map(|&(x, y)| [x, y])))
                        .collect(),
                ),
            );
            dict.set("BS", border_style(style.stroke_width));
            let content = appearance::stroked_paths(&lines, style.color, style.stroke_width, opacity, true)?;
            (content, appearance::resources(opacity, false, false))
        }
        AnnotationVariant::RectangleMark { .. } => {
            dict.set("Subtype", name("Square"));
            dict.set("BS", border_style(style.stroke_width));
            // Stroke centred on the marked rectangle, inside the padded /Rect
            let outline = [rect[0] + half_width, rect[1] + half_width, rect[2] - half_width, rect[3] - half_width];
            let content = appearance::stroked_rect(outline, style.color, style.stroke_width, opacity)?;
            (content, appearance::resources(opacity, false, false))
        }
        AnnotationVariant::TextNote { anchor, text } => {
            dict.set("Contents", text_string(text));
            let (x, y) = shift(anchor);
            match options.text_note_style {
                // Flattened notes never reach here; they are drawn by `flatten_notes`
                TextNoteStyle::FreeText | TextNoteStyle::Flattened => {
                    let (box_rect, content) = free_text_content((x, y), text, style.color, opacity, options)?;
                    rect = box_rect;
                    dict.set("Subtype", name("FreeText"));
                    dict.set(
                        "DA",
                        text_string(&format!("/{FONT_NAME} {} Tf 0 g", options.font_size)),
                    );
                    (content, appearance::resources(opacity, false, true))
                }
                TextNoteStyle::Sticky => {
                    rect = [x, y - TEXT_NOTE_SIZE, x + TEXT_NOTE_SIZE, y];
                    dict.set("Subtype", name("Text"));
                    dict.set("Name", name("Comment"));
                    dict.set("Open", false);
                    let content = appearance::note_icon(rect, style.color)?;
                    (content, appearance::resources(opacity, false, false))
                }
            }
        }
    };

    dict.set("Rect", reals(rect));
    let form = options
        .generate_appearances
        .then(|| appearance::form_xobject(content, rect, resources));
    Ok((dict, form))
}

fn border_style(width: f64) -> Object {
    Object::Dictionary(dictionary! {
        "Type" => "Border",
        "W" => real(width),
        "S" => "S",
    })
}

fn shifted_paths(paths: &[Vec<PageCoordinate>], shift: &impl Fn(&PageCoordinate) -> Point) -> Vec<Vec<Point>> {
    paths.iter().map(|path| path.iter().map(shift).collect()).collect()
}

/// One quad per segment, `half_width` either side of the centre line
fn quads_for(
    paths: &[Vec<PageCoordinate>],
    half_width: f64,
    shift: &impl Fn(&PageCoordinate) -> Point,
) -> Vec<Quad> {
    let mut quads = Vec::new();
    for path in paths {
        let points: Vec<Point> = path.iter().map(shift).collect();
        if let [single] = points.as_slice() {
            quads.push(segment_quad(*single, *single, half_width));
        }
        for pair in points.windows(2) {
            quads.push(segment_quad(pair[0], pair[1], half_width));
        }
    }
    quads
}

fn segment_quad(start: Point, end: Point, half_width: f64) -> Quad {
    let (dx, dy) = (end.0 - start.0, end.1 - start.1);
    let length = dx.hypot(dy);
    if length < 1e-9 {
        let (x, y) = start;
        let h = half_width;
        return [(x - h, y + h), (x + h, y + h), (x - h, y - h), (x + h, y - h)];
    }
    // Left-hand normal points "up" for a left-to-right segment
    let (nx, ny) = (-dy / length * half_width, dx / length * half_width);
    [
        (start.0 + nx, start.1 + ny),
        (end.0 + nx, end.1 + ny),
        (start.0 - nx, start.1 - ny),
        (end.0 - nx, end.1 - ny),
    ]
}

fn quad_points(quads: &[Quad]) -> Object {
    reals(quads.iter().flat_map(|quad| quad.iter().flat_map(|&(x, y)| [x, y])))
}

/// Rect and content of a boxed text note anchored at its top-left corner
fn free_text_content(
    anchor: Point,
    text: &str,
    background: Color,
    opacity: f64,
    options: &ExportOptions,
) -> Result<([f64; 4], String), std::fmt::Error> {
    let lines: Vec<&str> = if text.is_empty() { vec![""] } else { text.lines().collect() };
    let rect = free_text_rect(anchor, &lines, options.font_size);
    let content = appearance::free_text(rect, &lines, options.font_size, TEXT_PADDING, background, opacity)?;
    Ok((rect, content))
}

/// Box for a free-text note hanging from its anchor at the top-left
fn free_text_rect(anchor: Point, lines: &[&str], font_size: f64) -> [f64; 4] {
    let longest = lines.iter().map(|line| line.chars().count()).max().unwrap_or(0) as f64;
    let width = (longest * font_size * 0.5 + 2.0 * TEXT_PADDING).max(TEXT_NOTE_SIZE);
    let height = (lines.len() as f64 * font_size * LINE_HEIGHT + 2.0 * TEXT_PADDING).max(TEXT_NOTE_SIZE);
    let (x, y) = anchor;
    [x, y - height, x + width, y]
}
