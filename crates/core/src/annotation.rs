//! Annotation data model
//!
//! Annotations are a tagged union over the supported markup kinds. All
//! coordinates are stored in page space; screen space never reaches the model.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{StoreError, StoreResult};

/// Unique identifier for an annotation
///
/// Stable across the document lifetime and written to exported files as `/NM`.
pub type AnnotationId = uuid::Uuid;

/// Side length of the square a text note occupies, in points.
pub const TEXT_NOTE_SIZE: f64 = 24.0;

/// Stable identity of an opened document (content hash of the file bytes)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Page-local coordinate in PDF page space
///
/// Uses PDF coordinate system:
/// - Origin (0, 0) at bottom-left of page
/// - X increases to the right
/// - Y increases upward
/// - Units are in points (1/72 inch)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PageCoordinate {
    pub x: f64,
    pub y: f64,
}

impl PageCoordinate {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Calculate distance to another coordinate
    pub fn distance_to(&self, other: &PageCoordinate) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    fn translated(self, dx: f64, dy: f64) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }

    fn scaled_about(self, anchor: PageCoordinate, sx: f64, sy: f64) -> Self {
        Self::new(
            anchor.x + (self.x - anchor.x) * sx,
            anchor.y + (self.y - anchor.y) * sy,
        )
    }
}

/// Axis-aligned rectangle in page space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageRect {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl PageRect {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    /// Smallest rectangle containing both corners
    pub fn from_corners(a: PageCoordinate, b: PageCoordinate) -> Self {
        Self::new(a.x.min(b.x), a.y.min(b.y), a.x.max(b.x), a.y.max(b.y))
    }

    /// Bounds of a point cloud; `None` when there are no points.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a PageCoordinate>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut rect = Self::new(first.x, first.y, first.x, first.y);
        for point in iter {
            rect.min_x = rect.min_x.min(point.x);
            rect.min_y = rect.min_y.min(point.y);
            rect.max_x = rect.max_x.max(point.x);
            rect.max_y = rect.max_y.max(point.y);
        }
        Some(rect)
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Grow the rectangle by `amount` on every side
    pub fn inflate(&self, amount: f64) -> Self {
        Self::new(
            self.min_x - amount,
            self.min_y - amount,
            self.max_x + amount,
            self.max_y + amount,
        )
    }

    pub fn contains(&self, point: &PageCoordinate) -> bool {
        point.x >= self.min_x && point.x <= self.max_x && point.y >= self.min_y && point.y <= self.max_y
    }
}

/// RGBA color representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Create an opaque color
    pub fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Convert to normalized RGBA values (0.0 to 1.0)
    pub fn to_normalized(&self) -> (f64, f64, f64, f64) {
        (
            f64::from(self.r) / 255.0,
            f64::from(self.g) / 255.0,
            f64::from(self.b) / 255.0,
            f64::from(self.a) / 255.0,
        )
    }

    /// `#rrggbbaa` form used by the persistence layer
    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
    }

    /// Parse `#rrggbb` or `#rrggbbaa`
    pub fn from_hex(value: &str) -> Option<Self> {
        let hex = value.strip_prefix('#')?;
        if !hex.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
        match hex.len() {
            6 => Some(Self::rgb(channel(0)?, channel(2)?, channel(4)?)),
            8 => Some(Self::new(channel(0)?, channel(2)?, channel(4)?, channel(6)?)),
            _ => None,
        }
    }
}

/// Common annotation colors
impl Color {
    pub const RED: Color = Color { r: 255, g: 0, b: 0, a: 255 };
    pub const GREEN: Color = Color { r: 0, g: 255, b: 0, a: 255 };
    pub const BLUE: Color = Color { r: 0, g: 0, b: 255, a: 255 };
    pub const YELLOW: Color = Color { r: 255, g: 255, b: 0, a: 255 };
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0, a: 255 };
    pub const WHITE: Color = Color { r: 255, g: 255, b: 255, a: 255 };
    /// Pale yellow used for sticky notes
    pub const NOTE: Color = Color { r: 255, g: 255, b: 204, a: 255 };
}

/// Discriminant of [`AnnotationVariant`], used for tool selection and storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationKind {
    Highlight,
    Underline,
    FreehandStroke,
    TextNote,
    RectangleMark,
}

impl AnnotationKind {
    pub const ALL: [AnnotationKind; 5] = [
        AnnotationKind::Highlight,
        AnnotationKind::Underline,
        AnnotationKind::FreehandStroke,
        AnnotationKind::TextNote,
        AnnotationKind::RectangleMark,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnnotationKind::Highlight => "highlight",
            AnnotationKind::Underline => "underline",
            AnnotationKind::FreehandStroke => "freehand_stroke",
            AnnotationKind::TextNote => "text_note",
            AnnotationKind::RectangleMark => "rectangle_mark",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }

    /// Minimum number of points a single path of this kind must carry
    pub fn min_points(&self) -> usize {
        match self {
            AnnotationKind::Highlight | AnnotationKind::Underline | AnnotationKind::RectangleMark => 2,
            AnnotationKind::FreehandStroke | AnnotationKind::TextNote => 1,
        }
    }

    /// Kinds drawn by dragging; the rest are placed by a tap
    pub fn is_path(&self) -> bool {
        !matches!(self, AnnotationKind::TextNote)
    }
}

impl fmt::Display for AnnotationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Variant-specific annotation payload
///
/// Highlight and Underline paths are runs along a text line: consecutive
/// points form the segments the marker covers. A RectangleMark spans the
/// bounds of its points, normally two opposite corners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnnotationVariant {
    Highlight { paths: Vec<Vec<PageCoordinate>> },
    Underline { paths: Vec<Vec<PageCoordinate>> },
    FreehandStroke { paths: Vec<Vec<PageCoordinate>> },
    TextNote { anchor: PageCoordinate, text: String },
    RectangleMark { points: Vec<PageCoordinate> },
}

impl AnnotationVariant {
    /// Single-run highlight between two points
    pub fn highlight(start: PageCoordinate, end: PageCoordinate) -> Self {
        AnnotationVariant::Highlight { paths: vec![vec![start, end]] }
    }

    pub fn underline(start: PageCoordinate, end: PageCoordinate) -> Self {
        AnnotationVariant::Underline { paths: vec![vec![start, end]] }
    }

    pub fn freehand(points: Vec<PageCoordinate>) -> Self {
        AnnotationVariant::FreehandStroke { paths: vec![points] }
    }

    pub fn rectangle(a: PageCoordinate, b: PageCoordinate) -> Self {
        AnnotationVariant::RectangleMark { points: vec![a, b] }
    }

    pub fn text_note(anchor: PageCoordinate, text: impl Into<String>) -> Self {
        AnnotationVariant::TextNote { anchor, text: text.into() }
    }

    /// Seed geometry for a drag that starts at `point`
    ///
    /// Two-point kinds start degenerate (start == end) and grow as the
    /// gesture extends them.
    pub fn seed(kind: AnnotationKind, point: PageCoordinate) -> Self {
        match kind {
            AnnotationKind::Highlight => Self::highlight(point, point),
            AnnotationKind::Underline => Self::underline(point, point),
            AnnotationKind::FreehandStroke => Self::freehand(vec![point]),
            AnnotationKind::RectangleMark => Self::rectangle(point, point),
            AnnotationKind::TextNote => Self::text_note(point, String::new()),
        }
    }

    pub fn kind(&self) -> AnnotationKind {
        match self {
            AnnotationVariant::Highlight { .. } => AnnotationKind::Highlight,
            AnnotationVariant::Underline { .. } => AnnotationKind::Underline,
            AnnotationVariant::FreehandStroke { .. } => AnnotationKind::FreehandStroke,
            AnnotationVariant::TextNote { .. } => AnnotationKind::TextNote,
            AnnotationVariant::RectangleMark { .. } => AnnotationKind::RectangleMark,
        }
    }

    /// Point sequences of path kinds; a text note yields its anchor.
    pub fn paths(&self) -> Vec<&[PageCoordinate]> {
        match self {
            AnnotationVariant::Highlight { paths }
            | AnnotationVariant::Underline { paths }
            | AnnotationVariant::FreehandStroke { paths } => {
                paths.iter().map(Vec::as_slice).collect()
            }
            AnnotationVariant::RectangleMark { points } => vec![points.as_slice()],
            AnnotationVariant::TextNote { anchor, .. } => vec![std::slice::from_ref(anchor)],
        }
    }

    pub fn point_count(&self) -> usize {
        self.paths().iter().map(|path| path.len()).sum()
    }

    /// Check the payload against the rules for its kind
    pub fn validate(&self) -> StoreResult<()> {
        let kind = self.kind();
        let paths = self.paths();
        if paths.is_empty() {
            return Err(StoreError::invalid_geometry(kind, "no point sequences supplied"));
        }
        for path in &paths {
            if path.len() < kind.min_points() {
                return Err(StoreError::invalid_geometry(
                    kind,
                    format!("requires at least {} points, got {}", kind.min_points(), path.len()),
                ));
            }
            if path.iter().any(|point| !point.is_finite()) {
                return Err(StoreError::invalid_geometry(kind, "non-finite coordinate"));
            }
        }
        Ok(())
    }

    /// Bounding box of the geometry in page coordinates
    ///
    /// Stroke width is not included; callers pad by half of it when needed.
    pub fn bounding_box(&self) -> PageRect {
        match self {
            AnnotationVariant::TextNote { anchor, .. } => PageRect::new(
                anchor.x,
                anchor.y - TEXT_NOTE_SIZE,
                anchor.x + TEXT_NOTE_SIZE,
                anchor.y,
            ),
            _ => PageRect::from_points(self.paths().into_iter().flatten())
                .unwrap_or(PageRect::new(0.0, 0.0, 0.0, 0.0)),
        }
    }

    /// Check if a point is near this geometry (within tolerance)
    ///
    /// Highlights count their whole marker band as a hit; other strokes are
    /// matched against their centre line.
    pub fn contains_point(&self, point: &PageCoordinate, tolerance: f64, stroke_width: f64) -> bool {
        match self {
            AnnotationVariant::Highlight { paths } => {
                let reach = tolerance + stroke_width / 2.0;
                paths.iter().any(|path| near_polyline(point, path, reach))
            }
            AnnotationVariant::Underline { paths } | AnnotationVariant::FreehandStroke { paths } => {
                paths.iter().any(|path| near_polyline(point, path, tolerance))
            }
            AnnotationVariant::RectangleMark { .. } | AnnotationVariant::TextNote { .. } => {
                self.bounding_box().inflate(tolerance).contains(point)
            }
        }
    }

    pub(crate) fn translate(&mut self, dx: f64, dy: f64) {
        self.map_points(|point| point.translated(dx, dy));
    }

    pub(crate) fn scale_about(&mut self, anchor: PageCoordinate, sx: f64, sy: f64) {
        self.map_points(|point| point.scaled_about(anchor, sx, sy));
    }

    /// Extend the geometry with newly captured points
    ///
    /// Freehand strokes append to their last sub-path. Two-point kinds move
    /// their end point (or opposite corner) to the last appended point.
    pub(crate) fn append_points(&mut self, new_points: &[PageCoordinate]) -> StoreResult<()> {
        let Some(last) = new_points.last().copied() else {
            return Ok(());
        };
        let kind = self.kind();
        match self {
            AnnotationVariant::FreehandStroke { paths } => match paths.last_mut() {
                Some(path) => path.extend_from_slice(new_points),
                None => paths.push(new_points.to_vec()),
            },
            AnnotationVariant::Highlight { paths } | AnnotationVariant::Underline { paths } => {
                match paths.last_mut().and_then(|path| path.last_mut()) {
                    Some(end) => *end = last,
                    None => {
                        return Err(StoreError::invalid_geometry(kind, "no run to extend"))
                    }
                }
            }
            AnnotationVariant::RectangleMark { points } => match points.last_mut() {
                Some(corner) => *corner = last,
                None => points.push(last),
            },
            AnnotationVariant::TextNote { .. } => {
                return Err(StoreError::invalid_geometry(
                    kind,
                    "text notes cannot be extended with points",
                ))
            }
        }
        Ok(())
    }

    fn map_points(&mut self, f: impl Fn(PageCoordinate) -> PageCoordinate) {
        match self {
            AnnotationVariant::Highlight { paths }
            | AnnotationVariant::Underline { paths }
            | AnnotationVariant::FreehandStroke { paths } => {
                for point in paths.iter_mut().flatten() {
                    *point = f(*point);
                }
            }
            AnnotationVariant::RectangleMark { points } => {
                for point in points.iter_mut() {
                    *point = f(*point);
                }
            }
            AnnotationVariant::TextNote { anchor, .. } => *anchor = f(*anchor),
        }
    }
}

/// Distance check against every segment of a polyline
fn near_polyline(point: &PageCoordinate, path: &[PageCoordinate], tolerance: f64) -> bool {
    match path {
        [] => false,
        [single] => point.distance_to(single) <= tolerance,
        _ => path
            .windows(2)
            .any(|pair| point_near_line_segment(point, &pair[0], &pair[1], tolerance)),
    }
}

/// Helper function for point-to-line-segment distance check
fn point_near_line_segment(
    point: &PageCoordinate,
    start: &PageCoordinate,
    end: &PageCoordinate,
    tolerance: f64,
) -> bool {
    let dx = end.x - start.x;
    let dy = end.y - start.y;
    let length_sq = dx * dx + dy * dy;

    if length_sq < 1e-12 {
        // Degenerate segment
        return point.distance_to(start) <= tolerance;
    }

    let t = ((point.x - start.x) * dx + (point.y - start.y) * dy) / length_sq;
    let t = t.clamp(0.0, 1.0);

    let closest = PageCoordinate::new(start.x + t * dx, start.y + t * dy);
    point.distance_to(&closest) <= tolerance
}

/// Visual styling for annotation rendering and export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationStyle {
    pub color: Color,

    /// Stroke width in points (marker height for highlights, unused by text notes)
    pub stroke_width: f64,

    /// Opacity (0.0 = transparent, 1.0 = opaque)
    pub opacity: f64,
}

impl AnnotationStyle {
    pub fn new(color: Color, stroke_width: f64) -> Self {
        Self { color, stroke_width, opacity: 1.0 }
    }

    /// Semi-transparent yellow marker
    pub fn highlighter() -> Self {
        Self { color: Color::YELLOW, stroke_width: 12.0, opacity: 0.4 }
    }

    /// Thin red pen, the common markup default
    pub fn pen() -> Self {
        Self::new(Color::RED, 2.0)
    }

    pub fn note() -> Self {
        Self::new(Color::NOTE, 0.0)
    }

    /// Default style for a kind
    pub fn for_kind(kind: AnnotationKind) -> Self {
        match kind {
            AnnotationKind::Highlight => Self::highlighter(),
            AnnotationKind::Underline => Self::new(Color::BLUE, 1.5),
            AnnotationKind::FreehandStroke | AnnotationKind::RectangleMark => Self::pen(),
            AnnotationKind::TextNote => Self::note(),
        }
    }
}

impl Default for AnnotationStyle {
    fn default() -> Self {
        Self::pen()
    }
}

/// Current time as Unix milliseconds
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// A single annotation on a document page
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    id: AnnotationId,
    document_id: DocumentId,
    page_index: u32,
    variant: AnnotationVariant,
    style: AnnotationStyle,
    author: Option<String>,
    /// Unix milliseconds
    created_at: i64,
    modified_at: i64,
    deleted: bool,
}

impl Annotation {
    /// Create a new annotation with a generated ID
    pub fn new(
        document_id: DocumentId,
        page_index: u32,
        variant: AnnotationVariant,
        style: AnnotationStyle,
    ) -> Self {
        Self::with_id(AnnotationId::new_v4(), document_id, page_index, variant, style)
    }

    /// Create an annotation with a known ID (loading from storage or import)
    pub fn with_id(
        id: AnnotationId,
        document_id: DocumentId,
        page_index: u32,
        variant: AnnotationVariant,
        style: AnnotationStyle,
    ) -> Self {
        let now = now_millis();
        Self {
            id,
            document_id,
            page_index,
            variant,
            style,
            author: None,
            created_at: now,
            modified_at: now,
            deleted: false,
        }
    }

    pub fn with_author(mut self, author: Option<String>) -> Self {
        self.author = author;
        self
    }

    pub fn with_timestamps(mut self, created_at: i64, modified_at: i64) -> Self {
        self.created_at = created_at;
        self.modified_at = modified_at;
        self
    }

    pub fn with_deleted(mut self, deleted: bool) -> Self {
        self.deleted = deleted;
        self
    }

    pub fn id(&self) -> AnnotationId {
        self.id
    }

    pub fn document_id(&self) -> &DocumentId {
        &self.document_id
    }

    pub fn page_index(&self) -> u32 {
        self.page_index
    }

    pub fn kind(&self) -> AnnotationKind {
        self.variant.kind()
    }

    pub fn variant(&self) -> &AnnotationVariant {
        &self.variant
    }

    pub fn style(&self) -> &AnnotationStyle {
        &self.style
    }

    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn modified_at(&self) -> i64 {
        self.modified_at
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Text payload of a text note
    pub fn text(&self) -> Option<&str> {
        match &self.variant {
            AnnotationVariant::TextNote { text, .. } => Some(text),
            _ => None,
        }
    }

    /// Bounds including half the stroke width on every side
    pub fn bounding_box(&self) -> PageRect {
        let rect = self.variant.bounding_box();
        match self.kind() {
            AnnotationKind::TextNote => rect,
            _ => rect.inflate(self.style.stroke_width / 2.0),
        }
    }

    /// Check if a point hits this annotation (for selection)
    pub fn hit_test(&self, point: &PageCoordinate, tolerance: f64) -> bool {
        !self.deleted && self.variant.contains_point(point, tolerance, self.style.stroke_width)
    }

    pub(crate) fn variant_mut(&mut self) -> &mut AnnotationVariant {
        &mut self.variant
    }

    pub(crate) fn style_mut(&mut self) -> &mut AnnotationStyle {
        &mut self.style
    }

    pub(crate) fn set_deleted(&mut self, deleted: bool) {
        self.deleted = deleted;
    }

    /// Update the modified timestamp; never moves backwards
    pub(crate) fn touch(&mut self) {
        self.modified_at = now_millis().max(self.modified_at);
    }
}
