//! Screen ⇄ page coordinate mapping
//!
//! Page space has its origin at the bottom-left of the MediaBox with y
//! pointing up, in points. Screen space has its origin at the top-left of the
//! view with y pointing down, in pixels. The renderer publishes a
//! [`ViewState`] describing where the (rotated, zoomed) page sits on screen;
//! everything here is a pure function of that state.

use serde::{Deserialize, Serialize};

use crate::annotation::{PageCoordinate, PageRect};

/// Default zoom limits, matching 25%..400% in the viewer.
pub const DEFAULT_MIN_ZOOM: f64 = 0.25;
pub const DEFAULT_MAX_ZOOM: f64 = 4.0;

/// Pixel coordinate in the current rendered view
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScreenPoint {
    pub x: f64,
    pub y: f64,
}

impl ScreenPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &ScreenPoint) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Midpoint between two pointers, used as a pinch focal point
    pub fn midpoint(&self, other: &ScreenPoint) -> ScreenPoint {
        ScreenPoint::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }
}

/// Axis-aligned rectangle in screen pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenRect {
    pub min: ScreenPoint,
    pub max: ScreenPoint,
}

/// Intrinsic page size in points (MediaBox width/height)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub width: f64,
    pub height: f64,
}

impl PageSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// US Letter, used when a page carries no usable MediaBox
    pub fn letter() -> Self {
        Self::new(612.0, 792.0)
    }

    /// Size of the page as displayed after rotation
    pub fn rotated(&self, rotation: Rotation) -> PageSize {
        match rotation {
            Rotation::Deg0 | Rotation::Deg180 => *self,
            Rotation::Deg90 | Rotation::Deg270 => PageSize::new(self.height, self.width),
        }
    }
}

/// Clockwise page rotation in quarter turns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Normalize any angle to the nearest quarter turn
    ///
    /// `/Rotate` values like -90 or 450 are legal in the wild.
    pub fn from_degrees(degrees: i64) -> Rotation {
        match ((degrees.rem_euclid(360) + 45) / 90) % 4 {
            1 => Rotation::Deg90,
            2 => Rotation::Deg180,
            3 => Rotation::Deg270,
            _ => Rotation::Deg0,
        }
    }

    pub fn degrees(&self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }
}

/// Inclusive zoom range; values outside are clamped, never rejected
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoomRange {
    pub min: f64,
    pub max: f64,
}

impl ZoomRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min: min.min(max), max: max.max(min) }
    }

    pub fn clamp(&self, zoom: f64) -> f64 {
        let zoom = if zoom.is_finite() { zoom } else { 1.0 };
        zoom.clamp(self.min, self.max)
    }
}

impl Default for ZoomRange {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_ZOOM, DEFAULT_MAX_ZOOM)
    }
}

/// View state published by the renderer for the page under the pointer
///
/// `pan` is the screen position of the top-left corner of the displayed
/// (already rotated) page.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
    pub page_index: u32,
    pub page_size: PageSize,
    pub pan: ScreenPoint,
    pub zoom: f64,
    pub rotation: Rotation,
}

impl ViewState {
    pub fn new(page_index: u32, page_size: PageSize) -> Self {
        Self {
            page_index,
            page_size,
            pan: ScreenPoint::default(),
            zoom: 1.0,
            rotation: Rotation::Deg0,
        }
    }

    pub fn with_pan(mut self, x: f64, y: f64) -> Self {
        self.pan = ScreenPoint::new(x, y);
        self
    }

    pub fn with_zoom(mut self, zoom: f64) -> Self {
        self.zoom = zoom;
        self
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }
}

/// 2D affine matrix in PDF order: `x' = a·x + c·y + e`, `y' = b·x + d·y + f`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Affine {
    pub const IDENTITY: Affine = Affine { a: 1.0, b: 0.0, c: 0.0, d: 1.0, e: 0.0, f: 0.0 };

    pub fn translate(tx: f64, ty: f64) -> Self {
        Affine { e: tx, f: ty, ..Self::IDENTITY }
    }

    pub fn scale(s: f64) -> Self {
        Affine { a: s, d: s, ..Self::IDENTITY }
    }

    /// Page space (y up) to an unrotated top-left frame (y down)
    fn flip_y(height: f64) -> Self {
        Affine { a: 1.0, b: 0.0, c: 0.0, d: -1.0, e: 0.0, f: height }
    }

    /// Clockwise rotation of a `width`×`height` top-left frame, re-anchored
    /// so the rotated page again starts at the origin.
    fn rotate(rotation: Rotation, size: PageSize) -> Self {
        let (w, h) = (size.width, size.height);
        match rotation {
            Rotation::Deg0 => Self::IDENTITY,
            Rotation::Deg90 => Affine { a: 0.0, b: 1.0, c: -1.0, d: 0.0, e: h, f: 0.0 },
            Rotation::Deg180 => Affine { a: -1.0, b: 0.0, c: 0.0, d: -1.0, e: w, f: h },
            Rotation::Deg270 => Affine { a: 0.0, b: -1.0, c: 1.0, d: 0.0, e: 0.0, f: w },
        }
    }

    /// Compose: apply `self` first, then `next`
    pub fn then(&self, next: &Affine) -> Affine {
        Affine {
            a: next.a * self.a + next.c * self.b,
            b: next.b * self.a + next.d * self.b,
            c: next.a * self.c + next.c * self.d,
            d: next.b * self.c + next.d * self.d,
            e: next.a * self.e + next.c * self.f + next.e,
            f: next.b * self.e + next.d * self.f + next.f,
        }
    }

    /// Inverse matrix, `None` when singular
    pub fn invert(&self) -> Option<Affine> {
        let det = self.a * self.d - self.b * self.c;
        if det.abs() < f64::EPSILON || !det.is_finite() {
            return None;
        }
        Some(Affine {
            a: self.d / det,
            b: -self.b / det,
            c: -self.c / det,
            d: self.a / det,
            e: (self.c * self.f - self.d * self.e) / det,
            f: (self.b * self.e - self.a * self.f) / det,
        })
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (self.a * x + self.c * y + self.e, self.b * x + self.d * y + self.f)
    }
}

/// Maps points between screen and page space for a given view
#[derive(Debug, Clone, Copy, Default)]
pub struct GeometryTransform {
    zoom_range: ZoomRange,
}

impl GeometryTransform {
    pub fn new(zoom_range: ZoomRange) -> Self {
        Self { zoom_range }
    }

    pub fn zoom_range(&self) -> ZoomRange {
        self.zoom_range
    }

    /// Zoom actually applied for a view, after clamping
    pub fn effective_zoom(&self, view: &ViewState) -> f64 {
        self.zoom_range.clamp(view.zoom)
    }

    /// Page → screen: flip, rotate, scale, translate
    pub fn page_to_screen(&self, view: &ViewState) -> Affine {
        Affine::flip_y(view.page_size.height)
            .then(&Affine::rotate(view.rotation, view.page_size))
            .then(&Affine::scale(self.effective_zoom(view)))
            .then(&Affine::translate(view.pan.x, view.pan.y))
    }

    /// Screen → page: untranslate, unscale, unrotate, unflip
    ///
    /// Built from the inverse of each step rather than a numeric inversion of
    /// the composite, so both directions agree to rounding error.
    pub fn screen_to_page(&self, view: &ViewState) -> Affine {
        let zoom = self.effective_zoom(view);
        let unrotate = Affine::rotate(view.rotation, view.page_size)
            .invert()
            .unwrap_or(Affine::IDENTITY);
        Affine::translate(-view.pan.x, -view.pan.y)
            .then(&Affine::scale(1.0 / zoom))
            .then(&unrotate)
            .then(&Affine::flip_y(view.page_size.height))
    }

    pub fn to_page_space(&self, point: ScreenPoint, view: &ViewState) -> PageCoordinate {
        let (x, y) = self.screen_to_page(view).apply(point.x, point.y);
        PageCoordinate::new(x, y)
    }

    pub fn to_screen_space(&self, point: PageCoordinate, view: &ViewState) -> ScreenPoint {
        let (x, y) = self.page_to_screen(view).apply(point.x, point.y);
        ScreenPoint::new(x, y)
    }

    /// Convert a pixel distance (touch slop, hit tolerance) into points
    pub fn screen_distance_to_page(&self, pixels: f64, view: &ViewState) -> f64 {
        pixels / self.effective_zoom(view)
    }

    /// Screen bounds of a page rectangle, for overlay culling
    pub fn page_rect_to_screen(&self, rect: &PageRect, view: &ViewState) -> ScreenRect {
        let matrix = self.page_to_screen(view);
        let corners = [
            matrix.apply(rect.min_x, rect.min_y),
            matrix.apply(rect.max_x, rect.min_y),
            matrix.apply(rect.min_x, rect.max_y),
            matrix.apply(rect.max_x, rect.max_y),
        ];
        let mut min = ScreenPoint::new(f64::INFINITY, f64::INFINITY);
        let mut max = ScreenPoint::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
        for (x, y) in corners {
            min.x = min.x.min(x);
            min.y = min.y.min(y);
            max.x = max.x.max(x);
            max.y = max.y.max(y);
        }
        ScreenRect { min, max }
    }
}
