//! Pointer input to annotation commands
//!
//! The router classifies raw pointer events into strokes, taps, long presses
//! and pinches. Points are projected into page space with the view state that
//! accompanies each event, at the moment they are captured; a later zoom or
//! rotation never re-projects points already placed.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::annotation::{
    AnnotationId, AnnotationKind, AnnotationStyle, AnnotationVariant, PageCoordinate,
};
use crate::config::GestureConfig;
use crate::error::StoreResult;
use crate::geometry::{GeometryTransform, ScreenPoint, ViewState};
use crate::store::{AnnotationPatch, AnnotationStore};

pub type PointerId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerPhase {
    Down,
    Move,
    Up,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    pub pointer: PointerId,
    pub phase: PointerPhase,
    pub position: ScreenPoint,
    pub timestamp_ms: u64,
}

impl PointerEvent {
    pub fn new(pointer: PointerId, phase: PointerPhase, x: f64, y: f64, timestamp_ms: u64) -> Self {
        Self { pointer, phase, position: ScreenPoint::new(x, y), timestamp_ms }
    }
}

/// Active editing tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tool {
    /// Taps and long presses only; drags belong to the renderer
    #[default]
    Select,
    Annotate(AnnotationKind),
}

/// What the router did with the input
#[derive(Debug, Clone, PartialEq)]
pub enum GestureCommand {
    BeginStroke { id: AnnotationId, page_index: u32 },
    ExtendStroke { id: AnnotationId, point: PageCoordinate },
    EndStroke { id: AnnotationId },
    /// Too short or interrupted; the annotation was removed outright
    StrokeDiscarded { id: AnnotationId },
    Tap { page_index: u32, point: PageCoordinate, created: Option<AnnotationId> },
    LongPress { page_index: u32, point: PageCoordinate, hit: Option<AnnotationId> },
    /// Passed through for the renderer; `scale` is relative to the previous event
    PinchZoom { focal: ScreenPoint, scale: f64 },
}

#[derive(Debug, Clone, PartialEq)]
enum GestureState {
    Idle,
    Pressed {
        pointer: PointerId,
        start: ScreenPoint,
        start_page: PageCoordinate,
        page_index: u32,
        started_at: u64,
        long_press_fired: bool,
    },
    Stroking {
        pointer: PointerId,
        id: AnnotationId,
        started_at: u64,
        last_captured: ScreenPoint,
        length_px: f64,
    },
    Pinching {
        pointers: [PointerId; 2],
        last_distance: f64,
    },
    /// Waiting for every pointer to lift
    Suppressed,
}

pub struct GestureRouter {
    config: GestureConfig,
    transform: GeometryTransform,
    tool: Tool,
    styles: BTreeMap<AnnotationKind, AnnotationStyle>,
    state: GestureState,
    active: BTreeMap<PointerId, ScreenPoint>,
}

impl GestureRouter {
    pub fn new(config: GestureConfig, transform: GeometryTransform) -> Self {
        Self {
            config,
            transform,
            tool: Tool::default(),
            styles: BTreeMap::new(),
            state: GestureState::Idle,
            active: BTreeMap::new(),
        }
    }

    pub fn tool(&self) -> Tool {
        self.tool
    }

    /// Switch tools; any press in progress is left to finish under the old one.
    pub fn set_tool(&mut self, tool: Tool) {
        self.tool = tool;
    }

    /// Style used for new annotations of a kind
    pub fn set_style(&mut self, kind: AnnotationKind, style: AnnotationStyle) {
        self.styles.insert(kind, style);
    }

    pub fn style_for(&self, kind: AnnotationKind) -> AnnotationStyle {
        self.styles
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| AnnotationStyle::for_kind(kind))
    }

    pub fn is_idle(&self) -> bool {
        self.state == GestureState::Idle
    }

    pub fn handle(
        &mut self,
        event: PointerEvent,
        view: &ViewState,
        store: &mut AnnotationStore,
    ) -> StoreResult<Vec<GestureCommand>> {
        trace!(pointer = event.pointer, phase = ?event.phase, "pointer event");
        match event.phase {
            PointerPhase::Down => self.on_down(event, view, store),
            PointerPhase::Move => self.on_move(event, view, store),
            PointerPhase::Up => self.on_up(event, view, store),
            PointerPhase::Cancel => Ok(self.on_cancel(event, store)),
        }
    }

    /// Fire a long press once a stationary press has been held long enough
    pub fn tick(&mut self, now_ms: u64, view: &ViewState, store: &AnnotationStore) -> Option<GestureCommand> {
        let GestureState::Pressed {
            start_page,
            page_index,
            started_at,
            long_press_fired,
            ..
        } = &mut self.state
        else {
            return None;
        };
        if *long_press_fired || now_ms.saturating_sub(*started_at) < self.config.long_press_ms {
            return None;
        }
        *long_press_fired = true;
        let (point, page_index) = (*start_page, *page_index);
        Some(self.long_press(point, page_index, view, store))
    }

    fn on_down(
        &mut self,
        event: PointerEvent,
        view: &ViewState,
        store: &mut AnnotationStore,
    ) -> StoreResult<Vec<GestureCommand>> {
        self.active.insert(event.pointer, event.position);
        let mut commands = Vec::new();

        match self.active.len() {
            1 if self.state == GestureState::Idle => {
                self.state = GestureState::Pressed {
                    pointer: event.pointer,
                    start: event.position,
                    start_page: self.transform.to_page_space(event.position, view),
                    page_index: view.page_index,
                    started_at: event.timestamp_ms,
                    long_press_fired: false,
                };
            }
            2 => {
                if let GestureState::Stroking { id, .. } = self.state {
                    store.discard_gesture();
                    debug!(%id, "stroke discarded by second pointer");
                    commands.push(GestureCommand::StrokeDiscarded { id });
                }
                if !matches!(self.state, GestureState::Suppressed) {
                    let mut pointers = self.active.iter();
                    if let (Some((first, a)), Some((second, b))) = (pointers.next(), pointers.next()) {
                        self.state = GestureState::Pinching {
                            pointers: [*first, *second],
                            last_distance: a.distance_to(b),
                        };
                    }
                }
            }
            _ => {}
        }
        Ok(commands)
    }

    fn on_move(
        &mut self,
        event: PointerEvent,
        view: &ViewState,
        store: &mut AnnotationStore,
    ) -> StoreResult<Vec<GestureCommand>> {
        if let Some(position) = self.active.get_mut(&event.pointer) {
            *position = event.position;
        } else {
            return Ok(Vec::new());
        }

        match self.state.clone() {
            GestureState::Pressed { pointer, start, start_page, page_index, started_at, .. }
                if pointer == event.pointer =>
            {
                if start.distance_to(&event.position) <= self.config.touch_slop_px {
                    return Ok(Vec::new());
                }
                match self.tool {
                    Tool::Annotate(kind) if kind.is_path() => {
                        self.begin_stroke(kind, event, start, start_page, page_index, started_at, view, store)
                    }
                    _ => {
                        self.state = GestureState::Suppressed;
                        Ok(Vec::new())
                    }
                }
            }
            GestureState::Stroking { pointer, id, last_captured, .. } if pointer == event.pointer => {
                let step = last_captured.distance_to(&event.position);
                if step < self.config.min_point_spacing_px {
                    return Ok(Vec::new());
                }
                let point = self.transform.to_page_space(event.position, view);
                store.update(id, AnnotationPatch::AppendPoints(vec![point]))?;
                if let GestureState::Stroking { last_captured, length_px, .. } = &mut self.state {
                    *last_captured = event.position;
                    *length_px += step;
                }
                Ok(vec![GestureCommand::ExtendStroke { id, point }])
            }
            GestureState::Pinching { pointers, last_distance } if pointers.contains(&event.pointer) => {
                let (Some(a), Some(b)) = (self.active.get(&pointers[0]), self.active.get(&pointers[1])) else {
                    return Ok(Vec::new());
                };
                let distance = a.distance_to(b);
                let focal = a.midpoint(b);
                self.state = GestureState::Pinching { pointers, last_distance: distance };
                if last_distance <= f64::EPSILON || distance <= f64::EPSILON {
                    return Ok(Vec::new());
                }
                Ok(vec![GestureCommand::PinchZoom { focal, scale: distance / last_distance }])
            }
            _ => Ok(Vec::new()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn begin_stroke(
        &mut self,
        kind: AnnotationKind,
        event: PointerEvent,
        start: ScreenPoint,
        start_page: PageCoordinate,
        page_index: u32,
        started_at: u64,
        view: &ViewState,
        store: &mut AnnotationStore,
    ) -> StoreResult<Vec<GestureCommand>> {
        store.begin_gesture();
        let id = match store.create(page_index, AnnotationVariant::seed(kind, start_page), self.style_for(kind)) {
            Ok(id) => id,
            Err(err) => {
                store.discard_gesture();
                self.state = GestureState::Suppressed;
                return Err(err);
            }
        };
        debug!(%id, page = page_index, %kind, "stroke started");

        let point = self.transform.to_page_space(event.position, view);
        if let Err(err) = store.update(id, AnnotationPatch::AppendPoints(vec![point])) {
            store.discard_gesture();
            self.state = GestureState::Suppressed;
            return Err(err);
        }
        self.state = GestureState::Stroking {
            pointer: event.pointer,
            id,
            started_at,
            last_captured: event.position,
            length_px: start.distance_to(&event.position),
        };
        Ok(vec![
            GestureCommand::BeginStroke { id, page_index },
            GestureCommand::ExtendStroke { id, point },
        ])
    }

    fn on_up(
        &mut self,
        event: PointerEvent,
        view: &ViewState,
        store: &mut AnnotationStore,
    ) -> StoreResult<Vec<GestureCommand>> {
        self.active.remove(&event.pointer);

        let commands = match self.state.clone() {
            GestureState::Pressed { pointer, start_page, page_index, started_at, long_press_fired, .. }
                if pointer == event.pointer =>
            {
                self.state = GestureState::Idle;
                if long_press_fired {
                    Vec::new()
                } else if event.timestamp_ms.saturating_sub(started_at) >= self.config.long_press_ms {
                    vec![self.long_press(start_page, page_index, view, store)]
                } else {
                    vec![self.tap(start_page, page_index, store)?]
                }
            }
            GestureState::Stroking { pointer, id, started_at, length_px, .. } if pointer == event.pointer => {
                self.state = GestureState::Idle;
                let duration = event.timestamp_ms.saturating_sub(started_at);
                if length_px < self.config.min_stroke_length_px || duration < self.config.min_stroke_duration_ms {
                    store.discard_gesture();
                    debug!(%id, length_px, duration, "short stroke discarded");
                    vec![GestureCommand::StrokeDiscarded { id }]
                } else {
                    store.end_gesture();
                    debug!(%id, length_px, duration, "stroke committed");
                    vec![GestureCommand::EndStroke { id }]
                }
            }
            GestureState::Pinching { .. } | GestureState::Suppressed => {
                if self.active.is_empty() {
                    self.state = GestureState::Idle;
                } else {
                    self.state = GestureState::Suppressed;
                }
                Vec::new()
            }
            _ => Vec::new(),
        };
        Ok(commands)
    }

    fn on_cancel(&mut self, event: PointerEvent, store: &mut AnnotationStore) -> Vec<GestureCommand> {
        self.active.remove(&event.pointer);
        let mut commands = Vec::new();
        if let GestureState::Stroking { id, .. } = self.state {
            store.discard_gesture();
            commands.push(GestureCommand::StrokeDiscarded { id });
        }
        self.state = if self.active.is_empty() {
            GestureState::Idle
        } else {
            GestureState::Suppressed
        };
        commands
    }

    fn tap(
        &mut self,
        point: PageCoordinate,
        page_index: u32,
        store: &mut AnnotationStore,
    ) -> StoreResult<GestureCommand> {
        let created = match self.tool {
            Tool::Annotate(AnnotationKind::TextNote) => {
                let variant = AnnotationVariant::text_note(point, self.config.default_note_text.clone());
                Some(store.create(page_index, variant, self.style_for(AnnotationKind::TextNote))?)
            }
            Tool::Annotate(AnnotationKind::RectangleMark) => {
                let half = self.config.default_rect_size_pt / 2.0;
                let variant = AnnotationVariant::rectangle(
                    PageCoordinate::new(point.x - half, point.y - half),
                    PageCoordinate::new(point.x + half, point.y + half),
                );
                Some(store.create(page_index, variant, self.style_for(AnnotationKind::RectangleMark))?)
            }
            _ => None,
        };
        Ok(GestureCommand::Tap { page_index, point, created })
    }

    fn long_press(
        &self,
        point: PageCoordinate,
        page_index: u32,
        view: &ViewState,
        store: &AnnotationStore,
    ) -> GestureCommand {
        let tolerance = self.transform.screen_distance_to_page(self.config.hit_tolerance_px, view);
        let hit = store
            .hit_test(page_index, &point, tolerance)
            .first()
            .map(|annotation| annotation.id());
        GestureCommand::LongPress { page_index, point, hit }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{Color, DocumentId};
    use crate::geometry::PageSize;

    fn view() -> ViewState {
        ViewState::new(0, PageSize::letter())
    }

    fn router(tool: Tool) -> GestureRouter {
        let mut router = GestureRouter::new(GestureConfig::default(), GeometryTransform::default());
        router.set_tool(tool);
        router
    }

    fn store() -> AnnotationStore {
        AnnotationStore::new(DocumentId::new("doc"))
    }

    fn down(x: f64, y: f64, t: u64) -> PointerEvent {
        PointerEvent::new(1, PointerPhase::Down, x, y, t)
    }

    fn mv(x: f64, y: f64, t: u64) -> PointerEvent {
        PointerEvent::new(1, PointerPhase::Move, x, y, t)
    }

    fn up(x: f64, y: f64, t: u64) -> PointerEvent {
        PointerEvent::new(1, PointerPhase::Up, x, y, t)
    }

    #[test]
    fn test_freehand_stroke_is_one_undo_step() {
        let mut router = router(Tool::Annotate(AnnotationKind::FreehandStroke));
        let mut store = store();
        let view = view();

        router.handle(down(100.0, 100.0, 0), &view, &mut store).unwrap();
        let commands = router.handle(mv(120.0, 100.0, 20), &view, &mut store).unwrap();
        let id = match commands[0] {
            GestureCommand::BeginStroke { id, page_index: 0 } => id,
            ref other => panic!("unexpected {other:?}"),
        };
        router.handle(mv(140.0, 110.0, 40), &view, &mut store).unwrap();
        router.handle(mv(160.0, 130.0, 60), &view, &mut store).unwrap();
        let commands = router.handle(up(160.0, 130.0, 80), &view, &mut store).unwrap();
        assert_eq!(commands, vec![GestureCommand::EndStroke { id }]);

        let annotation = store.get(id).unwrap();
        assert_eq!(annotation.variant().point_count(), 4);
        // Captured in page space: screen y=100 on a letter page is page y=692
        assert_eq!(annotation.variant().paths()[0][0], PageCoordinate::new(100.0, 692.0));

        assert!(store.undo());
        assert!(store.is_empty());
        assert!(!store.undo());
        assert!(router.is_idle());
    }

    #[test]
    fn test_highlight_drag_keeps_two_points() {
        let mut router = router(Tool::Annotate(AnnotationKind::Highlight));
        let mut store = store();
        let view = view();

        router.handle(down(10.0, 782.0, 0), &view, &mut store).unwrap();
        router.handle(mv(30.0, 782.0, 30), &view, &mut store).unwrap();
        router.handle(mv(50.0, 782.0, 60), &view, &mut store).unwrap();
        router.handle(up(50.0, 782.0, 90), &view, &mut store).unwrap();

        let annotation = store.list_for_page(0).next().unwrap();
        assert_eq!(
            annotation.variant(),
            &AnnotationVariant::highlight(PageCoordinate::new(10.0, 10.0), PageCoordinate::new(50.0, 10.0))
        );
    }

    #[test]
    fn test_short_stroke_is_discarded() {
        let mut router = router(Tool::Annotate(AnnotationKind::FreehandStroke));
        let mut store = store();
        let view = view();

        router.handle(down(100.0, 100.0, 0), &view, &mut store).unwrap();
        let commands = router.handle(mv(110.0, 100.0, 5), &view, &mut store).unwrap();
        let GestureCommand::BeginStroke { id, .. } = commands[0] else {
            panic!("expected stroke start");
        };
        // 10px is below the 12px minimum length
        let commands = router.handle(up(110.0, 100.0, 100), &view, &mut store).unwrap();

        assert_eq!(commands, vec![GestureCommand::StrokeDiscarded { id }]);
        assert!(store.get(id).is_none());
        assert!(!store.can_undo());
    }

    #[test]
    fn test_fast_flick_is_discarded() {
        let mut router = router(Tool::Annotate(AnnotationKind::FreehandStroke));
        let mut store = store();
        let view = view();

        router.handle(down(100.0, 100.0, 0), &view, &mut store).unwrap();
        router.handle(mv(200.0, 100.0, 5), &view, &mut store).unwrap();
        let commands = router.handle(up(200.0, 100.0, 10), &view, &mut store).unwrap();
        assert!(matches!(commands[0], GestureCommand::StrokeDiscarded { .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn test_tap_places_text_note() {
        let mut router = router(Tool::Annotate(AnnotationKind::TextNote));
        let mut store = store();
        let view = view().with_zoom(2.0);

        router.handle(down(200.0, 200.0, 0), &view, &mut store).unwrap();
        let commands = router.handle(up(202.0, 201.0, 80), &view, &mut store).unwrap();
        let GestureCommand::Tap { created: Some(id), point, .. } = commands[0] else {
            panic!("expected a note");
        };
        assert_eq!(point, PageCoordinate::new(100.0, 692.0));
        assert_eq!(store.get(id).unwrap().kind(), AnnotationKind::TextNote);

        assert!(store.undo());
        assert!(store.is_empty());
    }

    #[test]
    fn test_tap_places_rectangle() {
        let mut router = router(Tool::Annotate(AnnotationKind::RectangleMark));
        let mut store = store();
        let view = view();

        router.handle(down(100.0, 100.0, 0), &view, &mut store).unwrap();
        let commands = router.handle(up(100.0, 100.0, 50), &view, &mut store).unwrap();
        let GestureCommand::Tap { created: Some(id), .. } = commands[0] else {
            panic!("expected a rectangle");
        };
        let rect = store.get(id).unwrap().variant().bounding_box();
        assert_eq!(rect.width(), 48.0);
        assert_eq!(rect.height(), 48.0);
    }

    #[test]
    fn test_style_override_applies_per_kind() {
        let mut router = router(Tool::Annotate(AnnotationKind::RectangleMark));
        let mut store = store();
        let view = view();
        let blue = AnnotationStyle::new(Color::BLUE, 3.0);
        router.set_style(AnnotationKind::RectangleMark, blue.clone());

        router.handle(down(100.0, 100.0, 0), &view, &mut store).unwrap();
        let commands = router.handle(up(100.0, 100.0, 50), &view, &mut store).unwrap();
        let GestureCommand::Tap { created: Some(id), .. } = commands[0] else {
            panic!("expected a rectangle");
        };
        assert_eq!(store.get(id).unwrap().style(), &blue);
        assert_eq!(router.style_for(AnnotationKind::TextNote), AnnotationStyle::note());
    }

    #[test]
    fn test_select_tap_creates_nothing() {
        let mut router = router(Tool::Select);
        let mut store = store();
        let view = view();
        router.handle(down(100.0, 100.0, 0), &view, &mut store).unwrap();
        let commands = router.handle(up(100.0, 100.0, 50), &view, &mut store).unwrap();
        assert!(matches!(commands[0], GestureCommand::Tap { created: None, .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn test_long_press_hits_annotation() {
        let mut router = router(Tool::Select);
        let mut store = store();
        let view = view();
        let id = store
            .create(
                0,
                AnnotationVariant::rectangle(PageCoordinate::new(90.0, 680.0), PageCoordinate::new(110.0, 700.0)),
                AnnotationStyle::pen(),
            )
            .unwrap();

        router.handle(down(100.0, 100.0, 0), &view, &mut store).unwrap();
        assert_eq!(router.tick(100, &view, &store), None);
        let fired = router.tick(600, &view, &store);
        assert!(matches!(fired, Some(GestureCommand::LongPress { hit: Some(hit), .. }) if hit == id));
        assert_eq!(router.tick(700, &view, &store), None);

        // Releasing after a long press is not a tap
        assert!(router.handle(up(100.0, 100.0, 800), &view, &mut store).unwrap().is_empty());
    }

    #[test]
    fn test_long_press_detected_on_release_without_tick() {
        let mut router = router(Tool::Annotate(AnnotationKind::TextNote));
        let mut store = store();
        let view = view();
        router.handle(down(100.0, 100.0, 0), &view, &mut store).unwrap();
        let commands = router.handle(up(100.0, 100.0, 900), &view, &mut store).unwrap();
        assert!(matches!(commands[0], GestureCommand::LongPress { hit: None, .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn test_second_pointer_discards_stroke_and_pinches() {
        let mut router = router(Tool::Annotate(AnnotationKind::FreehandStroke));
        let mut store = store();
        let view = view();

        router.handle(down(100.0, 100.0, 0), &view, &mut store).unwrap();
        let commands = router.handle(mv(130.0, 100.0, 30), &view, &mut store).unwrap();
        let GestureCommand::BeginStroke { id, .. } = commands[0] else {
            panic!("expected stroke start");
        };

        let commands = router
            .handle(PointerEvent::new(2, PointerPhase::Down, 230.0, 100.0, 40), &view, &mut store)
            .unwrap();
        assert_eq!(commands, vec![GestureCommand::StrokeDiscarded { id }]);
        assert!(store.is_empty());

        // Pointers at 130 and 230 (distance 100); spread to 200
        let commands = router
            .handle(PointerEvent::new(2, PointerPhase::Move, 330.0, 100.0, 50), &view, &mut store)
            .unwrap();
        assert_eq!(
            commands,
            vec![GestureCommand::PinchZoom { focal: ScreenPoint::new(230.0, 100.0), scale: 2.0 }]
        );

        router.handle(PointerEvent::new(2, PointerPhase::Up, 330.0, 100.0, 60), &view, &mut store).unwrap();
        // The remaining pointer cannot start a stroke
        assert!(router.handle(mv(10.0, 10.0, 70), &view, &mut store).unwrap().is_empty());
        router.handle(up(10.0, 10.0, 80), &view, &mut store).unwrap();
        assert!(router.is_idle());
        assert!(store.is_empty());
    }

    #[test]
    fn test_view_change_mid_stroke_does_not_reproject() {
        let mut router = router(Tool::Annotate(AnnotationKind::FreehandStroke));
        let mut store = store();
        let before = view();
        let zoomed = view().with_zoom(2.0);

        router.handle(down(100.0, 100.0, 0), &before, &mut store).unwrap();
        let commands = router.handle(mv(100.0, 130.0, 20), &before, &mut store).unwrap();
        let GestureCommand::BeginStroke { id, .. } = commands[0] else {
            panic!("expected stroke start");
        };
        router.handle(mv(100.0, 160.0, 40), &zoomed, &mut store).unwrap();
        router.handle(up(100.0, 160.0, 60), &zoomed, &mut store).unwrap();

        let points = store.get(id).unwrap().variant().paths()[0].to_vec();
        assert_eq!(points[0], PageCoordinate::new(100.0, 692.0));
        assert_eq!(points[1], PageCoordinate::new(100.0, 662.0));
        assert_eq!(points[2], PageCoordinate::new(50.0, 712.0));
    }

    #[test]
    fn test_cancel_discards_stroke() {
        let mut router = router(Tool::Annotate(AnnotationKind::Underline));
        let mut store = store();
        let view = view();
        router.handle(down(100.0, 100.0, 0), &view, &mut store).unwrap();
        router.handle(mv(150.0, 100.0, 50), &view, &mut store).unwrap();
        let commands = router
            .handle(PointerEvent::new(1, PointerPhase::Cancel, 150.0, 100.0, 60), &view, &mut store)
            .unwrap();
        assert!(matches!(commands[0], GestureCommand::StrokeDiscarded { .. }));
        assert!(store.is_empty());
        assert!(router.is_idle());
    }
}
