//! PDF Annotator Core Library
//!
//! In-memory annotation model for the PDF annotator: page-space geometry,
//! the undoable annotation store and the gesture router that feeds it.

pub mod annotation;
pub mod cancel;
pub mod config;
pub mod error;
pub mod geometry;
pub mod gesture;
pub mod history;
pub mod store;

pub use annotation::{
    now_millis, Annotation, AnnotationId, AnnotationKind, AnnotationStyle, AnnotationVariant, Color,
    DocumentId, PageCoordinate, PageRect, TEXT_NOTE_SIZE,
};
pub use cancel::CancellationToken;
pub use config::{
    ConfigError, EngineConfig, ExportConfig, GestureConfig, HistoryConfig, PersistenceConfig,
    TextNoteStyle, ViewConfig,
};
pub use error::{StoreError, StoreResult};
pub use geometry::{
    Affine, GeometryTransform, PageSize, Rotation, ScreenPoint, ScreenRect, ViewState, ZoomRange,
};
pub use gesture::{GestureCommand, GestureRouter, PointerEvent, PointerId, PointerPhase, Tool};
pub use history::{UndoEntry, UndoGroup, UndoLog};
pub use store::{AnnotationPatch, AnnotationStore, PageSnapshot};
