//! Engine configuration
//!
//! Settings are layered: built-in defaults, then an optional JSON file, then
//! `PDF_ANNOTATOR_*` environment variables. Every section is optional in the
//! file; missing keys keep their defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::geometry::{ZoomRange, DEFAULT_MAX_ZOOM, DEFAULT_MIN_ZOOM};
use crate::history::DEFAULT_UNDO_LIMIT;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub view: ViewConfig,
    pub gestures: GestureConfig,
    pub history: HistoryConfig,
    pub persistence: PersistenceConfig,
    pub export: ExportConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    pub min_zoom: f64,
    pub max_zoom: f64,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self { min_zoom: DEFAULT_MIN_ZOOM, max_zoom: DEFAULT_MAX_ZOOM }
    }
}

impl ViewConfig {
    pub fn zoom_range(&self) -> ZoomRange {
        ZoomRange::new(self.min_zoom, self.max_zoom)
    }
}

/// Thresholds used to classify pointer input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GestureConfig {
    /// Movement (pixels) a press may make and still count as a tap
    pub touch_slop_px: f64,
    /// Hold time before a stationary press becomes a long press
    pub long_press_ms: u64,
    /// Strokes shorter than this on screen are discarded
    pub min_stroke_length_px: f64,
    /// Strokes faster than this are discarded
    pub min_stroke_duration_ms: u64,
    /// Pointer moves closer than this to the last captured point are skipped
    pub min_point_spacing_px: f64,
    /// Hit radius for long-press selection
    pub hit_tolerance_px: f64,
    /// Side length of a rectangle placed by a tap, in points
    pub default_rect_size_pt: f64,
    /// Initial text of a note placed by a tap
    pub default_note_text: String,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            touch_slop_px: 8.0,
            long_press_ms: 500,
            min_stroke_length_px: 12.0,
            min_stroke_duration_ms: 40,
            min_point_spacing_px: 1.5,
            hit_tolerance_px: 12.0,
            default_rect_size_pt: 48.0,
            default_note_text: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Gesture groups kept for undo
    pub undo_limit: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { undo_limit: DEFAULT_UNDO_LIMIT }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// SQLite file; the platform data directory is used when unset
    pub database_path: Option<PathBuf>,
    pub max_connections: u32,
    /// Attempts per flush, including the first
    pub retry_attempts: u32,
    pub retry_initial_backoff_ms: u64,
    pub retry_max_backoff_ms: u64,
    /// Adopt annotations already in the PDF when it is opened or reloaded
    pub import_on_open: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            max_connections: 5,
            retry_attempts: 3,
            retry_initial_backoff_ms: 50,
            retry_max_backoff_ms: 2_000,
            import_on_open: true,
        }
    }
}

/// How text notes are written on export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextNoteStyle {
    /// Text drawn directly on the page (`/FreeText`)
    #[default]
    FreeText,
    /// Collapsed sticky-note icon with a popup (`/Text`)
    Sticky,
    /// Burned into the page content; later exports cannot replace it
    Flattened,
}

impl FromStr for TextNoteStyle {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "free_text" | "freetext" => Ok(TextNoteStyle::FreeText),
            "sticky" | "text" => Ok(TextNoteStyle::Sticky),
            "flattened" | "flatten" => Ok(TextNoteStyle::Flattened),
            _ => Err(ConfigError::InvalidValue("text_note_style".to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub text_note_style: TextNoteStyle,
    /// Font size for free-text notes, in points
    pub font_size: f64,
    /// Written as `/T` on annotations without an author of their own
    pub author: Option<String>,
    /// Emit `/AP` appearance streams
    pub generate_appearances: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            text_note_style: TextNoteStyle::FreeText,
            font_size: 12.0,
            author: None,
            generate_appearances: true,
        }
    }
}

impl EngineConfig {
    /// Defaults, then the file (if given), then the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.with_env_overrides()
    }

    /// Loads configuration from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by environment variables.
    ///
    /// Environment variables:
    /// - `PDF_ANNOTATOR_MIN_ZOOM` / `PDF_ANNOTATOR_MAX_ZOOM`
    /// - `PDF_ANNOTATOR_TOUCH_SLOP_PX`
    /// - `PDF_ANNOTATOR_UNDO_LIMIT`
    /// - `PDF_ANNOTATOR_DB_PATH`
    /// - `PDF_ANNOTATOR_DB_MAX_CONNECTIONS`
    /// - `PDF_ANNOTATOR_RETRY_ATTEMPTS`
    /// - `PDF_ANNOTATOR_IMPORT_ON_OPEN` (`true` or `false`)
    /// - `PDF_ANNOTATOR_TEXT_NOTE_STYLE` (`free_text`, `sticky` or `flattened`)
    /// - `PDF_ANNOTATOR_AUTHOR`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Some(value) = env_parse("PDF_ANNOTATOR_MIN_ZOOM")? {
            self.view.min_zoom = value;
        }
        if let Some(value) = env_parse("PDF_ANNOTATOR_MAX_ZOOM")? {
            self.view.max_zoom = value;
        }
        if let Some(value) = env_parse("PDF_ANNOTATOR_TOUCH_SLOP_PX")? {
            self.gestures.touch_slop_px = value;
        }
        if let Some(value) = env_parse("PDF_ANNOTATOR_UNDO_LIMIT")? {
            self.history.undo_limit = value;
        }
        if let Ok(value) = std::env::var("PDF_ANNOTATOR_DB_PATH") {
            self.persistence.database_path = Some(PathBuf::from(value));
        }
        if let Some(value) = env_parse("PDF_ANNOTATOR_DB_MAX_CONNECTIONS")? {
            self.persistence.max_connections = value;
        }
        if let Some(value) = env_parse("PDF_ANNOTATOR_RETRY_ATTEMPTS")? {
            self.persistence.retry_attempts = value;
        }
        if let Some(value) = env_parse("PDF_ANNOTATOR_IMPORT_ON_OPEN")? {
            self.persistence.import_on_open = value;
        }
        if let Some(value) = env_parse("PDF_ANNOTATOR_TEXT_NOTE_STYLE")? {
            self.export.text_note_style = value;
        }
        if let Ok(value) = std::env::var("PDF_ANNOTATOR_AUTHOR") {
            self.export.author = Some(value).filter(|author| !author.is_empty());
        }
        self.validate()?;
        Ok(self)
    }

    /// Saves configuration as pretty-printed JSON.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str| Err(ConfigError::InvalidValue(key.to_string()));
        if !(self.view.min_zoom > 0.0 && self.view.min_zoom.is_finite()) {
            return invalid("view.min_zoom");
        }
        if !(self.view.max_zoom >= self.view.min_zoom && self.view.max_zoom.is_finite()) {
            return invalid("view.max_zoom");
        }
        if !(self.gestures.touch_slop_px >= 0.0) {
            return invalid("gestures.touch_slop_px");
        }
        if self.history.undo_limit == 0 {
            return invalid("history.undo_limit");
        }
        if self.persistence.max_connections == 0 {
            return invalid("persistence.max_connections");
        }
        if self.persistence.retry_attempts == 0 {
            return invalid("persistence.retry_attempts");
        }
        if !(self.export.font_size > 0.0) {
            return invalid("export.font_size");
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        Err(_) => Ok(None),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for configuration key: {0}")]
    InvalidValue(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed configuration file: {0}")]
    Parse(#[from] serde_json::Error),
}
