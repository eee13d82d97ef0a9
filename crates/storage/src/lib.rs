//! Durable annotation storage
//!
//! SQLite-backed repository for annotations and opened documents, plus the
//! per-page flush queue that writes store snapshots in the background.

use std::path::PathBuf;

use directories::ProjectDirs;

mod error;
mod queue;
mod repository;
mod retry;
mod schema;
mod sqlite;

pub use error::{PersistenceError, PersistenceResult};
pub use queue::{FlushQueue, FlushTicket};
pub use repository::{AnnotationRepository, DocumentRecord};
pub use retry::RetryPolicy;
pub use sqlite::SqliteRepository;

pub const DATABASE_FILE_NAME: &str = "annotations.sqlite3";

/// `annotations.sqlite3` in the platform's local data directory
pub fn default_database_path() -> PersistenceResult<PathBuf> {
    let dirs = ProjectDirs::from("dev", "PdfAnnotator", "PdfAnnotator").ok_or(PersistenceError::NoDataDirectory)?;
    Ok(dirs.data_local_dir().join(DATABASE_FILE_NAME))
}
