//! Background export task and its handle

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pdf_annotator_core::{AnnotationId, CancellationToken};
use pdf_engine::{write_annotations, ExportError, ExportOptions, ExportSnapshot};
use tempfile::NamedTempFile;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn};

use crate::error::{SessionError, SessionResult};

/// What the export task produced, before the session adds its own view
#[derive(Debug)]
pub(crate) struct ExportSummary {
    pub written: usize,
    pub replaced: usize,
    pub pages: Vec<u32>,
}

/// A running export
///
/// Obtained from [`DocumentSession::begin_export`] and consumed by
/// [`DocumentSession::finish_export`]. Dropping it unsettled cancels the
/// export; the session returns to Ready on its next export, open or reload.
///
/// [`DocumentSession::begin_export`]: crate::DocumentSession::begin_export
/// [`DocumentSession::finish_export`]: crate::DocumentSession::finish_export
#[derive(Debug)]
pub struct ExportHandle {
    pub(crate) cancel: CancellationToken,
    pub(crate) task: JoinHandle<SessionResult<ExportSummary>>,
    /// Store revision captured with the snapshot
    pub(crate) revision: u64,
    pub(crate) destination: PathBuf,
    pub(crate) retired: BTreeSet<AnnotationId>,
    pub(crate) guard: ExportGuard,
}

/// Cancels the export and raises the session's flag when the handle is
/// dropped before the export was settled
#[derive(Debug)]
pub(crate) struct ExportGuard {
    cancel: CancellationToken,
    abandoned: Arc<AtomicBool>,
    armed: bool,
}

impl ExportGuard {
    pub(crate) fn new(cancel: CancellationToken) -> (Self, Arc<AtomicBool>) {
        let abandoned = Arc::new(AtomicBool::new(false));
        let guard = Self { cancel, abandoned: abandoned.clone(), armed: true };
        (guard, abandoned)
    }

    pub(crate) fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ExportGuard {
    fn drop(&mut self) {
        if self.armed {
            self.cancel.cancel();
            self.abandoned.store(true, Ordering::SeqCst);
            warn!("export handle dropped before the export was settled");
        }
    }
}

impl ExportHandle {
    /// Ask the task to stop; the destination is left untouched if it has
    /// not been replaced yet
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportReport {
    pub destination: PathBuf,
    /// Annotation dictionaries written
    pub written: usize,
    /// Earlier exported dictionaries replaced or removed
    pub replaced: usize,
    /// Pages whose annotations changed in the output
    pub pages: Vec<u32>,
    /// Store revision the output reflects
    pub revision: u64,
    /// The store was edited while the export ran
    pub unsaved_changes: bool,
    /// Tombstones whose exported copies were removed from the output
    pub retired: BTreeSet<AnnotationId>,
}

pub(crate) fn spawn_export(
    source: Arc<Vec<u8>>,
    snapshot: ExportSnapshot,
    options: ExportOptions,
    destination: PathBuf,
    revision: u64,
    cancel: CancellationToken,
    guard: ExportGuard,
) -> ExportHandle {
    let retired = snapshot.retired.clone();
    let task = {
        let cancel = cancel.clone();
        let destination = destination.clone();
        tokio::task::spawn_blocking(move || {
            let span = info_span!("export", destination = %destination.display(), revision);
            let _guard = span.enter();
            run_export(&source, &snapshot, &options, &destination, &cancel)
        })
    };
    ExportHandle { cancel, task, revision, destination, retired, guard }
}

fn run_export(
    source: &[u8],
    snapshot: &ExportSnapshot,
    options: &ExportOptions,
    destination: &Path,
    cancel: &CancellationToken,
) -> SessionResult<ExportSummary> {
    debug!(annotations = snapshot.annotation_count(), "export started");
    let outcome = write_annotations(source, snapshot, options, cancel)?;
    write_atomically(destination, &outcome.bytes, cancel)?;
    info!(written = outcome.written, replaced = outcome.replaced, "export written");
    Ok(ExportSummary { written: outcome.written, replaced: outcome.replaced, pages: outcome.pages })
}

/// Write `bytes` to a temp file next to `destination`, then rename over it
///
/// The temp file is removed on every error path, including cancellation
/// observed just before the rename.
fn write_atomically(destination: &Path, bytes: &[u8], cancel: &CancellationToken) -> SessionResult<()> {
    let directory = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(directory)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;

    if cancel.is_cancelled() {
        return Err(ExportError::Cancelled.into());
    }
    file.persist(destination)
        .map_err(|error| SessionError::Export(ExportError::Write(error.error.to_string())))?;
    Ok(())
}
