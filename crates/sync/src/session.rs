//! Per-document session
//!
//! A [`DocumentSession`] owns everything one open document needs: page
//! geometry and bytes of the PDF, the annotation store, the gesture router
//! feeding it, a flush queue in front of the repository and the lifecycle
//! state machine. Sessions share nothing but the repository, so several
//! documents can be open at once.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pdf_annotator_core::{
    now_millis, AnnotationId, AnnotationStore, CancellationToken, DocumentId, EngineConfig, GeometryTransform,
    GestureCommand, GestureRouter, PageSnapshot, PointerEvent, ViewState,
};
use pdf_annotator_storage::{
    AnnotationRepository, DocumentRecord, FlushQueue, FlushTicket, PersistenceError, RetryPolicy,
    SqliteRepository,
};
use pdf_engine::{
    import_annotations, list_notes, DocumentInfo, ExportError, ExportOptions, ExportSnapshot, ImportStats,
    ImportedAnnotations, NoteInfo, OpenSource,
};
use tracing::{debug, info, warn};

use crate::error::{SessionError, SessionResult};
use crate::export::{spawn_export, ExportGuard, ExportHandle, ExportReport};
use crate::state::{SyncEvent, SyncState, SyncStateMachine};

/// A background flush that did not reach storage; the page stays dirty
#[derive(Debug)]
pub struct FlushFailure {
    pub page_index: u32,
    pub error: PersistenceError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadReport {
    pub page_count: u32,
    /// Pages holding live annotations beyond the new page range
    pub orphaned_pages: Vec<u32>,
    /// Annotations found in the new file and added to the store
    pub imported: Vec<AnnotationId>,
}

/// Outcome of taking in the annotations a PDF already carries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub stats: ImportStats,
    /// Ids new to the store; known ids, tombstones included, are skipped
    pub adopted: Vec<AnnotationId>,
}

struct LoadedDocument {
    info: DocumentInfo,
    bytes: Arc<Vec<u8>>,
    store: AnnotationStore,
}

impl LoadedDocument {
    fn orphaned_pages(&self) -> Vec<u32> {
        let page_count = self.info.page_count();
        self.store
            .pages()
            .filter(|page| *page >= page_count)
            .filter(|page| self.store.list_active_for_page(*page).next().is_some())
            .collect()
    }
}

pub struct DocumentSession {
    config: EngineConfig,
    repository: Arc<dyn AnnotationRepository>,
    retry: RetryPolicy,
    queue: FlushQueue,
    machine: SyncStateMachine,
    router: GestureRouter,
    document: Option<LoadedDocument>,
    /// Where the document was opened from, for reloads
    origin: Option<OpenSource>,
    pending: Vec<(PageSnapshot, FlushTicket)>,
    active_page: Option<u32>,
    exported_revision: Option<u64>,
    /// Raised when the running export's handle is dropped unsettled
    abandoned_export: Option<Arc<AtomicBool>>,
    last_import: Option<ImportReport>,
}

impl DocumentSession {
    /// Must be called inside a tokio runtime
    pub fn new(repository: Arc<dyn AnnotationRepository>, config: EngineConfig) -> Self {
        let retry = RetryPolicy::from(&config.persistence);
        let queue = FlushQueue::new(repository.clone(), retry);
        let transform = GeometryTransform::new(config.view.zoom_range());
        let router = GestureRouter::new(config.gestures.clone(), transform);
        Self {
            config,
            repository,
            retry,
            queue,
            machine: SyncStateMachine::new(),
            router,
            document: None,
            origin: None,
            pending: Vec::new(),
            active_page: None,
            exported_revision: None,
            abandoned_export: None,
            last_import: None,
        }
    }

    /// Session backed by the SQLite database named in the configuration
    pub async fn connect(config: EngineConfig) -> SessionResult<Self> {
        let repository = SqliteRepository::from_config(&config.persistence).await?;
        Ok(Self::new(Arc::new(repository), config))
    }

    pub fn state(&self) -> SyncState {
        self.machine.state()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Open a document and load its stored annotations
    ///
    /// Allowed from Idle, or from Error to start over. On failure the
    /// session enters Error.
    pub async fn open(&mut self, source: impl Into<OpenSource>) -> SessionResult<()> {
        self.recover_abandoned_export()?;
        self.machine.transition(SyncEvent::Open)?;
        if self.document.is_some() {
            if let Err(error) = self.flush_all().await {
                warn!(%error, "unflushed changes before reopen");
            }
        }

        let source = source.into();
        match self.load(source.clone()).await {
            Ok((document, imported)) => {
                let orphaned = document.orphaned_pages();
                if !orphaned.is_empty() {
                    warn!(?orphaned, "annotations on pages beyond the document");
                }
                info!(
                    document = %document.info.id,
                    pages = document.info.page_count(),
                    annotations = document.store.len(),
                    "document opened"
                );
                self.document = Some(document);
                self.origin = Some(source);
                self.active_page = None;
                self.exported_revision = None;
                self.machine.transition(SyncEvent::Loaded)?;
                if imported.as_ref().is_some_and(|report| !report.adopted.is_empty()) {
                    self.request_flush_all()?;
                }
                self.last_import = imported;
                Ok(())
            }
            Err(error) => {
                warn!(%error, "document failed to load");
                self.machine.transition(SyncEvent::LoadFailed)?;
                Err(error)
            }
        }
    }

    async fn load(&self, source: OpenSource) -> SessionResult<(LoadedDocument, Option<ImportReport>)> {
        let (info, bytes) = read_document(source).await?;

        let record = DocumentRecord {
            id: info.id.clone(),
            path: info.path.clone(),
            page_count: info.page_count(),
            last_opened: now_millis(),
        };
        self.retry.run("record_document", || self.repository.record_document(&record)).await?;
        let pages = self.retry.run("load_document", || self.repository.load_document(&info.id)).await?;

        let mut store = AnnotationStore::from_loaded(info.id.clone(), pages)
            .with_history_limit(self.config.history.undo_limit)
            .with_default_author(self.config.export.author.clone());
        let bytes = Arc::new(bytes);
        let imported = if self.config.persistence.import_on_open {
            let found = read_annotations(bytes.clone(), info.id.clone()).await?;
            Some(adopt_imported(&mut store, found))
        } else {
            None
        };
        Ok((LoadedDocument { info, bytes, store }, imported))
    }

    /// What the last open or [`import_existing`](Self::import_existing) took
    /// in from the PDF itself
    pub fn last_import(&self) -> Option<&ImportReport> {
        self.last_import.as_ref()
    }

    /// Adopt the annotations the PDF carries that the store does not know
    ///
    /// Adopted pages are queued for flushing.
    pub async fn import_existing(&mut self) -> SessionResult<ImportReport> {
        let document = self.loaded()?;
        let found = read_annotations(document.bytes.clone(), document.store.document_id().clone()).await?;
        let state = self.machine.state();
        let document = self.document.as_mut().ok_or(SessionError::NotReady(state))?;
        let report = adopt_imported(&mut document.store, found);
        if !report.adopted.is_empty() {
            self.request_flush_all()?;
        }
        self.last_import = Some(report.clone());
        Ok(report)
    }

    /// Text and FreeText notes with contents, as stored in the PDF
    pub async fn notes(&self) -> SessionResult<Vec<NoteInfo>> {
        let bytes = self.loaded()?.bytes.clone();
        tokio::task::spawn_blocking(move || list_notes(&bytes))
            .await
            .map_err(|error| SessionError::TaskFailed(error.to_string()))?
            .map_err(SessionError::from)
    }

    pub fn info(&self) -> SessionResult<&DocumentInfo> {
        self.loaded().map(|document| &document.info)
    }

    pub fn store(&self) -> SessionResult<&AnnotationStore> {
        self.loaded().map(|document| &document.store)
    }

    /// Direct edits; call [`request_flush`](Self::request_flush) afterwards
    /// to persist them
    pub fn store_mut(&mut self) -> SessionResult<&mut AnnotationStore> {
        let state = self.machine.state();
        self.document.as_mut().map(|document| &mut document.store).ok_or(SessionError::NotReady(state))
    }

    fn loaded(&self) -> SessionResult<&LoadedDocument> {
        self.document.as_ref().ok_or(SessionError::NotReady(self.machine.state()))
    }

    pub fn router(&self) -> &GestureRouter {
        &self.router
    }

    /// Tool and style selection
    pub fn router_mut(&mut self) -> &mut GestureRouter {
        &mut self.router
    }

    /// Route a pointer event into the store
    ///
    /// Finished strokes and placed annotations are handed to the flush
    /// queue without waiting.
    pub fn handle_pointer(&mut self, event: PointerEvent, view: &ViewState) -> SessionResult<Vec<GestureCommand>> {
        let state = self.machine.state();
        let document = self.document.as_mut().ok_or(SessionError::NotReady(state))?;
        let commands = self.router.handle(event, view, &mut document.store)?;

        let settled = commands.iter().any(|command| {
            matches!(
                command,
                GestureCommand::EndStroke { .. }
                    | GestureCommand::StrokeDiscarded { .. }
                    | GestureCommand::Tap { created: Some(_), .. }
            )
        });
        if settled {
            self.request_flush_all()?;
        }
        Ok(commands)
    }

    /// Drive long-press detection while a pointer is held
    pub fn tick(&mut self, now_ms: u64, view: &ViewState) -> SessionResult<Option<GestureCommand>> {
        let state = self.machine.state();
        let document = self.document.as_ref().ok_or(SessionError::NotReady(state))?;
        Ok(self.router.tick(now_ms, view, &document.store))
    }

    /// Queue the page's pending changes for a background write
    ///
    /// Returns `false` when the page has nothing to flush. Never waits.
    pub fn request_flush(&mut self, page_index: u32) -> SessionResult<bool> {
        let Some(snapshot) = self.store()?.flush_snapshot(page_index) else {
            return Ok(false);
        };
        let queued = self
            .pending
            .iter()
            .any(|(pending, _)| pending.page_index == page_index && pending.revision == snapshot.revision);
        if !queued {
            debug!(page = page_index, revision = snapshot.revision, "flush requested");
            let ticket = self.queue.submit(snapshot.clone());
            self.pending.push((snapshot, ticket));
        }
        Ok(true)
    }

    /// Queue every dirty page
    pub fn request_flush_all(&mut self) -> SessionResult<usize> {
        let pages = self.store()?.dirty_pages();
        for page in &pages {
            self.request_flush(*page)?;
        }
        Ok(pages.len())
    }

    /// Collect finished background flushes
    ///
    /// Successful writes clear the page's dirty state unless it changed
    /// again in the meantime; failures are returned and leave it dirty.
    pub fn poll_flushes(&mut self) -> Vec<FlushFailure> {
        let mut failures = Vec::new();
        let mut waiting = Vec::new();
        for (snapshot, mut ticket) in std::mem::take(&mut self.pending) {
            match ticket.try_result() {
                None => waiting.push((snapshot, ticket)),
                Some(Ok(())) => self.settle(&snapshot),
                Some(Err(error)) => {
                    warn!(page = snapshot.page_index, %error, "background flush failed");
                    failures.push(FlushFailure { page_index: snapshot.page_index, error });
                }
            }
        }
        self.pending = waiting;
        failures
    }

    /// Write the page now and wait for every outstanding write of it
    ///
    /// Returns whether the page is clean afterwards.
    pub async fn flush(&mut self, page_index: u32) -> SessionResult<bool> {
        self.request_flush(page_index)?;
        let (mine, others): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|(snapshot, _)| snapshot.page_index == page_index);
        self.pending = others;

        let mut last_error = None;
        for (snapshot, ticket) in mine {
            match ticket.wait().await {
                Ok(()) => self.settle(&snapshot),
                Err(error) => last_error = Some(error),
            }
        }

        let dirty = self.store()?.is_dirty(page_index);
        match last_error {
            // A later write of the same page may have covered the failed one
            Some(error) if dirty => Err(error.into()),
            _ => Ok(!dirty),
        }
    }

    /// Flush every dirty page; the first failure is returned after all
    /// pages were attempted
    pub async fn flush_all(&mut self) -> SessionResult<()> {
        let pages = self.store()?.dirty_pages();
        let mut first_error = None;
        for page in pages {
            if let Err(error) = self.flush(page).await {
                warn!(page, %error, "flush failed");
                first_error.get_or_insert(error);
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn settle(&mut self, snapshot: &PageSnapshot) {
        if let Some(document) = self.document.as_mut() {
            if !document.store.mark_flushed(snapshot) {
                debug!(page = snapshot.page_index, "page changed during flush");
            }
        }
    }

    /// Track navigation; leaving a page flushes it in the background
    pub fn on_view_changed(&mut self, view: &ViewState) -> SessionResult<Vec<FlushFailure>> {
        self.loaded()?;
        if let Some(previous) = self.active_page.replace(view.page_index) {
            if previous != view.page_index {
                self.request_flush(previous)?;
            }
        }
        Ok(self.poll_flushes())
    }

    /// Pages holding live annotations beyond the document's page range
    pub fn orphaned_pages(&self) -> SessionResult<Vec<u32>> {
        Ok(self.loaded()?.orphaned_pages())
    }

    /// Re-read the PDF after it was replaced or reflowed
    ///
    /// Annotations are kept, including those that now fall outside the
    /// page range. In Ready the state is unchanged and a failed read keeps
    /// the previous document. In Error a successful read returns the
    /// session to Ready.
    pub async fn reload_document(&mut self) -> SessionResult<ReloadReport> {
        self.recover_abandoned_export()?;
        let state = self.machine.state();
        if !matches!(state, SyncState::Ready | SyncState::Error) {
            return Err(SessionError::InvalidTransition { from: state, event: SyncEvent::Open });
        }
        let origin = self.origin.clone().ok_or(SessionError::NotReady(state))?;
        if self.document.is_none() {
            return Err(SessionError::NotReady(state));
        }

        if state == SyncState::Error {
            self.machine.transition(SyncEvent::Open)?;
        }
        let read = read_document(origin).await;
        let (mut info, bytes) = match read {
            Ok(read) => read,
            Err(error) => {
                warn!(%error, "reload failed");
                if state == SyncState::Error {
                    self.machine.transition(SyncEvent::LoadFailed)?;
                }
                return Err(error);
            }
        };

        let bytes = Arc::new(bytes);
        let document_id = self.store()?.document_id().clone();
        let found = if self.config.persistence.import_on_open {
            match read_annotations(bytes.clone(), document_id.clone()).await {
                Ok(found) => Some(found),
                Err(error) => {
                    warn!(%error, "annotations in the reloaded file not read");
                    None
                }
            }
        } else {
            None
        };

        let document = self.document.as_mut().ok_or(SessionError::NotReady(state))?;
        // Annotations stay keyed by the identity they were loaded under
        info.id = document_id;
        document.info = info;
        document.bytes = bytes;
        let imported = found.map(|found| adopt_imported(&mut document.store, found));

        let report = ReloadReport {
            page_count: document.info.page_count(),
            orphaned_pages: document.orphaned_pages(),
            imported: imported.as_ref().map(|report| report.adopted.clone()).unwrap_or_default(),
        };
        if imported.is_some() {
            self.last_import = imported;
        }
        if !report.imported.is_empty() {
            self.request_flush_all()?;
        }
        let info = self.info()?;
        let record = DocumentRecord {
            id: info.id.clone(),
            path: info.path.clone(),
            page_count: report.page_count,
            last_opened: now_millis(),
        };
        if let Err(error) = self.repository.record_document(&record).await {
            warn!(%error, "document record not refreshed");
        }
        if state == SyncState::Error {
            self.machine.transition(SyncEvent::Loaded)?;
        }
        if !report.orphaned_pages.is_empty() {
            warn!(orphaned = ?report.orphaned_pages, "annotations beyond the reloaded page range");
        }
        info!(pages = report.page_count, "document reloaded");
        Ok(report)
    }

    /// Start exporting every live annotation into a copy of the PDF
    ///
    /// The store stays editable while the export runs.
    pub fn begin_export(&mut self, destination: impl Into<PathBuf>) -> SessionResult<ExportHandle> {
        self.begin_export_with(destination, CancellationToken::new())
    }

    /// [`begin_export`](Self::begin_export) observing an existing token,
    /// e.g. one shared with application shutdown
    pub fn begin_export_with(
        &mut self,
        destination: impl Into<PathBuf>,
        cancel: CancellationToken,
    ) -> SessionResult<ExportHandle> {
        self.recover_abandoned_export()?;
        let Some(document) = self.document.as_ref() else {
            return Err(SessionError::NotReady(self.machine.state()));
        };
        self.machine.transition(SyncEvent::ExportRequested)?;
        let (guard, abandoned) = ExportGuard::new(cancel.clone());
        self.abandoned_export = Some(abandoned);

        let snapshot = ExportSnapshot::from_store(&document.store);
        let revision = document.store.revision();
        let options = ExportOptions::from(&self.config.export);
        let destination = destination.into();
        info!(
            destination = %destination.display(),
            annotations = snapshot.annotation_count(),
            revision,
            "export requested"
        );
        Ok(spawn_export(document.bytes.clone(), snapshot, options, destination, revision, cancel, guard))
    }

    /// Cancel a running export and wait for it to stop
    ///
    /// Returns the report if the export completed before it saw the
    /// cancellation; the session is Ready either way.
    pub async fn abort_export(&mut self, handle: ExportHandle) -> SessionResult<Option<ExportReport>> {
        handle.cancel();
        match self.finish_export(handle).await {
            Ok(report) => Ok(Some(report)),
            Err(SessionError::Export(ExportError::Cancelled)) => Ok(None),
            Err(error) => Err(error),
        }
    }

    /// Settle an export whose handle was dropped unfinished
    fn recover_abandoned_export(&mut self) -> SessionResult<()> {
        let abandoned = self.abandoned_export.as_ref().is_some_and(|flag| flag.load(Ordering::SeqCst));
        if abandoned && self.machine.state() == SyncState::Exporting {
            self.machine.transition(SyncEvent::ExportCancelled)?;
            self.abandoned_export = None;
            info!("abandoned export settled as cancelled");
        }
        Ok(())
    }

    /// Wait for an export and settle the session state
    ///
    /// Success and cancellation return to Ready, any other failure enters
    /// Error with the annotations untouched.
    pub async fn finish_export(&mut self, handle: ExportHandle) -> SessionResult<ExportReport> {
        let ExportHandle { task, revision, destination, retired, guard, .. } = handle;
        let result = match task.await {
            Ok(result) => result,
            Err(error) => Err(SessionError::TaskFailed(error.to_string())),
        };
        guard.disarm();
        self.abandoned_export = None;

        match result {
            Ok(summary) => {
                self.machine.transition(SyncEvent::ExportSucceeded)?;
                self.exported_revision = Some(revision);
                let unsaved_changes = self.store()?.revision() != revision;
                if unsaved_changes {
                    info!(revision, "store changed during export");
                }
                Ok(ExportReport {
                    destination,
                    written: summary.written,
                    replaced: summary.replaced,
                    pages: summary.pages,
                    revision,
                    unsaved_changes,
                    retired,
                })
            }
            Err(SessionError::Export(ExportError::Cancelled)) => {
                self.machine.transition(SyncEvent::ExportCancelled)?;
                info!("export cancelled");
                Err(ExportError::Cancelled.into())
            }
            Err(error) => {
                self.machine.transition(SyncEvent::ExportFailed)?;
                if let SessionError::Export(export) = &error {
                    for failure in export.failed_pages() {
                        warn!(page = failure.page_index, reason = %failure.reason, "page not exported");
                    }
                }
                warn!(%error, "export failed");
                Err(error)
            }
        }
    }

    pub async fn export(&mut self, destination: impl Into<PathBuf>) -> SessionResult<ExportReport> {
        let handle = self.begin_export(destination)?;
        self.finish_export(handle).await
    }

    /// Whether the store holds changes no successful export reflects
    pub fn has_unexported_changes(&self) -> bool {
        let Ok(store) = self.store() else {
            return false;
        };
        match self.exported_revision {
            Some(revision) => store.revision() != revision,
            None => store.revision() > 0 || store.pages().any(|page| store.list_active_for_page(page).next().is_some()),
        }
    }

    /// Drop the tombstones an export removed from the output
    ///
    /// Tombstones restored since the export are kept. The affected pages
    /// are queued for flushing.
    pub fn confirm_export(&mut self, report: &ExportReport) -> SessionResult<Vec<AnnotationId>> {
        let exported_revision = self.exported_revision;
        let store = self.store_mut()?;
        let untouched = exported_revision == Some(report.revision) && store.revision() == report.revision;
        let mut pages: Vec<u32> = report
            .retired
            .iter()
            .filter_map(|id| store.get(*id))
            .map(|annotation| annotation.page_index())
            .collect();
        pages.sort_unstable();
        pages.dedup();

        let purged = store.purge_tombstones(report.retired.iter().copied());
        let revision = store.revision();
        // The exported file already lacks the purged records
        if untouched {
            self.exported_revision = Some(revision);
        }
        for page in pages {
            self.request_flush(page)?;
        }
        info!(purged = purged.len(), "export confirmed");
        Ok(purged)
    }

    /// End any open gesture, flush every dirty page and stop the queue
    pub async fn close(mut self) -> SessionResult<()> {
        let mut loaded = false;
        if let Some(document) = self.document.as_mut() {
            if document.store.in_gesture() {
                document.store.end_gesture();
            }
            loaded = true;
        }
        let flushed = if loaded { self.flush_all().await } else { Ok(()) };
        self.queue.shutdown().await?;
        info!(state = %self.machine.state(), "session closed");
        flushed
    }
}

async fn read_annotations(bytes: Arc<Vec<u8>>, document_id: DocumentId) -> SessionResult<ImportedAnnotations> {
    tokio::task::spawn_blocking(move || import_annotations(&bytes, &document_id))
        .await
        .map_err(|error| SessionError::TaskFailed(error.to_string()))?
        .map_err(SessionError::from)
}

fn adopt_imported(store: &mut AnnotationStore, found: ImportedAnnotations) -> ImportReport {
    let mut adopted = Vec::new();
    for annotation in found.pages.into_values().flatten() {
        let id = annotation.id();
        match store.adopt(annotation) {
            Ok(true) => adopted.push(id),
            Ok(false) => {}
            Err(error) => warn!(%id, %error, "imported annotation rejected"),
        }
    }
    if !adopted.is_empty() {
        info!(adopted = adopted.len(), found = found.stats.total_found, "annotations imported from the document");
    }
    ImportReport { stats: found.stats, adopted }
}

async fn read_document(source: OpenSource) -> SessionResult<(DocumentInfo, Vec<u8>)> {
    tokio::task::spawn_blocking(move || DocumentInfo::open(source))
        .await
        .map_err(|error| SessionError::TaskFailed(error.to_string()))?
        .map_err(SessionError::from)
}
