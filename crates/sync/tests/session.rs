use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use lopdf::{Dictionary, Document, Object};
use pdf_annotator_core::{
    Annotation, AnnotationKind, AnnotationStyle, AnnotationVariant, CancellationToken, DocumentId,
    EngineConfig, PageCoordinate, PageSize, PageSnapshot, PointerEvent, PointerPhase, Tool, ViewState,
};
use pdf_annotator_storage::{
    AnnotationRepository, DocumentRecord, PersistenceError, PersistenceResult, SqliteRepository,
};
use pdf_annotator_sync::{DocumentSession, SessionError, SyncState};
use pdf_engine::{blank_pdf, ExportError};
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn pt(x: f64, y: f64) -> PageCoordinate {
    PageCoordinate::new(x, y)
}

fn write_pdf(dir: &TempDir, name: &str, pages: usize) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, blank_pdf(&vec![PageSize::letter(); pages])).unwrap();
    path
}

async fn sqlite(dir: &TempDir) -> Arc<SqliteRepository> {
    Arc::new(SqliteRepository::open(&dir.path().join("annotations.sqlite3"), 2).await.unwrap())
}

fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.persistence.retry_attempts = 1;
    config
}

async fn open_session(repository: Arc<dyn AnnotationRepository>, pdf: &Path) -> DocumentSession {
    let mut session = DocumentSession::new(repository, config());
    session.open(pdf).await.unwrap();
    assert_eq!(session.state(), SyncState::Ready);
    session
}

/// Raw `/Annots` entries of a page in a written file
fn annots(path: &Path, page_index: u32) -> Vec<Dictionary> {
    let doc = Document::load(path).unwrap();
    let page_id = doc.get_pages()[&(page_index + 1)];
    let page = doc.get_dictionary(page_id).unwrap();
    let Ok(entries) = page.get(b"Annots") else {
        return Vec::new();
    };
    let entries = match entries {
        Object::Reference(id) => doc.get_object(*id).unwrap().as_array().unwrap().clone(),
        other => other.as_array().unwrap().clone(),
    };
    entries
        .iter()
        .map(|entry| match entry {
            Object::Reference(id) => doc.get_dictionary(*id).unwrap().clone(),
            other => other.as_dict().unwrap().clone(),
        })
        .collect()
}

fn subtype(dict: &Dictionary) -> String {
    String::from_utf8_lossy(dict.get(b"Subtype").unwrap().as_name().unwrap()).into_owned()
}

/// Delegates to SQLite but fails writes while `failing` is set
struct FlakyRepository {
    inner: Arc<SqliteRepository>,
    failing: AtomicBool,
}

#[async_trait]
impl AnnotationRepository for FlakyRepository {
    async fn write_page(&self, snapshot: &PageSnapshot) -> PersistenceResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PersistenceError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk unplugged")));
        }
        self.inner.write_page(snapshot).await
    }

    async fn load_document(&self, document_id: &DocumentId) -> PersistenceResult<BTreeMap<u32, Vec<Annotation>>> {
        self.inner.load_document(document_id).await
    }

    async fn record_document(&self, record: &DocumentRecord) -> PersistenceResult<()> {
        self.inner.record_document(record).await
    }

    async fn recent_documents(&self, limit: u32) -> PersistenceResult<Vec<DocumentRecord>> {
        self.inner.recent_documents(limit).await
    }
}

#[tokio::test]
async fn test_flushed_annotations_survive_reopen() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let pdf = write_pdf(&dir, "doc.pdf", 2);
    let repository = sqlite(&dir).await;

    let mut session = open_session(repository.clone(), &pdf).await;
    let id = session
        .store_mut()
        .unwrap()
        .create(1, AnnotationVariant::highlight(pt(10.0, 10.0), pt(50.0, 10.0)), AnnotationStyle::highlighter())
        .unwrap();
    assert!(session.flush(1).await.unwrap());
    assert!(!session.store().unwrap().has_dirty_pages());
    session.close().await.unwrap();

    let session = open_session(repository.clone(), &pdf).await;
    let store = session.store().unwrap();
    let listed: Vec<_> = store.list_for_page(1).map(Annotation::id).collect();
    assert_eq!(listed, vec![id]);
    assert!(!store.has_dirty_pages());

    let recent = repository.recent_documents(10).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].page_count, 2);
    assert_eq!(recent[0].path.as_deref(), Some(pdf.as_path()));
}

#[tokio::test]
async fn test_export_skips_soft_deleted_note() {
    let dir = tempfile::tempdir().unwrap();
    let pdf = write_pdf(&dir, "doc.pdf", 1);
    let mut session = open_session(sqlite(&dir).await, &pdf).await;

    let store = session.store_mut().unwrap();
    let note = store
        .create(0, AnnotationVariant::text_note(pt(72.0, 700.0), "draft"), AnnotationStyle::note())
        .unwrap();
    store
        .create(0, AnnotationVariant::rectangle(pt(100.0, 100.0), pt(200.0, 150.0)), AnnotationStyle::pen())
        .unwrap();
    store.soft_delete(note).unwrap();

    let destination = dir.path().join("out.pdf");
    let report = session.export(&destination).await.unwrap();
    assert_eq!(report.written, 1);
    assert_eq!(report.pages, vec![0]);
    assert!(!report.unsaved_changes);
    assert_eq!(session.state(), SyncState::Ready);

    let dicts = annots(&destination, 0);
    assert_eq!(dicts.len(), 1);
    assert_eq!(subtype(&dicts[0]), "Square");
    // The source document is untouched
    assert!(annots(&pdf, 0).is_empty());
}

#[tokio::test]
async fn test_cancelled_export_leaves_no_file() {
    let dir = tempfile::tempdir().unwrap();
    let pdf = write_pdf(&dir, "doc.pdf", 3);
    let mut session = open_session(sqlite(&dir).await, &pdf).await;
    session
        .store_mut()
        .unwrap()
        .create(2, AnnotationVariant::rectangle(pt(10.0, 10.0), pt(40.0, 40.0)), AnnotationStyle::pen())
        .unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let destination = dir.path().join("out.pdf");
    let handle = session.begin_export_with(&destination, cancel).unwrap();
    assert!(handle.is_cancelled());
    assert_eq!(session.state(), SyncState::Exporting);

    let error = session.finish_export(handle).await.unwrap_err();
    assert!(matches!(error, SessionError::Export(ExportError::Cancelled)));
    assert_eq!(session.state(), SyncState::Ready);
    assert!(!destination.exists());
    // Only the source PDF and the database files remain
    let stray: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| !name.starts_with("annotations.sqlite3") && name != "doc.pdf")
        .collect();
    assert!(stray.is_empty(), "{stray:?}");
    assert!(session.has_unexported_changes());
}

#[tokio::test]
async fn test_failed_flush_keeps_page_dirty_then_persists_once() {
    let dir = tempfile::tempdir().unwrap();
    let pdf = write_pdf(&dir, "doc.pdf", 1);
    let inner = sqlite(&dir).await;
    let flaky = Arc::new(FlakyRepository { inner: inner.clone(), failing: AtomicBool::new(false) });
    let mut session = open_session(flaky.clone(), &pdf).await;

    flaky.failing.store(true, Ordering::SeqCst);
    let id = session
        .store_mut()
        .unwrap()
        .create(0, AnnotationVariant::underline(pt(10.0, 20.0), pt(90.0, 20.0)), AnnotationStyle::pen())
        .unwrap();
    let error = session.flush(0).await.unwrap_err();
    assert!(matches!(error, SessionError::Persistence(PersistenceError::Io(_))));
    assert!(session.store().unwrap().is_dirty(0));
    assert!(session.store().unwrap().get(id).is_some());

    flaky.failing.store(false, Ordering::SeqCst);
    assert!(session.flush(0).await.unwrap());
    assert!(session.flush(0).await.unwrap());

    let document_id = session.store().unwrap().document_id().clone();
    let stored = inner.load_document(&document_id).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[&0].len(), 1);
    assert_eq!(&stored[&0][0], session.store().unwrap().get(id).unwrap());
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_background_flush_failure_reported_by_poll() {
    let dir = tempfile::tempdir().unwrap();
    let pdf = write_pdf(&dir, "doc.pdf", 2);
    let flaky = Arc::new(FlakyRepository { inner: sqlite(&dir).await, failing: AtomicBool::new(true) });
    let mut session = open_session(flaky.clone(), &pdf).await;

    session
        .store_mut()
        .unwrap()
        .create(0, AnnotationVariant::rectangle(pt(0.0, 0.0), pt(20.0, 20.0)), AnnotationStyle::pen())
        .unwrap();
    assert!(session.request_flush(0).unwrap());

    let mut failures = Vec::new();
    for _ in 0..200 {
        failures = session.poll_flushes();
        if !failures.is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].page_index, 0);
    assert!(session.store().unwrap().is_dirty(0));

    flaky.failing.store(false, Ordering::SeqCst);
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_edits_during_export_are_flagged() {
    let dir = tempfile::tempdir().unwrap();
    let pdf = write_pdf(&dir, "doc.pdf", 1);
    let mut session = open_session(sqlite(&dir).await, &pdf).await;
    session
        .store_mut()
        .unwrap()
        .create(0, AnnotationVariant::rectangle(pt(10.0, 10.0), pt(60.0, 60.0)), AnnotationStyle::pen())
        .unwrap();

    let destination = dir.path().join("out.pdf");
    let handle = session.begin_export(&destination).unwrap();
    session
        .store_mut()
        .unwrap()
        .create(0, AnnotationVariant::text_note(pt(300.0, 300.0), "late"), AnnotationStyle::note())
        .unwrap();

    let report = session.finish_export(handle).await.unwrap();
    assert!(report.unsaved_changes);
    assert_eq!(report.written, 1);
    assert!(session.has_unexported_changes());

    let report = session.export(&destination).await.unwrap();
    assert!(!report.unsaved_changes);
    assert_eq!(report.written, 2);
    assert!(!session.has_unexported_changes());
    assert_eq!(annots(&destination, 0).len(), 2);
}

#[tokio::test]
async fn test_confirm_export_purges_retired_tombstones() {
    let dir = tempfile::tempdir().unwrap();
    let pdf = write_pdf(&dir, "doc.pdf", 1);
    let repository = sqlite(&dir).await;
    let mut session = open_session(repository.clone(), &pdf).await;

    let store = session.store_mut().unwrap();
    let kept = store
        .create(0, AnnotationVariant::rectangle(pt(10.0, 10.0), pt(60.0, 60.0)), AnnotationStyle::pen())
        .unwrap();
    let removed = store
        .create(0, AnnotationVariant::freehand(vec![pt(0.0, 0.0), pt(5.0, 5.0), pt(9.0, 2.0)]), AnnotationStyle::pen())
        .unwrap();
    store.soft_delete(removed).unwrap();
    session.flush_all().await.unwrap();

    let report = session.export(dir.path().join("out.pdf")).await.unwrap();
    assert!(report.retired.contains(&removed));

    let purged = session.confirm_export(&report).unwrap();
    assert_eq!(purged, vec![removed]);
    let store = session.store().unwrap();
    assert!(store.get(removed).is_none());
    assert!(store.get(kept).is_some());
    assert!(!store.can_undo());
    assert!(!session.has_unexported_changes());

    session.close().await.unwrap();
    let document_id = DocumentId::new(pdf_engine::content_hash(&std::fs::read(&pdf).unwrap()));
    let stored = repository.load_document(&document_id).await.unwrap();
    let ids: Vec<_> = stored[&0].iter().map(Annotation::id).collect();
    assert_eq!(ids, vec![kept]);
}

#[tokio::test]
async fn test_export_failure_enters_error_and_retry_recovers() {
    let dir = tempfile::tempdir().unwrap();
    let pdf = write_pdf(&dir, "doc.pdf", 1);
    let mut session = open_session(sqlite(&dir).await, &pdf).await;
    let id = session
        .store_mut()
        .unwrap()
        .create(0, AnnotationVariant::rectangle(pt(10.0, 10.0), pt(60.0, 60.0)), AnnotationStyle::pen())
        .unwrap();

    let error = session.export(dir.path().join("missing").join("out.pdf")).await.unwrap_err();
    assert!(matches!(error, SessionError::Io(_)));
    assert_eq!(session.state(), SyncState::Error);
    assert!(session.store().unwrap().get(id).is_some());

    let destination = dir.path().join("out.pdf");
    let report = session.export(&destination).await.unwrap();
    assert_eq!(report.written, 1);
    assert_eq!(session.state(), SyncState::Ready);
}

#[tokio::test]
async fn test_load_failure_then_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = DocumentSession::new(sqlite(&dir).await, config());

    let error = session.begin_export(dir.path().join("out.pdf")).unwrap_err();
    assert!(matches!(error, SessionError::NotReady(SyncState::Idle)));

    let error = session.open(b"not a pdf".to_vec()).await.unwrap_err();
    assert!(matches!(error, SessionError::Pdf(_)));
    assert_eq!(session.state(), SyncState::Error);
    assert!(session.store().is_err());
    assert!(session.begin_export(dir.path().join("out.pdf")).unwrap_err().is_rejected());

    let pdf = write_pdf(&dir, "doc.pdf", 1);
    session.open(pdf.as_path()).await.unwrap();
    assert_eq!(session.state(), SyncState::Ready);

    let error = session.open(pdf.as_path()).await.unwrap_err();
    assert!(matches!(error, SessionError::InvalidTransition { from: SyncState::Ready, .. }));
}

#[tokio::test]
async fn test_leaving_a_page_flushes_it() {
    let dir = tempfile::tempdir().unwrap();
    let pdf = write_pdf(&dir, "doc.pdf", 2);
    let repository = sqlite(&dir).await;
    let mut session = open_session(repository.clone(), &pdf).await;

    session.on_view_changed(&ViewState::new(0, PageSize::letter())).unwrap();
    session
        .store_mut()
        .unwrap()
        .create(0, AnnotationVariant::rectangle(pt(10.0, 10.0), pt(60.0, 60.0)), AnnotationStyle::pen())
        .unwrap();
    session.on_view_changed(&ViewState::new(0, PageSize::letter()).with_zoom(2.0)).unwrap();
    session.on_view_changed(&ViewState::new(1, PageSize::letter())).unwrap();

    for _ in 0..200 {
        if !session.store().unwrap().is_dirty(0) {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(session.poll_flushes().is_empty());
    }
    assert!(!session.store().unwrap().is_dirty(0));

    let document_id = session.store().unwrap().document_id().clone();
    assert_eq!(repository.load_document(&document_id).await.unwrap()[&0].len(), 1);
}

#[tokio::test]
async fn test_reload_reports_orphans_and_keeps_annotations() {
    let dir = tempfile::tempdir().unwrap();
    let pdf = write_pdf(&dir, "doc.pdf", 3);
    let mut session = open_session(sqlite(&dir).await, &pdf).await;
    let document_id = session.store().unwrap().document_id().clone();
    let id = session
        .store_mut()
        .unwrap()
        .create(2, AnnotationVariant::rectangle(pt(10.0, 10.0), pt(60.0, 60.0)), AnnotationStyle::pen())
        .unwrap();

    std::fs::write(&pdf, blank_pdf(&[PageSize::letter()])).unwrap();
    let report = session.reload_document().await.unwrap();
    assert_eq!(report.page_count, 1);
    assert_eq!(report.orphaned_pages, vec![2]);
    assert_eq!(session.state(), SyncState::Ready);
    assert_eq!(session.info().unwrap().id, document_id);
    assert!(session.store().unwrap().get(id).is_some());

    // Orphans cannot be written into the shorter document
    let error = session.export(dir.path().join("out.pdf")).await.unwrap_err();
    let SessionError::Export(export) = &error else {
        panic!("unexpected error: {error}");
    };
    assert_eq!(export.failed_pages().len(), 1);
    assert_eq!(export.failed_pages()[0].page_index, 2);
    assert_eq!(session.state(), SyncState::Error);

    std::fs::write(&pdf, blank_pdf(&vec![PageSize::letter(); 3])).unwrap();
    let report = session.reload_document().await.unwrap();
    assert!(report.orphaned_pages.is_empty());
    assert_eq!(session.state(), SyncState::Ready);
}

#[tokio::test]
async fn test_pointer_stroke_is_persisted_on_close() {
    let dir = tempfile::tempdir().unwrap();
    let pdf = write_pdf(&dir, "doc.pdf", 1);
    let repository = sqlite(&dir).await;
    let mut session = open_session(repository.clone(), &pdf).await;
    session.router_mut().set_tool(Tool::Annotate(AnnotationKind::FreehandStroke));

    let view = ViewState::new(0, PageSize::letter());
    let events = [
        PointerEvent::new(1, PointerPhase::Down, 100.0, 100.0, 0),
        PointerEvent::new(1, PointerPhase::Move, 130.0, 110.0, 40),
        PointerEvent::new(1, PointerPhase::Move, 170.0, 120.0, 80),
        PointerEvent::new(1, PointerPhase::Up, 170.0, 120.0, 120),
    ];
    for event in events {
        session.handle_pointer(event, &view).unwrap();
    }
    let store = session.store().unwrap();
    let strokes: Vec<_> = store.list_active_for_page(0).map(Annotation::id).collect();
    assert_eq!(strokes.len(), 1);
    assert!(!store.can_redo());
    session.close().await.unwrap();

    let session = open_session(repository, &pdf).await;
    let reloaded: Vec<_> = session.store().unwrap().list_active_for_page(0).map(Annotation::id).collect();
    assert_eq!(reloaded, strokes);
}

#[tokio::test]
async fn test_close_ends_open_gesture_group() {
    let dir = tempfile::tempdir().unwrap();
    let pdf = write_pdf(&dir, "doc.pdf", 1);
    let repository = sqlite(&dir).await;
    let mut session = open_session(repository.clone(), &pdf).await;

    let store = session.store_mut().unwrap();
    assert!(store.begin_gesture());
    store
        .create(0, AnnotationVariant::rectangle(pt(10.0, 10.0), pt(60.0, 60.0)), AnnotationStyle::pen())
        .unwrap();
    session.close().await.unwrap();

    let session = open_session(repository, &pdf).await;
    assert_eq!(session.store().unwrap().len(), 1);
}

#[tokio::test]
async fn test_sessions_are_independent() {
    let dir = tempfile::tempdir().unwrap();
    let first_pdf = write_pdf(&dir, "one.pdf", 1);
    let second_pdf = write_pdf(&dir, "two.pdf", 2);
    let repository = sqlite(&dir).await;

    let mut first = open_session(repository.clone(), &first_pdf).await;
    let mut second = open_session(repository.clone(), &second_pdf).await;
    assert_ne!(first.info().unwrap().id, second.info().unwrap().id);

    first
        .store_mut()
        .unwrap()
        .create(0, AnnotationVariant::rectangle(pt(10.0, 10.0), pt(60.0, 60.0)), AnnotationStyle::pen())
        .unwrap();
    let _handle = first.begin_export(dir.path().join("one-out.pdf")).unwrap();
    assert_eq!(first.state(), SyncState::Exporting);
    assert_eq!(second.state(), SyncState::Ready);
    assert!(second.store().unwrap().is_empty());

    second.export(dir.path().join("two-out.pdf")).await.unwrap();
    assert_eq!(repository.recent_documents(10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_dropped_export_handle_does_not_block_next_export() {
    let dir = tempfile::tempdir().unwrap();
    let pdf = write_pdf(&dir, "doc.pdf", 1);
    let mut session = open_session(sqlite(&dir).await, &pdf).await;
    session
        .store_mut()
        .unwrap()
        .create(0, AnnotationVariant::rectangle(pt(10.0, 10.0), pt(60.0, 60.0)), AnnotationStyle::pen())
        .unwrap();

    let handle = session.begin_export(dir.path().join("abandoned.pdf")).unwrap();
    assert_eq!(session.state(), SyncState::Exporting);
    drop(handle);

    let destination = dir.path().join("out.pdf");
    let report = session.export(&destination).await.unwrap();
    assert_eq!(report.written, 1);
    assert_eq!(session.state(), SyncState::Ready);
    assert_eq!(annots(&destination, 0).len(), 1);
}

#[tokio::test]
async fn test_abort_export_returns_to_ready() {
    let dir = tempfile::tempdir().unwrap();
    let pdf = write_pdf(&dir, "doc.pdf", 1);
    let mut session = open_session(sqlite(&dir).await, &pdf).await;
    session
        .store_mut()
        .unwrap()
        .create(0, AnnotationVariant::rectangle(pt(10.0, 10.0), pt(60.0, 60.0)), AnnotationStyle::pen())
        .unwrap();

    let destination = dir.path().join("out.pdf");
    let handle = session.begin_export(&destination).unwrap();
    // The export may finish before it sees the cancellation
    match session.abort_export(handle).await.unwrap() {
        Some(report) => assert!(report.destination.exists()),
        None => assert!(!destination.exists()),
    }
    assert_eq!(session.state(), SyncState::Ready);
    session.export(&destination).await.unwrap();
}

#[tokio::test]
async fn test_open_adopts_annotations_already_in_the_pdf() {
    let dir = tempfile::tempdir().unwrap();
    let pdf = write_pdf(&dir, "doc.pdf", 1);
    let mut author = open_session(sqlite(&dir).await, &pdf).await;
    let store = author.store_mut().unwrap();
    let note = store
        .create(0, AnnotationVariant::text_note(pt(72.0, 700.0), "from the file"), AnnotationStyle::note())
        .unwrap();
    let square = store
        .create(0, AnnotationVariant::rectangle(pt(100.0, 100.0), pt(200.0, 150.0)), AnnotationStyle::pen())
        .unwrap();
    let exported = dir.path().join("exported.pdf");
    author.export(&exported).await.unwrap();
    author.close().await.unwrap();

    // A different database has never seen these annotations
    let other = tempfile::tempdir().unwrap();
    let repository = sqlite(&other).await;
    let mut reader = open_session(repository.clone(), &exported).await;
    let report = reader.last_import().unwrap().clone();
    assert_eq!(report.stats.imported, 2);
    assert_eq!(report.adopted, vec![note, square]);
    let store = reader.store().unwrap();
    assert_eq!(store.get(note).unwrap().text(), Some("from the file"));
    assert!(!store.can_undo());

    let notes = reader.notes().await.unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].contents, "from the file");

    // Explicit imports skip what is already known
    assert!(reader.import_existing().await.unwrap().adopted.is_empty());
    reader.close().await.unwrap();

    let reader = open_session(repository, &exported).await;
    assert!(reader.last_import().unwrap().adopted.is_empty());
    assert_eq!(reader.store().unwrap().len(), 2);
    assert!(!reader.store().unwrap().has_dirty_pages());
}

#[tokio::test]
async fn test_reload_adopts_annotations_added_to_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let pdf = write_pdf(&dir, "doc.pdf", 2);
    let mut session = open_session(sqlite(&dir).await, &pdf).await;
    let document_id = session.store().unwrap().document_id().clone();

    // Another tool adds a rectangle to page 2
    let foreign = Annotation::new(
        DocumentId::new("elsewhere"),
        1,
        AnnotationVariant::rectangle(pt(20.0, 20.0), pt(80.0, 80.0)),
        AnnotationStyle::pen(),
    );
    let mut snapshot = pdf_engine::ExportSnapshot::default();
    snapshot.annotations.insert(1, vec![foreign.clone()]);
    let outcome = pdf_engine::write_annotations(
        &std::fs::read(&pdf).unwrap(),
        &snapshot,
        &pdf_engine::ExportOptions::default(),
        &CancellationToken::new(),
    )
    .unwrap();
    std::fs::write(&pdf, outcome.bytes).unwrap();

    let report = session.reload_document().await.unwrap();
    assert_eq!(report.imported, vec![foreign.id()]);
    let adopted = session.store().unwrap().get(foreign.id()).unwrap();
    assert_eq!(adopted.document_id(), &document_id);
    assert_eq!(adopted.page_index(), 1);
    assert!(session.flush(1).await.unwrap());
}
