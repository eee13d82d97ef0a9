//! In-memory annotation store
//!
//! The single source of truth for a document's annotations. Mutations are
//! synchronous, recorded in the undo log and tracked per page so the
//! persistence layer can flush exactly what changed.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, trace};

use crate::annotation::{
    Annotation, AnnotationId, AnnotationStyle, AnnotationVariant, Color, DocumentId,
    PageCoordinate,
};
use crate::error::{StoreError, StoreResult};
use crate::history::{UndoEntry, UndoGroup, UndoLog, DEFAULT_UNDO_LIMIT};

/// Edit applied by [`AnnotationStore::update`]
#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationPatch {
    /// Extend a stroke with captured points
    AppendPoints(Vec<PageCoordinate>),
    /// Move by an offset in points
    Translate { dx: f64, dy: f64 },
    /// Resize relative to a fixed anchor
    Scale { anchor: PageCoordinate, sx: f64, sy: f64 },
    /// Replace the geometry with a payload of the same kind
    SetGeometry(AnnotationVariant),
    SetColor(Color),
    SetStrokeWidth(f64),
    SetOpacity(f64),
    /// Text notes only
    SetText(String),
}

/// Changes of one page captured for a flush
#[derive(Debug, Clone, PartialEq)]
pub struct PageSnapshot {
    pub document_id: DocumentId,
    pub page_index: u32,
    /// Store revision at capture time
    pub revision: u64,
    /// Records to insert or overwrite, tombstones included
    pub upserts: Vec<Annotation>,
    /// Hard-deleted or purged ids
    pub removals: Vec<AnnotationId>,
    /// Every id on the page, tombstones included, in list order
    pub order: Vec<AnnotationId>,
}

impl PageSnapshot {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.removals.is_empty()
    }
}

#[derive(Debug, Default)]
struct DirtyPage {
    revision: u64,
    touched: BTreeSet<AnnotationId>,
}

pub struct AnnotationStore {
    document_id: DocumentId,
    annotations: HashMap<AnnotationId, Annotation>,
    /// Insertion order per page
    by_page: BTreeMap<u32, Vec<AnnotationId>>,
    history: UndoLog,
    dirty: BTreeMap<u32, DirtyPage>,
    revision: u64,
    default_author: Option<String>,
}

impl AnnotationStore {
    pub fn new(document_id: DocumentId) -> Self {
        Self {
            document_id,
            annotations: HashMap::new(),
            by_page: BTreeMap::new(),
            history: UndoLog::new(DEFAULT_UNDO_LIMIT),
            dirty: BTreeMap::new(),
            revision: 0,
            default_author: None,
        }
    }

    /// Rebuild a store from persisted annotations; nothing starts dirty.
    pub fn from_loaded(document_id: DocumentId, pages: BTreeMap<u32, Vec<Annotation>>) -> Self {
        let mut store = Self::new(document_id);
        for annotation in pages.into_values().flatten() {
            store.insert(annotation);
        }
        debug!(
            document = %store.document_id,
            annotations = store.annotations.len(),
            "annotation store loaded"
        );
        store
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history = UndoLog::new(limit);
        self
    }

    /// Author stamped on annotations created from now on
    pub fn with_default_author(mut self, author: Option<String>) -> Self {
        self.default_author = author;
        self
    }

    pub fn document_id(&self) -> &DocumentId {
        &self.document_id
    }

    /// Monotonic counter bumped by every mutation
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn get(&self, id: AnnotationId) -> Option<&Annotation> {
        self.annotations.get(&id)
    }

    /// Number of annotations, tombstones included
    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    /// Pages that hold at least one annotation
    pub fn pages(&self) -> impl Iterator<Item = u32> + '_ {
        self.by_page.keys().copied()
    }

    /// Annotations of a page in insertion order, soft-deleted ones included
    pub fn list_for_page(&self, page_index: u32) -> impl Iterator<Item = &Annotation> + '_ {
        self.by_page
            .get(&page_index)
            .into_iter()
            .flatten()
            .filter_map(|id| self.annotations.get(id))
    }

    pub fn list_active_for_page(&self, page_index: u32) -> impl Iterator<Item = &Annotation> + '_ {
        self.list_for_page(page_index).filter(|annotation| !annotation.is_deleted())
    }

    /// Annotations under a page point, topmost first
    pub fn hit_test(&self, page_index: u32, point: &PageCoordinate, tolerance: f64) -> Vec<&Annotation> {
        let mut hits: Vec<&Annotation> = self
            .list_for_page(page_index)
            .filter(|annotation| annotation.hit_test(point, tolerance))
            .collect();
        hits.reverse();
        hits
    }

    pub fn create(
        &mut self,
        page_index: u32,
        variant: AnnotationVariant,
        style: AnnotationStyle,
    ) -> StoreResult<AnnotationId> {
        variant.validate()?;
        validate_style(&variant, &style)?;

        let annotation = Annotation::new(self.document_id.clone(), page_index, variant, style)
            .with_author(self.default_author.clone());
        let id = annotation.id();
        debug!(%id, page = page_index, kind = %annotation.kind(), "annotation created");

        self.record(id, page_index, None, Some(annotation.clone()));
        self.insert(annotation);
        self.mark_dirty(page_index, id);
        Ok(id)
    }

    /// Take in an annotation built elsewhere, keeping its id and timestamps
    ///
    /// Like loaded annotations, adopted ones are not undoable, but their page
    /// is marked dirty. `Ok(false)` if the id is already present, live or
    /// deleted.
    pub fn adopt(&mut self, annotation: Annotation) -> StoreResult<bool> {
        let id = annotation.id();
        if annotation.document_id() != &self.document_id {
            return Err(StoreError::ForeignDocument(id));
        }
        if self.annotations.contains_key(&id) {
            return Ok(false);
        }
        annotation.variant().validate()?;
        validate_style(annotation.variant(), annotation.style())?;

        let page_index = annotation.page_index();
        trace!(%id, page = page_index, kind = %annotation.kind(), "annotation adopted");
        self.insert(annotation);
        self.mark_dirty(page_index, id);
        Ok(true)
    }

    pub fn update(&mut self, id: AnnotationId, patch: AnnotationPatch) -> StoreResult<()> {
        let before = self.annotations.get(&id).ok_or(StoreError::NotFound(id))?;
        let mut after = before.clone();
        apply_patch(&mut after, patch)?;
        after.touch();

        let before = before.clone();
        let page_index = after.page_index();
        trace!(%id, page = page_index, "annotation updated");

        self.record(id, page_index, Some(before), Some(after.clone()));
        self.annotations.insert(id, after);
        self.mark_dirty(page_index, id);
        Ok(())
    }

    /// Mark an annotation deleted; `Ok(false)` if it already was.
    pub fn soft_delete(&mut self, id: AnnotationId) -> StoreResult<bool> {
        self.set_deleted(id, true)
    }

    /// Undo a soft delete; `Ok(false)` if the annotation was not deleted.
    pub fn restore(&mut self, id: AnnotationId) -> StoreResult<bool> {
        self.set_deleted(id, false)
    }

    fn set_deleted(&mut self, id: AnnotationId, deleted: bool) -> StoreResult<bool> {
        let current = self.annotations.get(&id).ok_or(StoreError::NotFound(id))?;
        if current.is_deleted() == deleted {
            return Ok(false);
        }
        let before = current.clone();
        let mut after = before.clone();
        after.set_deleted(deleted);
        after.touch();

        let page_index = after.page_index();
        debug!(%id, page = page_index, deleted, "annotation delete flag changed");

        self.record(id, page_index, Some(before), Some(after.clone()));
        self.annotations.insert(id, after);
        self.mark_dirty(page_index, id);
        Ok(true)
    }

    /// Start a gesture group; mutations until [`end_gesture`](Self::end_gesture)
    /// undo as one step.
    pub fn begin_gesture(&mut self) -> bool {
        self.history.begin_group()
    }

    pub fn end_gesture(&mut self) -> bool {
        self.history.end_group()
    }

    pub fn in_gesture(&self) -> bool {
        self.history.has_open_group()
    }

    /// Revert everything the open gesture did and forget it
    ///
    /// Annotations created inside the gesture are removed outright, no
    /// tombstone is left behind.
    pub fn discard_gesture(&mut self) -> bool {
        let Some(group) = self.history.discard_open_group() else {
            return false;
        };
        debug!(entries = group.entries().len(), "gesture discarded");
        self.revert(&group);
        true
    }

    /// Revert the most recent group; `false` when there is nothing to undo.
    pub fn undo(&mut self) -> bool {
        self.history.end_group();
        match self.history.undo() {
            Some(group) => {
                self.revert(&group);
                true
            }
            None => false,
        }
    }

    /// Re-apply the next group; `false` when there is nothing to redo.
    pub fn redo(&mut self) -> bool {
        self.history.end_group();
        match self.history.redo() {
            Some(group) => {
                for entry in group.entries() {
                    self.apply_state(entry.id, entry.page_index, entry.after.clone());
                }
                true
            }
            None => false,
        }
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    /// Physically remove tombstones, for one page or all of them
    ///
    /// Purged ids can no longer be resurrected, so the undo log is cleared.
    pub fn purge_deleted(&mut self, page_index: Option<u32>) -> Vec<AnnotationId> {
        let purged: Vec<(AnnotationId, u32)> = self
            .annotations
            .values()
            .filter(|annotation| annotation.is_deleted())
            .filter(|annotation| page_index.map_or(true, |page| annotation.page_index() == page))
            .map(|annotation| (annotation.id(), annotation.page_index()))
            .collect();

        if purged.is_empty() {
            return Vec::new();
        }
        for (id, page) in &purged {
            self.remove(*id);
            self.mark_dirty(*page, *id);
        }
        self.history.clear();
        debug!(count = purged.len(), ?page_index, "tombstones purged");
        purged.into_iter().map(|(id, _)| id).collect()
    }

    /// Physically remove the listed ids that are still tombstones
    ///
    /// Ids that were restored or never existed are skipped. Clears the undo
    /// log when anything was removed.
    pub fn purge_tombstones(&mut self, ids: impl IntoIterator<Item = AnnotationId>) -> Vec<AnnotationId> {
        let mut purged = Vec::new();
        for id in ids {
            let page = match self.annotations.get(&id) {
                Some(annotation) if annotation.is_deleted() => annotation.page_index(),
                _ => continue,
            };
            self.remove(id);
            self.mark_dirty(page, id);
            purged.push(id);
        }
        if !purged.is_empty() {
            self.history.clear();
            debug!(count = purged.len(), "retired tombstones purged");
        }
        purged
    }

    /// Pages with changes not yet flushed
    pub fn dirty_pages(&self) -> Vec<u32> {
        self.dirty.keys().copied().collect()
    }

    pub fn is_dirty(&self, page_index: u32) -> bool {
        self.dirty.contains_key(&page_index)
    }

    pub fn has_dirty_pages(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Capture the pending changes of a page without clearing them
    pub fn flush_snapshot(&self, page_index: u32) -> Option<PageSnapshot> {
        let dirty = self.dirty.get(&page_index)?;
        let upserts = self
            .list_for_page(page_index)
            .filter(|annotation| dirty.touched.contains(&annotation.id()))
            .cloned()
            .collect();
        let removals = dirty
            .touched
            .iter()
            .filter(|id| !self.annotations.contains_key(id))
            .copied()
            .collect();
        let order = self.by_page.get(&page_index).cloned().unwrap_or_default();
        Some(PageSnapshot {
            document_id: self.document_id.clone(),
            page_index,
            revision: dirty.revision,
            upserts,
            removals,
            order,
        })
    }

    /// Clear a page's dirty state after its snapshot was written
    ///
    /// Returns `false` and keeps the page dirty if it changed since the
    /// snapshot was taken.
    pub fn mark_flushed(&mut self, snapshot: &PageSnapshot) -> bool {
        match self.dirty.get(&snapshot.page_index) {
            Some(dirty) if dirty.revision == snapshot.revision => {
                self.dirty.remove(&snapshot.page_index);
                trace!(page = snapshot.page_index, revision = snapshot.revision, "page clean");
                true
            }
            Some(_) => false,
            None => true,
        }
    }

    /// Copy of every non-deleted annotation, grouped by page
    pub fn snapshot_active(&self) -> BTreeMap<u32, Vec<Annotation>> {
        self.by_page
            .keys()
            .map(|page| (*page, self.list_active_for_page(*page).cloned().collect::<Vec<_>>()))
            .filter(|(_, annotations)| !annotations.is_empty())
            .collect()
    }

    fn record(
        &mut self,
        id: AnnotationId,
        page_index: u32,
        before: Option<Annotation>,
        after: Option<Annotation>,
    ) {
        self.history.record(UndoEntry { id, page_index, before, after });
    }

    fn revert(&mut self, group: &UndoGroup) {
        for entry in group.entries().iter().rev() {
            self.apply_state(entry.id, entry.page_index, entry.before.clone());
        }
    }

    fn apply_state(&mut self, id: AnnotationId, page_index: u32, state: Option<Annotation>) {
        match state {
            Some(annotation) => {
                if self.annotations.contains_key(&id) {
                    self.annotations.insert(id, annotation);
                } else {
                    self.insert(annotation);
                }
            }
            None => {
                self.remove(id);
            }
        }
        self.mark_dirty(page_index, id);
    }

    fn insert(&mut self, annotation: Annotation) {
        let id = annotation.id();
        self.by_page.entry(annotation.page_index()).or_default().push(id);
        self.annotations.insert(id, annotation);
    }

    fn remove(&mut self, id: AnnotationId) -> Option<Annotation> {
        let annotation = self.annotations.remove(&id)?;
        if let Some(ids) = self.by_page.get_mut(&annotation.page_index()) {
            ids.retain(|existing| *existing != id);
            if ids.is_empty() {
                self.by_page.remove(&annotation.page_index());
            }
        }
        Some(annotation)
    }

    fn mark_dirty(&mut self, page_index: u32, id: AnnotationId) {
        self.revision += 1;
        let dirty = self.dirty.entry(page_index).or_default();
        dirty.revision = self.revision;
        dirty.touched.insert(id);
    }
}

fn validate_style(variant: &AnnotationVariant, style: &AnnotationStyle) -> StoreResult<()> {
    if !style.stroke_width.is_finite() || style.stroke_width < 0.0 {
        return Err(StoreError::invalid_geometry(variant.kind(), "stroke width must be a finite, non-negative number"));
    }
    if !style.opacity.is_finite() {
        return Err(StoreError::invalid_geometry(variant.kind(), "opacity must be finite"));
    }
    Ok(())
}

fn apply_patch(annotation: &mut Annotation, patch: AnnotationPatch) -> StoreResult<()> {
    let kind = annotation.kind();
    match patch {
        AnnotationPatch::AppendPoints(points) => {
            if points.iter().any(|point| !point.is_finite()) {
                return Err(StoreError::invalid_geometry(kind, "non-finite coordinate"));
            }
            annotation.variant_mut().append_points(&points)?;
        }
        AnnotationPatch::Translate { dx, dy } => {
            if !dx.is_finite() || !dy.is_finite() {
                return Err(StoreError::invalid_geometry(kind, "non-finite offset"));
            }
            annotation.variant_mut().translate(dx, dy);
        }
        AnnotationPatch::Scale { anchor, sx, sy } => {
            if !anchor.is_finite() || !sx.is_finite() || !sy.is_finite() {
                return Err(StoreError::invalid_geometry(kind, "non-finite scale"));
            }
            annotation.variant_mut().scale_about(anchor, sx, sy);
        }
        AnnotationPatch::SetGeometry(variant) => {
            if variant.kind() != kind {
                return Err(StoreError::invalid_geometry(
                    kind,
                    format!("cannot change kind to {}", variant.kind()),
                ));
            }
            variant.validate()?;
            *annotation.variant_mut() = variant;
        }
        AnnotationPatch::SetColor(color) => annotation.style_mut().color = color,
        AnnotationPatch::SetStrokeWidth(width) => {
            if !width.is_finite() || width < 0.0 {
                return Err(StoreError::invalid_geometry(kind, "invalid stroke width"));
            }
            annotation.style_mut().stroke_width = width;
        }
        AnnotationPatch::SetOpacity(opacity) => {
            if !opacity.is_finite() {
                return Err(StoreError::invalid_geometry(kind, "opacity must be finite"));
            }
            annotation.style_mut().opacity = opacity.clamp(0.0, 1.0);
        }
        AnnotationPatch::SetText(new_text) => match annotation.variant_mut() {
            AnnotationVariant::TextNote { text, .. } => *text = new_text,
            _ => return Err(StoreError::invalid_geometry(kind, "only text notes carry text")),
        },
    }
    annotation.variant().validate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::AnnotationKind;

    fn store() -> AnnotationStore {
        AnnotationStore::new(DocumentId::new("doc"))
    }

    fn p(x: f64, y: f64) -> PageCoordinate {
        PageCoordinate::new(x, y)
    }

    fn page_ids(store: &AnnotationStore, page: u32) -> Vec<AnnotationId> {
        store.list_for_page(page).map(Annotation::id).collect()
    }

    /// Observable model state: every annotation on every page, in order
    fn model(store: &AnnotationStore) -> Vec<Annotation> {
        store
            .pages()
            .flat_map(|page| store.list_for_page(page).cloned().collect::<Vec<_>>())
            .collect()
    }

    #[test]
    fn test_highlight_create_undo_redo() {
        let mut store = store();
        let id = store
            .create(0, AnnotationVariant::highlight(p(10.0, 10.0), p(50.0, 10.0)), AnnotationStyle::highlighter())
            .unwrap();

        let listed: Vec<&Annotation> = store.list_for_page(0).collect();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].kind(), AnnotationKind::Highlight);
        assert_eq!(listed[0].variant(), &AnnotationVariant::highlight(p(10.0, 10.0), p(50.0, 10.0)));

        assert!(store.undo());
        assert_eq!(store.list_for_page(0).count(), 0);

        assert!(store.redo());
        assert_eq!(page_ids(&store, 0), vec![id]);
    }

    #[test]
    fn test_create_rejects_short_geometry() {
        let mut store = store();
        let result = store.create(
            0,
            AnnotationVariant::Underline { paths: vec![vec![p(1.0, 1.0)]] },
            AnnotationStyle::pen(),
        );
        assert!(matches!(result, Err(StoreError::InvalidGeometry { .. })));
        assert!(store.is_empty());
        assert!(!store.can_undo());
        assert!(!store.has_dirty_pages());
    }

    #[test]
    fn test_update_unknown_id() {
        let mut store = store();
        let id = AnnotationId::new_v4();
        assert_eq!(
            store.update(id, AnnotationPatch::SetColor(Color::RED)),
            Err(StoreError::NotFound(id))
        );
        assert_eq!(store.soft_delete(id), Err(StoreError::NotFound(id)));
    }

    #[test]
    fn test_update_after_hard_delete_is_not_found() {
        let mut store = store();
        let id = store.create(0, AnnotationVariant::freehand(vec![p(1.0, 1.0)]), AnnotationStyle::pen()).unwrap();
        store.undo();
        assert_eq!(
            store.update(id, AnnotationPatch::Translate { dx: 1.0, dy: 1.0 }),
            Err(StoreError::NotFound(id))
        );
    }

    #[test]
    fn test_soft_delete_is_idempotent() {
        let mut store = store();
        let id = store.create(0, AnnotationVariant::rectangle(p(0.0, 0.0), p(10.0, 10.0)), AnnotationStyle::pen()).unwrap();

        assert_eq!(store.soft_delete(id), Ok(true));
        let once = model(&store);
        let revision = store.revision();

        assert_eq!(store.soft_delete(id), Ok(false));
        assert_eq!(model(&store), once);
        assert_eq!(store.revision(), revision);

        // Soft-deleted annotations stay listed unless the caller excludes them
        assert_eq!(store.list_for_page(0).count(), 1);
        assert_eq!(store.list_active_for_page(0).count(), 0);

        assert_eq!(store.restore(id), Ok(true));
        assert_eq!(store.restore(id), Ok(false));
        assert_eq!(store.list_active_for_page(0).count(), 1);

        // create, delete, restore: the no-ops recorded nothing
        assert!(store.undo());
        assert!(store.undo());
        assert!(store.undo());
        assert!(!store.undo());
    }

    #[test]
    fn test_undo_redo_inverse_law() {
        let mut store = store();
        let pre = model(&store);

        let a = store.create(0, AnnotationVariant::highlight(p(10.0, 10.0), p(50.0, 10.0)), AnnotationStyle::highlighter()).unwrap();
        let b = store.create(1, AnnotationVariant::freehand(vec![p(0.0, 0.0), p(5.0, 5.0)]), AnnotationStyle::pen()).unwrap();
        store.update(a, AnnotationPatch::SetColor(Color::GREEN)).unwrap();
        store.update(b, AnnotationPatch::Translate { dx: 3.0, dy: -2.0 }).unwrap();
        store.soft_delete(a).unwrap();
        let c = store.create(0, AnnotationVariant::text_note(p(100.0, 700.0), "hello"), AnnotationStyle::note()).unwrap();
        store.update(c, AnnotationPatch::SetText("edited".into())).unwrap();
        let post = model(&store);

        let steps = 7;
        for _ in 0..steps {
            assert!(store.undo());
        }
        assert_eq!(model(&store), pre);
        assert!(!store.undo());

        for _ in 0..steps {
            assert!(store.redo());
        }
        assert_eq!(model(&store), post);
        assert!(!store.redo());
    }

    #[test]
    fn test_gesture_group_undoes_as_one() {
        let mut store = store();
        store.begin_gesture();
        let id = store.create(0, AnnotationVariant::freehand(vec![p(0.0, 0.0)]), AnnotationStyle::pen()).unwrap();
        for i in 1..5 {
            store.update(id, AnnotationPatch::AppendPoints(vec![p(i as f64, i as f64)])).unwrap();
        }
        store.end_gesture();

        assert_eq!(store.get(id).unwrap().variant().point_count(), 5);
        assert!(store.undo());
        assert!(store.get(id).is_none());
        assert!(!store.undo());
        assert!(store.redo());
        assert_eq!(store.get(id).unwrap().variant().point_count(), 5);
    }

    #[test]
    fn test_discard_gesture_hard_deletes() {
        let mut store = store();
        store.begin_gesture();
        let id = store.create(0, AnnotationVariant::freehand(vec![p(0.0, 0.0)]), AnnotationStyle::pen()).unwrap();
        assert!(store.discard_gesture());

        assert!(store.get(id).is_none());
        assert_eq!(store.list_for_page(0).count(), 0);
        assert!(!store.can_undo());

        // The page stays dirty so a stroke flushed mid-gesture gets removed
        let snapshot = store.flush_snapshot(0).unwrap();
        assert_eq!(snapshot.removals, vec![id]);
        assert!(snapshot.upserts.is_empty());
    }

    #[test]
    fn test_new_mutation_truncates_redo() {
        let mut store = store();
        store.create(0, AnnotationVariant::freehand(vec![p(0.0, 0.0)]), AnnotationStyle::pen()).unwrap();
        store.undo();
        store.create(0, AnnotationVariant::freehand(vec![p(1.0, 1.0)]), AnnotationStyle::pen()).unwrap();
        assert!(!store.can_redo());
        assert!(!store.redo());
    }

    #[test]
    fn test_set_text_only_on_notes() {
        let mut store = store();
        let id = store.create(0, AnnotationVariant::rectangle(p(0.0, 0.0), p(1.0, 1.0)), AnnotationStyle::pen()).unwrap();
        assert!(matches!(
            store.update(id, AnnotationPatch::SetText("x".into())),
            Err(StoreError::InvalidGeometry { .. })
        ));
        assert!(matches!(
            store.update(id, AnnotationPatch::SetGeometry(AnnotationVariant::freehand(vec![p(0.0, 0.0)]))),
            Err(StoreError::InvalidGeometry { .. })
        ));
    }

    #[test]
    fn test_dirty_tracking_and_flush_snapshot() {
        let mut store = store();
        let a = store.create(0, AnnotationVariant::rectangle(p(0.0, 0.0), p(10.0, 10.0)), AnnotationStyle::pen()).unwrap();
        store.create(2, AnnotationVariant::rectangle(p(0.0, 0.0), p(10.0, 10.0)), AnnotationStyle::pen()).unwrap();
        assert_eq!(store.dirty_pages(), vec![0, 2]);

        let snapshot = store.flush_snapshot(0).unwrap();
        assert_eq!(snapshot.upserts.len(), 1);
        assert_eq!(snapshot.upserts[0].id(), a);

        // A mutation after the snapshot keeps the page dirty
        store.update(a, AnnotationPatch::SetStrokeWidth(3.0)).unwrap();
        assert!(!store.mark_flushed(&snapshot));
        assert!(store.is_dirty(0));

        let snapshot = store.flush_snapshot(0).unwrap();
        assert!(store.mark_flushed(&snapshot));
        assert!(!store.is_dirty(0));
        assert!(store.flush_snapshot(0).is_none());
        assert_eq!(store.dirty_pages(), vec![2]);
    }

    #[test]
    fn test_flush_snapshot_follows_page_order() {
        let mut store = store();
        let ids: Vec<_> = (0..12)
            .map(|i| {
                let x = f64::from(i);
                store.create(0, AnnotationVariant::rectangle(p(x, 0.0), p(x + 1.0, 1.0)), AnnotationStyle::pen()).unwrap()
            })
            .collect();

        let snapshot = store.flush_snapshot(0).unwrap();
        assert_eq!(snapshot.upserts.iter().map(Annotation::id).collect::<Vec<_>>(), ids);
        assert_eq!(snapshot.order, page_ids(&store, 0));
        assert!(store.mark_flushed(&snapshot));

        // An update keeps the record in place
        store.update(ids[0], AnnotationPatch::SetStrokeWidth(4.0)).unwrap();
        let snapshot = store.flush_snapshot(0).unwrap();
        assert_eq!(snapshot.upserts.len(), 1);
        assert_eq!(snapshot.order, ids);
    }

    #[test]
    fn test_adopt_keeps_identity_and_skips_known_ids() {
        let mut store = store();
        let square = AnnotationVariant::rectangle(p(0.0, 0.0), p(4.0, 4.0));
        let foreign = Annotation::new(DocumentId::new("doc"), 1, square.clone(), AnnotationStyle::pen())
            .with_timestamps(1_000, 2_000);
        let id = foreign.id();

        assert!(store.adopt(foreign.clone()).unwrap());
        assert_eq!(store.get(id).unwrap(), &foreign);
        assert!(store.is_dirty(1));
        assert!(!store.adopt(foreign).unwrap());
        assert_eq!(store.len(), 1);

        let other = Annotation::new(DocumentId::new("other"), 0, square, AnnotationStyle::pen());
        let other_id = other.id();
        assert_eq!(store.adopt(other), Err(StoreError::ForeignDocument(other_id)));
        assert!(!store.can_undo());
    }

    #[test]
    fn test_purge_deleted() {
        let mut store = store();
        let a = store.create(0, AnnotationVariant::rectangle(p(0.0, 0.0), p(10.0, 10.0)), AnnotationStyle::pen()).unwrap();
        let b = store.create(1, AnnotationVariant::rectangle(p(0.0, 0.0), p(10.0, 10.0)), AnnotationStyle::pen()).unwrap();
        store.soft_delete(a).unwrap();
        store.soft_delete(b).unwrap();

        assert_eq!(store.purge_deleted(Some(0)), vec![a]);
        assert!(store.get(a).is_none());
        assert!(store.get(b).is_some());
        assert!(!store.can_undo());
        assert_eq!(store.flush_snapshot(0).unwrap().removals, vec![a]);

        assert_eq!(store.purge_deleted(None), vec![b]);
        assert!(store.is_empty());
    }

    #[test]
    fn test_purge_tombstones_skips_live_and_unknown() {
        let mut store = store();
        let gone = store.create(0, AnnotationVariant::rectangle(p(0.0, 0.0), p(10.0, 10.0)), AnnotationStyle::pen()).unwrap();
        let back = store.create(0, AnnotationVariant::rectangle(p(0.0, 0.0), p(10.0, 10.0)), AnnotationStyle::pen()).unwrap();
        store.soft_delete(gone).unwrap();
        store.soft_delete(back).unwrap();
        store.restore(back).unwrap();

        let purged = store.purge_tombstones([gone, back, AnnotationId::new_v4()]);
        assert_eq!(purged, vec![gone]);
        assert!(store.get(gone).is_none());
        assert!(store.get(back).is_some());
        assert!(!store.can_undo());

        assert!(store.purge_tombstones([gone]).is_empty());
    }

    #[test]
    fn test_hit_test_topmost_first() {
        let mut store = store();
        let below = store.create(0, AnnotationVariant::rectangle(p(0.0, 0.0), p(100.0, 100.0)), AnnotationStyle::pen()).unwrap();
        let above = store.create(0, AnnotationVariant::rectangle(p(40.0, 40.0), p(60.0, 60.0)), AnnotationStyle::pen()).unwrap();
        let hits: Vec<AnnotationId> = store.hit_test(0, &p(50.0, 50.0), 1.0).into_iter().map(Annotation::id).collect();
        assert_eq!(hits, vec![above, below]);

        store.soft_delete(above).unwrap();
        let hits: Vec<AnnotationId> = store.hit_test(0, &p(50.0, 50.0), 1.0).into_iter().map(Annotation::id).collect();
        assert_eq!(hits, vec![below]);
    }

    #[test]
    fn test_snapshot_active_excludes_tombstones() {
        let mut store = store();
        let note = store.create(0, AnnotationVariant::text_note(p(10.0, 10.0), "gone"), AnnotationStyle::note()).unwrap();
        let rect = store.create(0, AnnotationVariant::rectangle(p(0.0, 0.0), p(10.0, 10.0)), AnnotationStyle::pen()).unwrap();
        store.soft_delete(note).unwrap();

        let snapshot = store.snapshot_active();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[&0].len(), 1);
        assert_eq!(snapshot[&0][0].id(), rect);
    }

    #[test]
    fn test_from_loaded_starts_clean() {
        let annotation = Annotation::new(
            DocumentId::new("doc"),
            3,
            AnnotationVariant::rectangle(p(0.0, 0.0), p(1.0, 1.0)),
            AnnotationStyle::pen(),
        );
        let mut pages = BTreeMap::new();
        pages.insert(3, vec![annotation.clone()]);

        let store = AnnotationStore::from_loaded(DocumentId::new("doc"), pages);
        assert_eq!(store.get(annotation.id()), Some(&annotation));
        assert!(!store.has_dirty_pages());
        assert!(!store.can_undo());
    }

    #[test]
    fn test_default_author_is_stamped() {
        let mut store = store().with_default_author(Some("Reviewer".into()));
        let id = store.create(0, AnnotationVariant::text_note(p(1.0, 1.0), "hi"), AnnotationStyle::note()).unwrap();
        assert_eq!(store.get(id).unwrap().author(), Some("Reviewer"));
    }
}
