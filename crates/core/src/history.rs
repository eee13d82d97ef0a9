//! Undo/redo log
//!
//! A flat, ordered list of gesture groups plus a cursor. Groups before the
//! cursor are applied; groups at or after it form the redo tail. Recording a
//! new group truncates the tail.

use crate::annotation::{Annotation, AnnotationId};

/// Default number of groups retained before the oldest is dropped.
pub const DEFAULT_UNDO_LIMIT: usize = 200;

/// State change of one annotation
///
/// `None` means the annotation did not exist (before creation, or after a
/// hard delete).
#[derive(Debug, Clone, PartialEq)]
pub struct UndoEntry {
    pub id: AnnotationId,
    pub page_index: u32,
    pub before: Option<Annotation>,
    pub after: Option<Annotation>,
}

/// Entries undone and redone as one user-visible step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UndoGroup {
    entries: Vec<UndoEntry>,
}

impl UndoGroup {
    pub fn entries(&self) -> &[UndoEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add an entry, folding it into an earlier one for the same annotation
    fn push(&mut self, entry: UndoEntry) {
        match self.entries.iter_mut().find(|existing| existing.id == entry.id) {
            Some(existing) => existing.after = entry.after,
            None => self.entries.push(entry),
        }
    }
}

#[derive(Debug)]
pub struct UndoLog {
    groups: Vec<UndoGroup>,
    cursor: usize,
    open: Option<UndoGroup>,
    limit: usize,
}

impl UndoLog {
    pub fn new(limit: usize) -> Self {
        Self {
            groups: Vec::new(),
            cursor: 0,
            open: None,
            limit: limit.max(1),
        }
    }

    /// Open a gesture group; returns `false` if one is already open.
    pub fn begin_group(&mut self) -> bool {
        if self.open.is_some() {
            return false;
        }
        self.open = Some(UndoGroup::default());
        true
    }

    pub fn has_open_group(&self) -> bool {
        self.open.is_some()
    }

    /// Close the open group and commit it if it recorded anything
    pub fn end_group(&mut self) -> bool {
        match self.open.take() {
            Some(group) if !group.is_empty() => {
                self.commit(group);
                true
            }
            _ => false,
        }
    }

    /// Drop the open group without committing, handing it back for reverting
    pub fn discard_open_group(&mut self) -> Option<UndoGroup> {
        self.open.take()
    }

    /// Record a change into the open group, or as a group of its own
    pub fn record(&mut self, entry: UndoEntry) {
        match self.open.as_mut() {
            Some(group) => group.push(entry),
            None => {
                let mut group = UndoGroup::default();
                group.push(entry);
                self.commit(group);
            }
        }
    }

    fn commit(&mut self, group: UndoGroup) {
        self.groups.truncate(self.cursor);
        self.groups.push(group);
        if self.groups.len() > self.limit {
            self.groups.remove(0);
        }
        self.cursor = self.groups.len();
    }

    /// Step the cursor back; the returned group must be reverted.
    pub fn undo(&mut self) -> Option<UndoGroup> {
        if self.cursor == 0 {
            return None;
        }
        self.cursor -= 1;
        self.groups.get(self.cursor).cloned()
    }

    /// Step the cursor forward; the returned group must be re-applied.
    pub fn redo(&mut self) -> Option<UndoGroup> {
        let group = self.groups.get(self.cursor).cloned()?;
        self.cursor += 1;
        Some(group)
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor < self.groups.len()
    }

    /// Number of committed groups, including the redo tail
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn clear(&mut self) {
        self.groups.clear();
        self.cursor = 0;
        self.open = None;
    }
}

impl Default for UndoLog {
    fn default() -> Self {
        Self::new(DEFAULT_UNDO_LIMIT)
    }
}
