//! Bounded per-image undo history.
//!
//! Add and clear edits record reversible entries. Replaying an entry issues
//! compensating calls against the remote store, so replay itself lives on
//! [`AnnotationStore`](crate::AnnotationStore); this module owns the pure
//! bookkeeping: deep-copied snapshots, a fixed depth bound per image, FIFO
//! eviction and LIFO pop.

use std::collections::{HashMap, VecDeque};

use crate::model::{Annotation, ImageId};

/// Maximum number of undo entries retained per image. Older entries are
/// evicted first. Deliberately not configurable.
pub const UNDO_DEPTH: usize = 3;

/// A reversible record of a single edit.
///
/// Snapshots are owned deep copies taken at push time, so later cache
/// mutation cannot corrupt history. All snapshots in an entry belong to the
/// image whose stack holds the entry.
#[derive(Debug, Clone, PartialEq)]
pub enum UndoEntry {
    /// Annotations that were added; undone by deleting them remotely.
    Add {
        /// Snapshots of the added annotations.
        annotations: Vec<Annotation>,
    },
    /// Annotations that were cleared; undone by recreating them remotely
    /// with server-assigned fresh identifiers.
    Clear {
        /// Snapshots of the cleared annotations.
        annotations: Vec<Annotation>,
    },
}

impl UndoEntry {
    /// The snapshots carried by this entry.
    pub fn annotations(&self) -> &[Annotation] {
        match self {
            UndoEntry::Add { annotations } | UndoEntry::Clear { annotations } => annotations,
        }
    }

    /// Whether the entry carries no snapshots.
    pub fn is_empty(&self) -> bool {
        self.annotations().is_empty()
    }
}

/// Bounded stack of undo entries for one image.
#[derive(Debug, Clone, Default)]
pub struct UndoStack {
    entries: VecDeque<UndoEntry>,
}

impl UndoStack {
    /// Create an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push an entry, evicting the oldest once the depth bound is exceeded.
    /// Entries carrying no annotations are dropped.
    pub fn push(&mut self, entry: UndoEntry) {
        if entry.is_empty() {
            return;
        }
        self.entries.push_back(entry);
        while self.entries.len() > UNDO_DEPTH {
            self.entries.pop_front();
        }
    }

    /// Pop the most recent entry.
    pub fn pop(&mut self) -> Option<UndoEntry> {
        self.entries.pop_back()
    }

    /// Put a popped entry back on top, e.g. after a failed replay. Never
    /// evicts: the stack is below the bound right after a pop.
    pub fn restore(&mut self, entry: UndoEntry) {
        self.entries.push_back(entry);
    }

    /// Number of entries on the stack.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the stack holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries oldest-first.
    pub fn entries(&self) -> impl Iterator<Item = &UndoEntry> {
        self.entries.iter()
    }
}

/// Undo stacks keyed by image identifier.
#[derive(Debug, Clone, Default)]
pub struct UndoHistory {
    stacks: HashMap<ImageId, UndoStack>,
}

impl UndoHistory {
    /// Create an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an entry for an image. Empty entries are dropped without
    /// creating a stack.
    pub fn push(&mut self, image_id: &str, entry: UndoEntry) {
        if entry.is_empty() {
            return;
        }
        self.stacks.entry(image_id.to_string()).or_default().push(entry);
    }

    /// Pop the most recent entry for an image.
    pub fn pop(&mut self, image_id: &str) -> Option<UndoEntry> {
        self.stacks.get_mut(image_id)?.pop()
    }

    /// Restore a popped entry after a failed replay.
    pub fn restore(&mut self, image_id: &str, entry: UndoEntry) {
        self.stacks
            .entry(image_id.to_string())
            .or_default()
            .restore(entry);
    }

    /// Number of entries recorded for an image.
    pub fn depth(&self, image_id: &str) -> usize {
        self.stacks.get(image_id).map_or(0, UndoStack::len)
    }

    /// Drop one image's stack without replay. Used when the image's
    /// annotation set is authoritatively reset.
    pub fn clear_stack(&mut self, image_id: &str) {
        self.stacks.remove(image_id);
    }

    /// Drop every stack. Used on dataset context switches.
    pub fn clear_all(&mut self) {
        self.stacks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Geometry;

    fn snapshot(id: &str, image_id: &str) -> Annotation {
        Annotation {
            id: id.to_string(),
            image_id: image_id.to_string(),
            category_id: "cat-1".to_string(),
            geometry: Geometry::Box {
                bbox: [0.0, 0.0, 1.0, 1.0],
            },
            created_at: None,
            updated_at: None,
        }
    }

    fn add_entry(id: &str) -> UndoEntry {
        UndoEntry::Add {
            annotations: vec![snapshot(id, "img-1")],
        }
    }

    #[test]
    fn test_depth_bound_evicts_oldest_first() {
        let mut stack = UndoStack::new();
        for i in 0..5 {
            stack.push(add_entry(&format!("ann-{i}")));
        }
        assert_eq!(stack.len(), UNDO_DEPTH);

        // Retained entries are the three most recent, oldest-first.
        let ids: Vec<&str> = stack
            .entries()
            .map(|entry| entry.annotations()[0].id.as_str())
            .collect();
        assert_eq!(ids, ["ann-2", "ann-3", "ann-4"]);
    }

    #[test]
    fn test_pop_is_lifo() {
        let mut stack = UndoStack::new();
        stack.push(add_entry("ann-a"));
        stack.push(add_entry("ann-b"));

        let top = stack.pop().expect("entry");
        assert_eq!(top.annotations()[0].id, "ann-b");
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn test_empty_entry_is_dropped() {
        let mut stack = UndoStack::new();
        stack.push(UndoEntry::Add {
            annotations: Vec::new(),
        });
        stack.push(UndoEntry::Clear {
            annotations: Vec::new(),
        });
        assert!(stack.is_empty());

        let mut history = UndoHistory::new();
        history.push(
            "img-1",
            UndoEntry::Clear {
                annotations: Vec::new(),
            },
        );
        assert_eq!(history.depth("img-1"), 0);
    }

    #[test]
    fn test_restore_puts_entry_back_on_top() {
        let mut history = UndoHistory::new();
        history.push("img-1", add_entry("ann-a"));
        history.push("img-1", add_entry("ann-b"));

        let popped = history.pop("img-1").expect("entry");
        assert_eq!(history.depth("img-1"), 1);
        history.restore("img-1", popped);
        assert_eq!(history.depth("img-1"), 2);
        let top = history.pop("img-1").expect("entry");
        assert_eq!(top.annotations()[0].id, "ann-b");
    }

    #[test]
    fn test_stacks_are_independent_per_image() {
        let mut history = UndoHistory::new();
        history.push("img-1", add_entry("ann-a"));
        history.push("img-2", add_entry("ann-b"));

        history.clear_stack("img-1");
        assert_eq!(history.depth("img-1"), 0);
        assert_eq!(history.depth("img-2"), 1);

        history.clear_all();
        assert_eq!(history.depth("img-2"), 0);
    }
}
