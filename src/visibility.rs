//! Local visibility flags for categories and annotations.
//!
//! Purely derived UI state over the cache; nothing here talks to the remote
//! store. Category flags mirror a per-dataset persisted toggle, which is
//! why the store only sets them after server confirmation; annotation flags
//! are session-local and never persisted.

use std::collections::HashMap;

use crate::model::{AnnotationId, CategoryId};

/// Hide flags keyed by category and annotation id. Absent means visible.
#[derive(Debug, Clone, Default)]
pub struct VisibilityMap {
    categories: HashMap<CategoryId, bool>,
    annotations: HashMap<AnnotationId, bool>,
}

impl VisibilityMap {
    /// Create a map with everything visible.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a category is hidden.
    pub fn is_category_hidden(&self, category_id: &str) -> bool {
        self.categories.get(category_id).copied().unwrap_or(false)
    }

    /// Whether an individual annotation is hidden.
    pub fn is_annotation_hidden(&self, annotation_id: &str) -> bool {
        self.annotations.get(annotation_id).copied().unwrap_or(false)
    }

    /// Install a server-confirmed hidden state for a category.
    pub fn set_category_hidden(&mut self, category_id: &str, hidden: bool) {
        self.categories.insert(category_id.to_string(), hidden);
    }

    /// Replace every category flag with a server-provided map.
    pub fn replace_category_flags(&mut self, flags: HashMap<CategoryId, bool>) {
        self.categories = flags;
    }

    /// Flip an annotation's flag and return the new hidden state.
    pub fn toggle_annotation(&mut self, annotation_id: &str) -> bool {
        let hidden = !self.is_annotation_hidden(annotation_id);
        self.annotations.insert(annotation_id.to_string(), hidden);
        hidden
    }

    /// Set an annotation's flag directly.
    pub fn set_annotation_hidden(&mut self, annotation_id: &str, hidden: bool) {
        self.annotations.insert(annotation_id.to_string(), hidden);
    }

    /// Forget every flag. Used on dataset context switches.
    pub fn clear(&mut self) {
        self.categories.clear();
        self.annotations.clear();
    }
}
