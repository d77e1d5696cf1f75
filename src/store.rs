//! Entity cache and command surface.
//!
//! [`AnnotationStore`] mirrors the authoritative remote store for one
//! dataset context: images, categories, annotations, visibility flags, and
//! per-image undo history. Writes are confirm-then-apply: a collection is
//! mutated only after the remote call succeeds, so a rejected call leaves
//! the cache exactly as it was.
//!
//! Operations are sequential coroutines that suspend only at remote-call
//! await points; all cache mutation between suspension points is
//! synchronous. The [`is_loading`](AnnotationStore::is_loading) flag is a
//! busy indicator for callers, not a lock: the store does not prevent
//! overlapping commands, and overlapping edits to the same entity resolve
//! last-response-wins.

use std::collections::HashMap;

use serde::Serialize;

use crate::error::StoreError;
use crate::model::{
    Annotation, AnnotationId, Category, CategoryId, Dataset, ImageId, ImageRecord,
};
use crate::remote::{
    AnnotationFilter, AnnotationUpdate, CategoryUpdate, ImageUpload, NewAnnotation, NewCategory,
    RemoteBackend, RemoteError, RemoteResult,
};
use crate::transform;
use crate::undo::{UndoEntry, UndoHistory};
use crate::visibility::VisibilityMap;

/// Client-side cache of annotation data, scoped to a current dataset.
///
/// The store exclusively owns its collections and undo history; switching
/// or clearing the dataset context invalidates every identifier obtained
/// before the switch.
#[derive(Debug)]
pub struct AnnotationStore<R: RemoteBackend> {
    remote: R,
    dataset: Option<Dataset>,
    images: HashMap<ImageId, ImageRecord>,
    annotations: HashMap<AnnotationId, Annotation>,
    categories: HashMap<CategoryId, Category>,
    visibility: VisibilityMap,
    history: UndoHistory,
    current_image: Option<ImageId>,
    loading: bool,
    last_error: Option<String>,
}

impl<R: RemoteBackend> AnnotationStore<R> {
    /// Create a store over a remote backend, with no dataset context.
    pub fn new(remote: R) -> Self {
        Self {
            remote,
            dataset: None,
            images: HashMap::new(),
            annotations: HashMap::new(),
            categories: HashMap::new(),
            visibility: VisibilityMap::new(),
            history: UndoHistory::new(),
            current_image: None,
            loading: false,
            last_error: None,
        }
    }

    /// Access the remote backend, e.g. to inspect a test double.
    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Mutable access to the remote backend.
    pub fn remote_mut(&mut self) -> &mut R {
        &mut self.remote
    }

    // ========================================================================
    // Dataset context
    // ========================================================================

    /// Install `dataset` as the active scope.
    ///
    /// This is one of the two full-reset paths: images, annotations,
    /// categories, visibility flags, undo history, the current image, and
    /// the last error are all dropped before the new scope is installed.
    pub fn set_current_dataset(&mut self, dataset: Dataset) {
        log::info!("switching dataset context to '{}' ({})", dataset.name, dataset.id);
        self.reset_collections();
        self.dataset = Some(dataset);
    }

    /// Leave dataset scope entirely, with the same full reset as a switch.
    pub fn clear_dataset_context(&mut self) {
        log::info!("clearing dataset context");
        self.reset_collections();
        self.dataset = None;
    }

    fn reset_collections(&mut self) {
        self.images.clear();
        self.annotations.clear();
        self.categories.clear();
        self.visibility.clear();
        self.history.clear_all();
        self.current_image = None;
        self.last_error = None;
    }

    /// The active dataset scope, if any.
    pub fn current_dataset(&self) -> Option<&Dataset> {
        self.dataset.as_ref()
    }

    fn require_dataset(&self) -> Result<String, StoreError> {
        self.dataset
            .as_ref()
            .map(|dataset| dataset.id.clone())
            .ok_or(StoreError::MissingDataset)
    }

    /// Whether a remote call is currently in flight. A busy indicator, not
    /// a lock.
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Message of the most recent remote failure, cleared when a new
    /// operation starts.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Select the image that `visible_current_image_annotations` filters on.
    pub fn set_current_image(&mut self, image_id: Option<ImageId>) {
        self.current_image = image_id;
    }

    /// The currently selected image record, if it is cached.
    pub fn current_image(&self) -> Option<&ImageRecord> {
        self.current_image.as_ref().and_then(|id| self.images.get(id))
    }

    // ========================================================================
    // Remote-call boundary
    // ========================================================================

    fn begin(&mut self) {
        self.loading = true;
        self.last_error = None;
    }

    /// Close a remote call: drop the busy flag and, on failure, record the
    /// server message before re-raising it.
    fn finish<T>(&mut self, result: RemoteResult<T>) -> Result<T, StoreError> {
        self.loading = false;
        result.map_err(|err| {
            self.record_failure(&err);
            StoreError::Remote(err)
        })
    }

    fn record_failure(&mut self, err: &RemoteError) {
        self.last_error = Some(err.message.clone());
        log::warn!("remote operation failed: {}", err.message);
    }

    // ========================================================================
    // Images
    // ========================================================================

    /// Replace the image collection with the server's listing for the
    /// active dataset (or all images when no dataset is active).
    pub async fn load_images(&mut self) -> Result<(), StoreError> {
        let dataset_id = self.dataset.as_ref().map(|d| d.id.clone());
        self.begin();
        let result = self.remote.list_images(dataset_id.as_deref()).await;
        let images = self.finish(result)?;
        self.images = images.into_iter().map(|img| (img.id.clone(), img)).collect();
        log::debug!("loaded {} images", self.images.len());
        Ok(())
    }

    /// Upload an image and cache the server-confirmed record. When the
    /// payload names no dataset, the active context is used.
    pub async fn upload_image(&mut self, mut upload: ImageUpload) -> Result<ImageId, StoreError> {
        if upload.dataset_id.is_none() {
            upload.dataset_id = self.dataset.as_ref().map(|d| d.id.clone());
        }
        self.begin();
        let result = self.remote.create_image(upload).await;
        let image = self.finish(result)?;
        let id = image.id.clone();
        log::debug!("uploaded image '{}' as {}", image.filename, id);
        self.images.insert(id.clone(), image);
        Ok(id)
    }

    /// Delete an image and cascade locally: every annotation on it is
    /// removed and its undo stack is dropped. No orphaned annotations
    /// remain after a successful delete.
    pub async fn delete_image(&mut self, image_id: &str) -> Result<(), StoreError> {
        if !self.images.contains_key(image_id) {
            return Err(StoreError::UnknownImage(image_id.to_string()));
        }
        self.begin();
        let result = self.remote.delete_image(image_id).await;
        self.finish(result)?;
        self.images.remove(image_id);
        self.annotations.retain(|_, ann| ann.image_id != image_id);
        self.history.clear_stack(image_id);
        if self.current_image.as_deref() == Some(image_id) {
            self.current_image = None;
        }
        log::debug!("deleted image {image_id} and its annotations");
        Ok(())
    }

    /// Mark an image as completed. Completion authoritatively freezes the
    /// image's annotation set, so its undo stack is dropped.
    pub async fn mark_image_complete(&mut self, image_id: &str) -> Result<(), StoreError> {
        if !self.images.contains_key(image_id) {
            return Err(StoreError::UnknownImage(image_id.to_string()));
        }
        self.begin();
        let result = self.remote.set_image_completion(image_id, true).await;
        let updated = self.finish(result)?;
        self.images.insert(updated.id.clone(), updated);
        self.history.clear_stack(image_id);
        log::debug!("marked image {image_id} complete");
        Ok(())
    }

    // ========================================================================
    // Annotations
    // ========================================================================

    /// Replace the annotation collection with the server's listing for the
    /// active dataset. Requires a dataset context.
    pub async fn load_dataset_annotations(&mut self) -> Result<(), StoreError> {
        let dataset_id = self.require_dataset()?;
        self.begin();
        let result = self
            .remote
            .list_annotations(AnnotationFilter::ByDataset(dataset_id))
            .await;
        let annotations = self.finish(result)?;
        self.annotations = annotations
            .into_iter()
            .map(|ann| (ann.id.clone(), ann))
            .collect();
        log::debug!("loaded {} annotations", self.annotations.len());
        Ok(())
    }

    /// Replace one image's slice of the annotation collection with the
    /// server's listing, leaving other images untouched.
    pub async fn load_image_annotations(&mut self, image_id: &str) -> Result<(), StoreError> {
        self.begin();
        let result = self
            .remote
            .list_annotations(AnnotationFilter::ByImage(image_id.to_string()))
            .await;
        let fresh = self.finish(result)?;
        self.annotations.retain(|_, ann| ann.image_id != image_id);
        self.annotations
            .extend(fresh.into_iter().map(|ann| (ann.id.clone(), ann)));
        Ok(())
    }

    /// Create an annotation, cache the server-confirmed entity, and record
    /// an undo entry for the add.
    pub async fn add_annotation(&mut self, new: NewAnnotation) -> Result<AnnotationId, StoreError> {
        let created = self.add_annotation_inner(new).await?;
        let id = created.id.clone();
        let image_id = created.image_id.clone();
        self.history.push(
            &image_id,
            UndoEntry::Add {
                annotations: vec![created],
            },
        );
        Ok(id)
    }

    /// Create without recording undo; shared by the public add path and
    /// clear-replay.
    async fn add_annotation_inner(&mut self, new: NewAnnotation) -> Result<Annotation, StoreError> {
        self.begin();
        let result = self.remote.create_annotation(new).await;
        let created = self.finish(result)?;
        log::debug!("added annotation {} on image {}", created.id, created.image_id);
        self.annotations.insert(created.id.clone(), created.clone());
        Ok(created)
    }

    /// Send a full update and replace (not merge) the cached entry with
    /// the server's returned representation.
    pub async fn update_annotation(
        &mut self,
        annotation_id: &str,
        update: AnnotationUpdate,
    ) -> Result<(), StoreError> {
        if !self.annotations.contains_key(annotation_id) {
            return Err(StoreError::UnknownAnnotation(annotation_id.to_string()));
        }
        self.begin();
        let result = self.remote.update_annotation(annotation_id, update).await;
        let updated = self.finish(result)?;
        self.annotations.insert(updated.id.clone(), updated);
        Ok(())
    }

    /// Delete a single annotation.
    pub async fn remove_annotation(&mut self, annotation_id: &str) -> Result<(), StoreError> {
        if !self.annotations.contains_key(annotation_id) {
            return Err(StoreError::UnknownAnnotation(annotation_id.to_string()));
        }
        self.begin();
        let result = self.remote.delete_annotation(annotation_id).await;
        self.finish(result)?;
        self.annotations.remove(annotation_id);
        Ok(())
    }

    /// Bulk-delete every annotation on an image and record a clear undo
    /// entry holding snapshots of what was removed.
    pub async fn clear_image_annotations(&mut self, image_id: &str) -> Result<(), StoreError> {
        let snapshots: Vec<Annotation> = self
            .annotations
            .values()
            .filter(|ann| ann.image_id == image_id)
            .cloned()
            .collect();
        self.clear_image_annotations_inner(image_id).await?;
        self.history.push(
            image_id,
            UndoEntry::Clear {
                annotations: snapshots,
            },
        );
        Ok(())
    }

    /// Bulk-delete without recording undo; shared by the public clear path
    /// and clear-replay.
    async fn clear_image_annotations_inner(&mut self, image_id: &str) -> Result<(), StoreError> {
        self.begin();
        let result = self.remote.delete_image_annotations(image_id).await;
        self.finish(result)?;
        self.annotations.retain(|_, ann| ann.image_id != image_id);
        Ok(())
    }

    // ========================================================================
    // Geometric transforms
    // ========================================================================

    /// Move an annotation by `(dx, dy)` and persist the new geometry
    /// through the remote-confirmed update path.
    pub async fn move_annotation(
        &mut self,
        annotation_id: &str,
        dx: f32,
        dy: f32,
    ) -> Result<(), StoreError> {
        let annotation = self
            .annotations
            .get(annotation_id)
            .ok_or_else(|| StoreError::UnknownAnnotation(annotation_id.to_string()))?;
        let geometry = transform::translated(&annotation.geometry, dx, dy);
        self.update_annotation(annotation_id, AnnotationUpdate::geometry(geometry))
            .await
    }

    /// Resize an annotation and persist the new geometry. Fails for
    /// polygons before any remote call is made.
    pub async fn resize_annotation(
        &mut self,
        annotation_id: &str,
        width: f32,
        height: f32,
    ) -> Result<(), StoreError> {
        let annotation = self
            .annotations
            .get(annotation_id)
            .ok_or_else(|| StoreError::UnknownAnnotation(annotation_id.to_string()))?;
        let geometry = transform::resized(&annotation.geometry, width, height)?;
        self.update_annotation(annotation_id, AnnotationUpdate::geometry(geometry))
            .await
    }

    // ========================================================================
    // Categories
    // ========================================================================

    /// Replace the category collection with the server's listing for the
    /// active dataset (or all categories when no dataset is active).
    pub async fn load_categories(&mut self) -> Result<(), StoreError> {
        let dataset_id = self.dataset.as_ref().map(|d| d.id.clone());
        self.begin();
        let result = self.remote.list_categories(dataset_id.as_deref()).await;
        let categories = self.finish(result)?;
        self.categories = categories
            .into_iter()
            .map(|cat| (cat.id.clone(), cat))
            .collect();
        log::debug!("loaded {} categories", self.categories.len());
        Ok(())
    }

    /// Create a category, then reload the full list rather than trusting
    /// the create response alone.
    ///
    /// A dataset reference is required, either explicit in the payload or
    /// taken from the active context; its absence fails before any remote
    /// call.
    pub async fn add_category(&mut self, mut new: NewCategory) -> Result<CategoryId, StoreError> {
        if new.dataset_id.is_none() {
            new.dataset_id = Some(self.require_dataset()?);
        }
        self.begin();
        let result = self.remote.create_category(new).await;
        let created = self.finish(result)?;
        let id = created.id.clone();
        log::debug!("created category '{}' as {id}", created.name);
        self.load_categories().await?;
        Ok(id)
    }

    /// Update a category and replace the cached entry with the server's
    /// returned representation.
    pub async fn update_category(
        &mut self,
        category_id: &str,
        update: CategoryUpdate,
    ) -> Result<(), StoreError> {
        self.begin();
        let result = self.remote.update_category(category_id, update).await;
        let updated = self.finish(result)?;
        self.categories.insert(updated.id.clone(), updated);
        Ok(())
    }

    /// Number of cached annotations referencing a category.
    pub fn category_annotation_count(&self, category_id: &str) -> usize {
        self.annotations
            .values()
            .filter(|ann| ann.category_id == category_id)
            .count()
    }

    /// Reference count deciding deletability: the local cache in a dataset
    /// context, the server's cross-dataset count otherwise.
    async fn category_reference_count(&mut self, category_id: &str) -> Result<usize, StoreError> {
        if self.dataset.is_some() {
            return Ok(self.category_annotation_count(category_id));
        }
        self.begin();
        let result = self.remote.category_annotation_count(category_id).await;
        self.finish(result)
    }

    /// Whether a category may be deleted without force.
    pub async fn can_delete_category(&mut self, category_id: &str) -> Result<bool, StoreError> {
        Ok(self.category_reference_count(category_id).await? == 0)
    }

    /// Delete a category.
    ///
    /// Without `force`, a referenced category fails the precondition check
    /// before any delete is issued. With `force`, the server cascades and
    /// the store reloads categories and annotations rather than guessing
    /// the cascade result locally.
    pub async fn delete_category(
        &mut self,
        category_id: &str,
        force: bool,
    ) -> Result<(), StoreError> {
        if !force {
            let count = self.category_reference_count(category_id).await?;
            if count > 0 {
                return Err(StoreError::CategoryInUse {
                    id: category_id.to_string(),
                    count,
                });
            }
        }
        let dataset_id = self.dataset.as_ref().map(|d| d.id.clone());
        self.begin();
        let result = self
            .remote
            .delete_category(category_id, dataset_id.as_deref(), force)
            .await;
        self.finish(result)?;
        if force {
            log::debug!("force-deleted category {category_id}, reloading collections");
            self.load_categories().await?;
            if self.dataset.is_some() {
                self.load_dataset_annotations().await?;
            }
        } else {
            self.categories.remove(category_id);
        }
        Ok(())
    }

    // ========================================================================
    // Visibility
    // ========================================================================

    /// Whether a category is hidden. Defaults to visible.
    pub fn is_category_hidden(&self, category_id: &str) -> bool {
        self.visibility.is_category_hidden(category_id)
    }

    /// Whether an individual annotation is hidden. Defaults to visible.
    pub fn is_annotation_hidden(&self, annotation_id: &str) -> bool {
        self.visibility.is_annotation_hidden(annotation_id)
    }

    /// Flip a category's per-dataset hidden flag. The flag is persisted
    /// remotely, so the local state only takes the server-confirmed value.
    pub async fn toggle_category_visibility(
        &mut self,
        category_id: &str,
    ) -> Result<bool, StoreError> {
        let dataset_id = self.require_dataset()?;
        self.begin();
        let result = self
            .remote
            .toggle_category_visibility(category_id, &dataset_id)
            .await;
        let hidden = self.finish(result)?;
        self.visibility.set_category_hidden(category_id, hidden);
        Ok(hidden)
    }

    /// Pull the persisted per-dataset category flags and replace local
    /// category visibility state.
    pub async fn load_category_visibility(&mut self) -> Result<(), StoreError> {
        let dataset_id = self.require_dataset()?;
        self.begin();
        let result = self.remote.category_visibility(&dataset_id).await;
        let flags = self.finish(result)?;
        self.visibility.replace_category_flags(flags);
        Ok(())
    }

    /// Flip an annotation's local hide flag; returns the new hidden state.
    /// Never persisted.
    pub fn toggle_annotation_visibility(&mut self, annotation_id: &str) -> bool {
        self.visibility.toggle_annotation(annotation_id)
    }

    /// Locally hide every cached annotation of a category.
    pub fn hide_all_category_annotations(&mut self, category_id: &str) {
        for ann in self
            .annotations
            .values()
            .filter(|ann| ann.category_id == category_id)
        {
            self.visibility.set_annotation_hidden(&ann.id, true);
        }
    }

    /// Locally unhide every cached annotation of a category.
    pub fn show_all_category_annotations(&mut self, category_id: &str) {
        for ann in self
            .annotations
            .values()
            .filter(|ann| ann.category_id == category_id)
        {
            self.visibility.set_annotation_hidden(&ann.id, false);
        }
    }

    /// Annotations of the current image that pass all three filters:
    /// image match, category not hidden, annotation not hidden.
    pub fn visible_current_image_annotations(&self) -> Vec<&Annotation> {
        let Some(image_id) = self.current_image.as_deref() else {
            return Vec::new();
        };
        self.annotations
            .values()
            .filter(|ann| ann.image_id == image_id)
            .filter(|ann| !self.visibility.is_category_hidden(&ann.category_id))
            .filter(|ann| !self.visibility.is_annotation_hidden(&ann.id))
            .collect()
    }

    // ========================================================================
    // Undo
    // ========================================================================

    /// Depth of the undo stack for an image.
    pub fn undo_depth(&self, image_id: &str) -> usize {
        self.history.depth(image_id)
    }

    /// Record an undo entry directly, e.g. for a batched add performed by
    /// an external tool. Entries carrying no annotations are dropped.
    ///
    /// Every snapshot in the entry must belong to the keyed image; stacks
    /// are strictly per-image and replay compensates against that image
    /// only.
    pub fn push_undo_entry(&mut self, image_id: &str, entry: UndoEntry) {
        debug_assert!(
            entry
                .annotations()
                .iter()
                .all(|ann| ann.image_id == image_id),
            "undo entry snapshots must belong to image {image_id}"
        );
        self.history.push(image_id, entry);
    }

    /// Replay the most recent undo entry for an image.
    ///
    /// Returns `Ok(false)` when the stack is empty; no remote call is made.
    /// On a replay failure the entry is restored for retry - minus, for add
    /// entries, the snapshots whose compensating deletes already succeeded
    /// (partial application is accepted, not rolled back) - and the error
    /// is surfaced.
    pub async fn undo_last_action(&mut self, image_id: &str) -> Result<bool, StoreError> {
        let Some(entry) = self.history.pop(image_id) else {
            log::debug!("nothing to undo for image {image_id}");
            return Ok(false);
        };
        match entry {
            UndoEntry::Add { annotations } => {
                for (index, snapshot) in annotations.iter().enumerate() {
                    self.begin();
                    let result = self.remote.delete_annotation(&snapshot.id).await;
                    if let Err(err) = self.finish(result) {
                        let remaining = annotations[index..].to_vec();
                        self.history.restore(
                            image_id,
                            UndoEntry::Add {
                                annotations: remaining,
                            },
                        );
                        return Err(err);
                    }
                    self.annotations.remove(&snapshot.id);
                }
                log::debug!(
                    "⏪ undid add of {} annotation(s) on {image_id}",
                    annotations.len()
                );
            }
            UndoEntry::Clear { annotations } => {
                if let Err(err) = self.clear_image_annotations_inner(image_id).await {
                    self.history.restore(image_id, UndoEntry::Clear { annotations });
                    return Err(err);
                }
                let mut recreated = 0;
                while recreated < annotations.len() {
                    let payload = NewAnnotation::from_snapshot(&annotations[recreated]);
                    if let Err(err) = self.add_annotation_inner(payload).await {
                        self.history.restore(image_id, UndoEntry::Clear { annotations });
                        return Err(err);
                    }
                    recreated += 1;
                }
                log::debug!("⏪ undid clear, recreated {recreated} annotation(s) on {image_id}");
            }
        }
        Ok(true)
    }

    // ========================================================================
    // Lookups and export
    // ========================================================================

    /// Look up a cached image.
    pub fn image(&self, image_id: &str) -> Option<&ImageRecord> {
        self.images.get(image_id)
    }

    /// Look up a cached category.
    pub fn category(&self, category_id: &str) -> Option<&Category> {
        self.categories.get(category_id)
    }

    /// Look up a cached annotation.
    pub fn annotation(&self, annotation_id: &str) -> Option<&Annotation> {
        self.annotations.get(annotation_id)
    }

    /// All cached images.
    pub fn images(&self) -> impl Iterator<Item = &ImageRecord> {
        self.images.values()
    }

    /// All cached categories.
    pub fn categories(&self) -> impl Iterator<Item = &Category> {
        self.categories.values()
    }

    /// All cached annotations.
    pub fn annotations(&self) -> impl Iterator<Item = &Annotation> {
        self.annotations.values()
    }

    /// Cached annotations on one image.
    pub fn annotations_for_image(&self, image_id: &str) -> Vec<&Annotation> {
        self.annotations
            .values()
            .filter(|ann| ann.image_id == image_id)
            .collect()
    }

    /// Cached annotations referencing one category.
    pub fn annotations_for_category(&self, category_id: &str) -> Vec<&Annotation> {
        self.annotations
            .values()
            .filter(|ann| ann.category_id == category_id)
            .collect()
    }

    /// List datasets known to the remote store. Does not touch the cache.
    pub async fn list_datasets(&mut self) -> Result<Vec<Dataset>, StoreError> {
        self.begin();
        let result = self.remote.list_datasets().await;
        self.finish(result)
    }

    /// Create a dataset remotely. Does not switch the context.
    pub async fn create_dataset(&mut self, name: &str) -> Result<Dataset, StoreError> {
        self.begin();
        let result = self.remote.create_dataset(name).await;
        self.finish(result)
    }

    /// Serialize the cached collections to pretty JSON, for debugging and
    /// export tooling. Collections are emitted in stable id order.
    pub fn snapshot_json(&self) -> Result<String, StoreError> {
        #[derive(Serialize)]
        struct Snapshot<'a> {
            dataset: Option<&'a Dataset>,
            images: Vec<&'a ImageRecord>,
            categories: Vec<&'a Category>,
            annotations: Vec<&'a Annotation>,
        }
        let mut snapshot = Snapshot {
            dataset: self.dataset.as_ref(),
            images: self.images.values().collect(),
            categories: self.categories.values().collect(),
            annotations: self.annotations.values().collect(),
        };
        snapshot.images.sort_by(|a, b| a.id.cmp(&b.id));
        snapshot.categories.sort_by(|a, b| a.id.cmp(&b.id));
        snapshot.annotations.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(serde_json::to_string_pretty(&snapshot)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Geometry;
    use crate::remote::MemoryBackend;
    use crate::undo::UNDO_DEPTH;
    use pollster::block_on;

    fn store_with_dataset() -> AnnotationStore<MemoryBackend> {
        let mut remote = MemoryBackend::new();
        let dataset = remote.seed_dataset("train");
        let mut store = AnnotationStore::new(remote);
        store.set_current_dataset(dataset);
        store
    }

    fn seed_category(store: &mut AnnotationStore<MemoryBackend>, name: &str) -> CategoryId {
        block_on(store.add_category(NewCategory {
            dataset_id: None,
            name: name.to_string(),
            color: "#ff0000".to_string(),
            supercategory: None,
        }))
        .expect("create category")
    }

    fn seed_image(store: &mut AnnotationStore<MemoryBackend>, filename: &str) -> ImageId {
        block_on(store.upload_image(ImageUpload {
            filename: filename.to_string(),
            data: vec![0u8; 4],
            dataset_id: None,
        }))
        .expect("upload image")
    }

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> Geometry {
        Geometry::Box { bbox: [x, y, w, h] }
    }

    fn seed_annotation(
        store: &mut AnnotationStore<MemoryBackend>,
        image_id: &str,
        category_id: &str,
        geometry: Geometry,
    ) -> AnnotationId {
        block_on(store.add_annotation(NewAnnotation {
            image_id: image_id.to_string(),
            category_id: category_id.to_string(),
            geometry,
        }))
        .expect("create annotation")
    }

    #[test]
    fn test_add_annotation_caches_server_entity() {
        let mut store = store_with_dataset();
        let category_id = seed_category(&mut store, "car");
        let image_id = seed_image(&mut store, "a.png");
        let annotation_id =
            seed_annotation(&mut store, &image_id, &category_id, bbox(1.0, 2.0, 3.0, 4.0));

        let cached = store.annotation(&annotation_id).expect("cached");
        assert_eq!(cached.image_id, image_id);
        assert_eq!(cached.category_id, category_id);
        // Server-assigned fields made it into the cache untouched.
        assert!(cached.created_at.is_some());
        assert_eq!(store.undo_depth(&image_id), 1);
    }

    #[test]
    fn test_delete_image_cascades_to_annotations() {
        let mut store = store_with_dataset();
        let category_id = seed_category(&mut store, "car");
        let image_id = seed_image(&mut store, "a.png");
        let other_image = seed_image(&mut store, "b.png");
        seed_annotation(&mut store, &image_id, &category_id, bbox(0.0, 0.0, 1.0, 1.0));
        seed_annotation(&mut store, &image_id, &category_id, bbox(2.0, 2.0, 1.0, 1.0));
        let survivor =
            seed_annotation(&mut store, &other_image, &category_id, bbox(5.0, 5.0, 1.0, 1.0));

        block_on(store.delete_image(&image_id)).expect("delete image");

        assert!(store.image(&image_id).is_none());
        assert!(store.annotations().all(|ann| ann.image_id != image_id));
        assert!(store.annotation(&survivor).is_some());
        assert_eq!(store.undo_depth(&image_id), 0);
    }

    #[test]
    fn test_failed_create_leaves_cache_unchanged() {
        let mut store = store_with_dataset();
        let category_id = seed_category(&mut store, "car");
        let image_id = seed_image(&mut store, "a.png");

        store.remote_mut().fail_next("disk full");
        let err = block_on(store.add_annotation(NewAnnotation {
            image_id: image_id.clone(),
            category_id: category_id.clone(),
            geometry: bbox(0.0, 0.0, 1.0, 1.0),
        }))
        .expect_err("remote failure");

        assert!(matches!(err, StoreError::Remote(_)));
        assert_eq!(store.annotations().count(), 0);
        assert_eq!(store.undo_depth(&image_id), 0);
        assert_eq!(store.last_error(), Some("disk full"));
        assert!(!store.is_loading());
    }

    #[test]
    fn test_update_replaces_with_server_representation() {
        let mut store = store_with_dataset();
        let category_id = seed_category(&mut store, "car");
        let image_id = seed_image(&mut store, "a.png");
        let annotation_id =
            seed_annotation(&mut store, &image_id, &category_id, bbox(0.0, 0.0, 1.0, 1.0));

        block_on(store.update_annotation(
            &annotation_id,
            AnnotationUpdate::geometry(bbox(9.0, 9.0, 2.0, 2.0)),
        ))
        .expect("update");

        let cached = store.annotation(&annotation_id).expect("cached");
        assert_eq!(cached.geometry, bbox(9.0, 9.0, 2.0, 2.0));
        // The server stamped the update; replace-not-merge carries it over.
        assert!(cached.updated_at.is_some());
    }

    #[test]
    fn test_move_annotation_bbox_and_polygon() {
        let mut store = store_with_dataset();
        let category_id = seed_category(&mut store, "car");
        let image_id = seed_image(&mut store, "a.png");
        let box_id =
            seed_annotation(&mut store, &image_id, &category_id, bbox(10.0, 10.0, 20.0, 20.0));
        let poly_id = seed_annotation(
            &mut store,
            &image_id,
            &category_id,
            Geometry::Polygon {
                points: vec![[0.0, 0.0], [10.0, 0.0]],
            },
        );

        block_on(store.move_annotation(&box_id, 5.0, -3.0)).expect("move bbox");
        block_on(store.move_annotation(&poly_id, 5.0, -3.0)).expect("move polygon");

        assert_eq!(
            store.annotation(&box_id).expect("cached").geometry,
            bbox(15.0, 7.0, 20.0, 20.0)
        );
        assert_eq!(
            store.annotation(&poly_id).expect("cached").geometry,
            Geometry::Polygon {
                points: vec![[5.0, -3.0], [15.0, -3.0]]
            }
        );
    }

    #[test]
    fn test_resize_keypoint_stores_symmetric_diameter() {
        let mut store = store_with_dataset();
        let category_id = seed_category(&mut store, "joint");
        let image_id = seed_image(&mut store, "a.png");
        let keypoint_id = seed_annotation(
            &mut store,
            &image_id,
            &category_id,
            Geometry::Keypoint {
                bbox: [5.0, 5.0, 2.0, 2.0],
            },
        );

        block_on(store.resize_annotation(&keypoint_id, 10.0, 6.0)).expect("resize keypoint");
        assert_eq!(
            store.annotation(&keypoint_id).expect("cached").geometry,
            Geometry::Keypoint {
                bbox: [5.0, 5.0, 10.0, 10.0]
            }
        );
    }

    #[test]
    fn test_resize_polygon_fails_before_any_remote_call() {
        let mut store = store_with_dataset();
        let category_id = seed_category(&mut store, "region");
        let image_id = seed_image(&mut store, "a.png");
        let poly_id = seed_annotation(
            &mut store,
            &image_id,
            &category_id,
            Geometry::Polygon {
                points: vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]],
            },
        );

        store.remote_mut().clear_calls();
        let err = block_on(store.resize_annotation(&poly_id, 5.0, 5.0)).expect_err("polygon");
        assert!(matches!(err, StoreError::UnsupportedResize));
        assert!(store.remote().calls().is_empty());
    }

    #[test]
    fn test_undo_add_round_trip() {
        let mut store = store_with_dataset();
        let category_id = seed_category(&mut store, "car");
        let image_id = seed_image(&mut store, "a.png");
        let a1 = seed_annotation(&mut store, &image_id, &category_id, bbox(0.0, 0.0, 1.0, 1.0));
        let a2 = seed_annotation(&mut store, &image_id, &category_id, bbox(2.0, 2.0, 1.0, 1.0));

        // Batch the two adds into one entry, as a bulk tool would.
        let snapshots = vec![
            store.annotation(&a1).expect("a1").clone(),
            store.annotation(&a2).expect("a2").clone(),
        ];
        store.push_undo_entry(&image_id, UndoEntry::Add {
            annotations: snapshots,
        });
        let depth_before = store.undo_depth(&image_id);

        let undone = block_on(store.undo_last_action(&image_id)).expect("undo");
        assert!(undone);
        assert!(store.annotation(&a1).is_none());
        assert!(store.annotation(&a2).is_none());
        assert!(!store.remote().has_annotation(&a1));
        assert!(!store.remote().has_annotation(&a2));
        assert_eq!(store.undo_depth(&image_id), depth_before - 1);
    }

    #[test]
    fn test_undo_depth_is_bounded_to_three_most_recent() {
        let mut store = store_with_dataset();
        let category_id = seed_category(&mut store, "car");
        let image_id = seed_image(&mut store, "a.png");
        let ids: Vec<AnnotationId> = (0..5)
            .map(|i| {
                seed_annotation(
                    &mut store,
                    &image_id,
                    &category_id,
                    bbox(i as f32, 0.0, 1.0, 1.0),
                )
            })
            .collect();
        assert_eq!(store.undo_depth(&image_id), UNDO_DEPTH);

        // Undo three times: the three most recent adds unwind, newest first.
        for expected in ids.iter().rev().take(3) {
            assert!(block_on(store.undo_last_action(&image_id)).expect("undo"));
            assert!(store.annotation(expected).is_none());
        }
        // The two oldest adds were evicted from history and survive.
        assert!(store.annotation(&ids[0]).is_some());
        assert!(store.annotation(&ids[1]).is_some());
        assert!(!block_on(store.undo_last_action(&image_id)).expect("empty stack"));
    }

    #[test]
    fn test_undo_clear_recreates_with_fresh_ids() {
        let mut store = store_with_dataset();
        let category_id = seed_category(&mut store, "car");
        let image_id = seed_image(&mut store, "a.png");
        let a1 = seed_annotation(&mut store, &image_id, &category_id, bbox(0.0, 0.0, 1.0, 1.0));
        let a2 = seed_annotation(&mut store, &image_id, &category_id, bbox(2.0, 2.0, 1.0, 1.0));

        block_on(store.clear_image_annotations(&image_id)).expect("clear");
        assert_eq!(store.annotations_for_image(&image_id).len(), 0);

        assert!(block_on(store.undo_last_action(&image_id)).expect("undo clear"));
        let recreated = store.annotations_for_image(&image_id);
        assert_eq!(recreated.len(), 2);
        // The server assigned fresh identifiers to the recreated entities.
        assert!(recreated.iter().all(|ann| ann.id != a1 && ann.id != a2));
    }

    #[test]
    fn test_undo_failure_restores_entry_for_retry() {
        let mut store = store_with_dataset();
        let category_id = seed_category(&mut store, "car");
        let image_id = seed_image(&mut store, "a.png");
        let annotation_id =
            seed_annotation(&mut store, &image_id, &category_id, bbox(0.0, 0.0, 1.0, 1.0));

        store.remote_mut().fail_next("connection reset");
        let err = block_on(store.undo_last_action(&image_id)).expect_err("replay failure");
        assert!(matches!(err, StoreError::Remote(_)));
        assert_eq!(store.last_error(), Some("connection reset"));
        assert_eq!(store.undo_depth(&image_id), 1);
        assert!(store.annotation(&annotation_id).is_some());

        // The restored entry replays cleanly.
        assert!(block_on(store.undo_last_action(&image_id)).expect("retry"));
        assert!(store.annotation(&annotation_id).is_none());
    }

    #[test]
    fn test_undo_clear_failure_restores_full_entry() {
        let mut store = store_with_dataset();
        let category_id = seed_category(&mut store, "car");
        let image_id = seed_image(&mut store, "a.png");
        seed_annotation(&mut store, &image_id, &category_id, bbox(0.0, 0.0, 1.0, 1.0));
        seed_annotation(&mut store, &image_id, &category_id, bbox(2.0, 2.0, 1.0, 1.0));

        block_on(store.clear_image_annotations(&image_id)).expect("clear");
        let depth_before = store.undo_depth(&image_id);

        // Another client removes the category, so the recreate phase of the
        // replay fails after the bulk delete already went through.
        block_on(store.remote_mut().delete_category(&category_id, None, false))
            .expect("delete category");

        let err = block_on(store.undo_last_action(&image_id)).expect_err("recreate failure");
        assert!(matches!(err, StoreError::Remote(_)));
        assert_eq!(store.last_error(), Some("category not found"));
        // The clear entry is restored whole, at unchanged depth, and the
        // image stays cleared.
        assert_eq!(store.undo_depth(&image_id), depth_before);
        assert_eq!(store.annotations_for_image(&image_id).len(), 0);
    }

    #[test]
    #[should_panic(expected = "undo entry snapshots must belong to image")]
    fn test_push_undo_entry_rejects_foreign_snapshots() {
        let mut store = store_with_dataset();
        let category_id = seed_category(&mut store, "car");
        let image_id = seed_image(&mut store, "a.png");
        let other_image = seed_image(&mut store, "b.png");
        let annotation_id =
            seed_annotation(&mut store, &other_image, &category_id, bbox(0.0, 0.0, 1.0, 1.0));

        let snapshot = store.annotation(&annotation_id).expect("cached").clone();
        store.push_undo_entry(&image_id, UndoEntry::Add {
            annotations: vec![snapshot],
        });
    }

    #[test]
    fn test_create_dataset_does_not_switch_context() {
        let mut store = store_with_dataset();
        let before = store.current_dataset().expect("context").clone();

        let created = block_on(store.create_dataset("val")).expect("create dataset");
        assert_eq!(created.name, "val");
        assert_ne!(created.id, before.id);
        assert_eq!(store.current_dataset(), Some(&before));

        let datasets = block_on(store.list_datasets()).expect("list datasets");
        assert!(datasets.contains(&created));
        assert!(datasets.contains(&before));
    }

    #[test]
    fn test_dataset_switch_clears_undo_without_remote_calls() {
        let mut store = store_with_dataset();
        let category_id = seed_category(&mut store, "car");
        let image_id = seed_image(&mut store, "a.png");
        seed_annotation(&mut store, &image_id, &category_id, bbox(0.0, 0.0, 1.0, 1.0));
        assert_eq!(store.undo_depth(&image_id), 1);

        let other = store.remote_mut().seed_dataset("val");
        store.set_current_dataset(other);
        assert_eq!(store.undo_depth(&image_id), 0);

        store.remote_mut().clear_calls();
        assert!(!block_on(store.undo_last_action(&image_id)).expect("empty stack"));
        assert!(store.remote().calls().is_empty());
    }

    #[test]
    fn test_referenced_category_delete_is_rejected_locally() {
        let mut store = store_with_dataset();
        let category_id = seed_category(&mut store, "car");
        let image_id = seed_image(&mut store, "a.png");
        seed_annotation(&mut store, &image_id, &category_id, bbox(0.0, 0.0, 1.0, 1.0));

        store.remote_mut().clear_calls();
        let err = block_on(store.delete_category(&category_id, false)).expect_err("referenced");
        assert!(matches!(
            err,
            StoreError::CategoryInUse { count: 1, .. }
        ));
        // Precondition failed before the delete was issued.
        assert!(!store.remote().calls().contains(&"delete_category"));
        assert!(store.category(&category_id).is_some());
        assert!(store.remote().has_category(&category_id));
    }

    #[test]
    fn test_force_delete_reloads_authoritative_state() {
        let mut store = store_with_dataset();
        let category_id = seed_category(&mut store, "car");
        let keep_id = seed_category(&mut store, "tree");
        let image_id = seed_image(&mut store, "a.png");
        seed_annotation(&mut store, &image_id, &category_id, bbox(0.0, 0.0, 1.0, 1.0));
        let keeper = seed_annotation(&mut store, &image_id, &keep_id, bbox(5.0, 5.0, 1.0, 1.0));

        block_on(store.delete_category(&category_id, true)).expect("force delete");

        assert!(store.category(&category_id).is_none());
        assert!(store.category(&keep_id).is_some());
        assert_eq!(store.annotations_for_category(&category_id).len(), 0);
        assert!(store.annotation(&keeper).is_some());
    }

    #[test]
    fn test_add_category_without_dataset_fails_before_remote() {
        let mut remote = MemoryBackend::new();
        remote.seed_dataset("train");
        let mut store = AnnotationStore::new(remote);
        store.remote_mut().clear_calls();

        let err = block_on(store.add_category(NewCategory {
            dataset_id: None,
            name: "car".to_string(),
            color: "#ff0000".to_string(),
            supercategory: None,
        }))
        .expect_err("no context");
        assert!(matches!(err, StoreError::MissingDataset));
        assert!(store.remote().calls().is_empty());
    }

    #[test]
    fn test_can_delete_category_global_context_asks_server() {
        let mut store = store_with_dataset();
        let category_id = seed_category(&mut store, "car");
        let image_id = seed_image(&mut store, "a.png");
        seed_annotation(&mut store, &image_id, &category_id, bbox(0.0, 0.0, 1.0, 1.0));

        // Leaving dataset scope drops the cache but not the server's data.
        store.clear_dataset_context();
        store.remote_mut().clear_calls();

        let deletable = block_on(store.can_delete_category(&category_id)).expect("count");
        assert!(!deletable);
        assert_eq!(store.remote().calls(), ["category_annotation_count"]);
    }

    #[test]
    fn test_toggle_category_visibility_takes_server_state() {
        let mut store = store_with_dataset();
        let category_id = seed_category(&mut store, "car");

        assert!(block_on(store.toggle_category_visibility(&category_id)).expect("toggle"));
        assert!(store.is_category_hidden(&category_id));
        assert!(!block_on(store.toggle_category_visibility(&category_id)).expect("toggle"));
        assert!(!store.is_category_hidden(&category_id));

        store.remote_mut().fail_next("offline");
        let err = block_on(store.toggle_category_visibility(&category_id)).expect_err("offline");
        assert!(matches!(err, StoreError::Remote(_)));
        // The flag only ever takes server-confirmed values.
        assert!(!store.is_category_hidden(&category_id));
    }

    #[test]
    fn test_load_category_visibility_replaces_flags() {
        let mut store = store_with_dataset();
        let category_id = seed_category(&mut store, "car");
        block_on(store.toggle_category_visibility(&category_id)).expect("toggle");

        // A fresh store for the same dataset sees the persisted flag.
        let dataset = store.current_dataset().expect("context").clone();
        store.set_current_dataset(dataset);
        assert!(!store.is_category_hidden(&category_id));
        block_on(store.load_category_visibility()).expect("load visibility");
        assert!(store.is_category_hidden(&category_id));
    }

    #[test]
    fn test_visible_current_image_annotations_ands_all_filters() {
        let mut store = store_with_dataset();
        let cars = seed_category(&mut store, "car");
        let trees = seed_category(&mut store, "tree");
        let image_id = seed_image(&mut store, "a.png");
        let other_image = seed_image(&mut store, "b.png");

        let visible = seed_annotation(&mut store, &image_id, &cars, bbox(0.0, 0.0, 1.0, 1.0));
        let hidden_individually =
            seed_annotation(&mut store, &image_id, &cars, bbox(2.0, 2.0, 1.0, 1.0));
        let hidden_by_category =
            seed_annotation(&mut store, &image_id, &trees, bbox(4.0, 4.0, 1.0, 1.0));
        seed_annotation(&mut store, &other_image, &cars, bbox(6.0, 6.0, 1.0, 1.0));

        store.set_current_image(Some(image_id.clone()));
        store.toggle_annotation_visibility(&hidden_individually);
        block_on(store.toggle_category_visibility(&trees)).expect("hide trees");

        let visible_ids: Vec<&str> = store
            .visible_current_image_annotations()
            .iter()
            .map(|ann| ann.id.as_str())
            .collect();
        assert_eq!(visible_ids, [visible.as_str()]);
        let _ = hidden_by_category;
    }

    #[test]
    fn test_hide_and_show_all_category_annotations() {
        let mut store = store_with_dataset();
        let cars = seed_category(&mut store, "car");
        let trees = seed_category(&mut store, "tree");
        let image_id = seed_image(&mut store, "a.png");
        let car1 = seed_annotation(&mut store, &image_id, &cars, bbox(0.0, 0.0, 1.0, 1.0));
        let car2 = seed_annotation(&mut store, &image_id, &cars, bbox(2.0, 2.0, 1.0, 1.0));
        let tree1 = seed_annotation(&mut store, &image_id, &trees, bbox(4.0, 4.0, 1.0, 1.0));

        store.hide_all_category_annotations(&cars);
        assert!(store.is_annotation_hidden(&car1));
        assert!(store.is_annotation_hidden(&car2));
        assert!(!store.is_annotation_hidden(&tree1));

        store.show_all_category_annotations(&cars);
        assert!(!store.is_annotation_hidden(&car1));
        assert!(!store.is_annotation_hidden(&car2));
    }

    #[test]
    fn test_mark_image_complete_freezes_undo() {
        let mut store = store_with_dataset();
        let category_id = seed_category(&mut store, "car");
        let image_id = seed_image(&mut store, "a.png");
        seed_annotation(&mut store, &image_id, &category_id, bbox(0.0, 0.0, 1.0, 1.0));
        assert_eq!(store.undo_depth(&image_id), 1);

        block_on(store.mark_image_complete(&image_id)).expect("complete");
        let image = store.image(&image_id).expect("cached");
        assert!(image.completed);
        assert!(image.completed_at.is_some());
        assert_eq!(store.undo_depth(&image_id), 0);
    }

    #[test]
    fn test_load_replaces_collections_wholesale() {
        let mut store = store_with_dataset();
        let category_id = seed_category(&mut store, "car");
        let image_id = seed_image(&mut store, "a.png");
        seed_annotation(&mut store, &image_id, &category_id, bbox(0.0, 0.0, 1.0, 1.0));

        // Another client deletes everything server-side.
        let dataset = store.current_dataset().expect("context").clone();
        block_on(async {
            let remote = store.remote_mut();
            let annotations = remote
                .list_annotations(AnnotationFilter::ByDataset(dataset.id.clone()))
                .await
                .expect("list");
            for ann in annotations {
                remote.delete_annotation(&ann.id).await.expect("delete");
            }
        });

        block_on(store.load_dataset_annotations()).expect("reload");
        assert_eq!(store.annotations().count(), 0);
    }

    #[test]
    fn test_snapshot_json_is_stable() {
        let mut store = store_with_dataset();
        let category_id = seed_category(&mut store, "car");
        let image_id = seed_image(&mut store, "a.png");
        seed_annotation(&mut store, &image_id, &category_id, bbox(0.0, 0.0, 1.0, 1.0));

        let json = store.snapshot_json().expect("snapshot");
        assert!(json.contains("\"name\": \"car\""));
        assert!(json.contains("\"filename\": \"a.png\""));
        assert!(json.contains("\"type\": \"bbox\""));
    }
}
