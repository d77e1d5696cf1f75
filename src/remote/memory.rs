//! In-memory remote backend.
//!
//! Behaves like the real server as far as the cache can observe: it
//! assigns identifiers, validates references, cascades deletes, and
//! persists per-dataset category visibility. Tests drive it directly,
//! script failures through [`MemoryBackend::fail_next`], and assert on the
//! recorded call log.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::model::{
    Annotation, AnnotationId, Category, CategoryId, Dataset, DatasetId, ImageId, ImageRecord,
};
use crate::remote::{
    AnnotationFilter, AnnotationUpdate, CategoryUpdate, ImageUpload, NewAnnotation, NewCategory,
    RemoteBackend, RemoteError, RemoteResult,
};

/// An in-memory implementation of [`RemoteBackend`].
#[derive(Debug, Default)]
pub struct MemoryBackend {
    datasets: HashMap<DatasetId, Dataset>,
    images: HashMap<ImageId, ImageRecord>,
    annotations: HashMap<AnnotationId, Annotation>,
    categories: HashMap<CategoryId, Category>,
    /// Persisted per-dataset category hidden flags.
    visibility: HashMap<(DatasetId, CategoryId), bool>,
    next_id: u64,
    clock: u64,
    queued_failures: VecDeque<RemoteError>,
    calls: Vec<&'static str>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a dataset directly, without going through the trait. Handy
    /// for seeding tests.
    pub fn seed_dataset(&mut self, name: &str) -> Dataset {
        let id = self.assign_id("ds");
        let dataset = Dataset::new(id.clone(), name);
        self.datasets.insert(id, dataset.clone());
        dataset
    }

    /// Queue a failure; the next trait call consumes it and fails.
    pub fn fail_next(&mut self, message: &str) {
        self.queued_failures.push_back(RemoteError::new(message));
    }

    /// Names of the trait methods invoked so far, in order.
    pub fn calls(&self) -> &[&'static str] {
        &self.calls
    }

    /// Reset the call log.
    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Number of annotations the server currently holds.
    pub fn annotation_count(&self) -> usize {
        self.annotations.len()
    }

    /// Whether the server holds an annotation with this id.
    pub fn has_annotation(&self, annotation_id: &str) -> bool {
        self.annotations.contains_key(annotation_id)
    }

    /// Whether the server holds a category with this id.
    pub fn has_category(&self, category_id: &str) -> bool {
        self.categories.contains_key(category_id)
    }

    fn assign_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{:04}", self.next_id)
    }

    fn timestamp(&mut self) -> String {
        self.clock += 1;
        format!("t{:06}", self.clock)
    }

    /// Record the call and consume a queued failure, if any.
    fn enter(&mut self, call: &'static str) -> RemoteResult<()> {
        self.calls.push(call);
        match self.queued_failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn dataset_image_ids(&self, dataset_id: &str) -> HashSet<&str> {
        self.images
            .values()
            .filter(|img| img.dataset_id.as_deref() == Some(dataset_id))
            .map(|img| img.id.as_str())
            .collect()
    }

    fn category_reference_count(&self, category_id: &str, dataset_id: Option<&str>) -> usize {
        match dataset_id {
            Some(ds) => {
                let image_ids = self.dataset_image_ids(ds);
                self.annotations
                    .values()
                    .filter(|ann| {
                        ann.category_id == category_id
                            && image_ids.contains(ann.image_id.as_str())
                    })
                    .count()
            }
            None => self
                .annotations
                .values()
                .filter(|ann| ann.category_id == category_id)
                .count(),
        }
    }
}

impl RemoteBackend for MemoryBackend {
    async fn create_image(&mut self, upload: ImageUpload) -> RemoteResult<ImageRecord> {
        self.enter("create_image")?;
        if let Some(ds) = &upload.dataset_id {
            if !self.datasets.contains_key(ds) {
                return Err(RemoteError::new("dataset not found"));
            }
        }
        let record = ImageRecord {
            id: self.assign_id("img"),
            dataset_id: upload.dataset_id,
            filename: upload.filename,
            completed: false,
            completed_at: None,
        };
        self.images.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn list_images(&mut self, dataset_id: Option<&str>) -> RemoteResult<Vec<ImageRecord>> {
        self.enter("list_images")?;
        let mut images: Vec<ImageRecord> = self
            .images
            .values()
            .filter(|img| dataset_id.is_none() || img.dataset_id.as_deref() == dataset_id)
            .cloned()
            .collect();
        images.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(images)
    }

    async fn delete_image(&mut self, image_id: &str) -> RemoteResult<()> {
        self.enter("delete_image")?;
        if self.images.remove(image_id).is_none() {
            return Err(RemoteError::new("image not found"));
        }
        self.annotations.retain(|_, ann| ann.image_id != image_id);
        Ok(())
    }

    async fn set_image_completion(
        &mut self,
        image_id: &str,
        completed: bool,
    ) -> RemoteResult<ImageRecord> {
        self.enter("set_image_completion")?;
        let stamp = self.timestamp();
        let image = self
            .images
            .get_mut(image_id)
            .ok_or_else(|| RemoteError::new("image not found"))?;
        image.completed = completed;
        image.completed_at = completed.then_some(stamp);
        Ok(image.clone())
    }

    async fn create_annotation(&mut self, new: NewAnnotation) -> RemoteResult<Annotation> {
        self.enter("create_annotation")?;
        if !self.images.contains_key(&new.image_id) {
            return Err(RemoteError::new("image not found"));
        }
        if !self.categories.contains_key(&new.category_id) {
            return Err(RemoteError::new("category not found"));
        }
        let id = self.assign_id("ann");
        let stamp = self.timestamp();
        let annotation = Annotation {
            id: id.clone(),
            image_id: new.image_id,
            category_id: new.category_id,
            geometry: new.geometry,
            created_at: Some(stamp),
            updated_at: None,
        };
        self.annotations.insert(id, annotation.clone());
        Ok(annotation)
    }

    async fn list_annotations(
        &mut self,
        filter: AnnotationFilter,
    ) -> RemoteResult<Vec<Annotation>> {
        self.enter("list_annotations")?;
        let mut annotations: Vec<Annotation> = match filter {
            AnnotationFilter::ByImage(image_id) => self
                .annotations
                .values()
                .filter(|ann| ann.image_id == image_id)
                .cloned()
                .collect(),
            AnnotationFilter::ByDataset(dataset_id) => {
                let image_ids = self.dataset_image_ids(&dataset_id);
                self.annotations
                    .values()
                    .filter(|ann| image_ids.contains(ann.image_id.as_str()))
                    .cloned()
                    .collect()
            }
            AnnotationFilter::All => self.annotations.values().cloned().collect(),
        };
        annotations.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(annotations)
    }

    async fn update_annotation(
        &mut self,
        annotation_id: &str,
        update: AnnotationUpdate,
    ) -> RemoteResult<Annotation> {
        self.enter("update_annotation")?;
        if let Some(category_id) = &update.category_id {
            if !self.categories.contains_key(category_id) {
                return Err(RemoteError::new("category not found"));
            }
        }
        let stamp = self.timestamp();
        let annotation = self
            .annotations
            .get_mut(annotation_id)
            .ok_or_else(|| RemoteError::new("annotation not found"))?;
        if let Some(category_id) = update.category_id {
            annotation.category_id = category_id;
        }
        if let Some(geometry) = update.geometry {
            annotation.geometry = geometry;
        }
        annotation.updated_at = Some(stamp);
        Ok(annotation.clone())
    }

    async fn delete_annotation(&mut self, annotation_id: &str) -> RemoteResult<()> {
        self.enter("delete_annotation")?;
        if self.annotations.remove(annotation_id).is_none() {
            return Err(RemoteError::new("annotation not found"));
        }
        Ok(())
    }

    async fn delete_image_annotations(&mut self, image_id: &str) -> RemoteResult<()> {
        self.enter("delete_image_annotations")?;
        self.annotations.retain(|_, ann| ann.image_id != image_id);
        Ok(())
    }

    async fn create_category(&mut self, new: NewCategory) -> RemoteResult<Category> {
        self.enter("create_category")?;
        let Some(dataset_id) = new.dataset_id else {
            return Err(RemoteError::new("dataset_id is required"));
        };
        if !self.datasets.contains_key(&dataset_id) {
            return Err(RemoteError::new("dataset not found"));
        }
        let category = Category {
            id: self.assign_id("cat"),
            dataset_id: Some(dataset_id),
            name: new.name,
            color: new.color,
            supercategory: new.supercategory,
        };
        self.categories.insert(category.id.clone(), category.clone());
        Ok(category)
    }

    async fn list_categories(&mut self, dataset_id: Option<&str>) -> RemoteResult<Vec<Category>> {
        self.enter("list_categories")?;
        let mut categories: Vec<Category> = self
            .categories
            .values()
            .filter(|cat| dataset_id.is_none() || cat.dataset_id.as_deref() == dataset_id)
            .cloned()
            .collect();
        categories.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(categories)
    }

    async fn update_category(
        &mut self,
        category_id: &str,
        update: CategoryUpdate,
    ) -> RemoteResult<Category> {
        self.enter("update_category")?;
        let category = self
            .categories
            .get_mut(category_id)
            .ok_or_else(|| RemoteError::new("category not found"))?;
        if let Some(name) = update.name {
            category.name = name;
        }
        if let Some(color) = update.color {
            category.color = color;
        }
        if let Some(supercategory) = update.supercategory {
            category.supercategory = Some(supercategory);
        }
        Ok(category.clone())
    }

    async fn delete_category(
        &mut self,
        category_id: &str,
        dataset_id: Option<&str>,
        force: bool,
    ) -> RemoteResult<()> {
        self.enter("delete_category")?;
        if !self.categories.contains_key(category_id) {
            return Err(RemoteError::new("category not found"));
        }
        let references = self.category_reference_count(category_id, dataset_id);
        if references > 0 && !force {
            return Err(RemoteError::new("category still referenced"));
        }
        self.categories.remove(category_id);
        match dataset_id {
            Some(ds) => {
                let image_ids: HashSet<ImageId> = self
                    .dataset_image_ids(ds)
                    .into_iter()
                    .map(str::to_string)
                    .collect();
                self.annotations.retain(|_, ann| {
                    ann.category_id != category_id || !image_ids.contains(&ann.image_id)
                });
            }
            None => self
                .annotations
                .retain(|_, ann| ann.category_id != category_id),
        }
        self.visibility.retain(|(_, cat), _| cat != category_id);
        Ok(())
    }

    async fn category_annotation_count(&mut self, category_id: &str) -> RemoteResult<usize> {
        self.enter("category_annotation_count")?;
        Ok(self.category_reference_count(category_id, None))
    }

    async fn toggle_category_visibility(
        &mut self,
        category_id: &str,
        dataset_id: &str,
    ) -> RemoteResult<bool> {
        self.enter("toggle_category_visibility")?;
        if !self.categories.contains_key(category_id) {
            return Err(RemoteError::new("category not found"));
        }
        if !self.datasets.contains_key(dataset_id) {
            return Err(RemoteError::new("dataset not found"));
        }
        let hidden = self
            .visibility
            .entry((dataset_id.to_string(), category_id.to_string()))
            .or_insert(false);
        *hidden = !*hidden;
        Ok(*hidden)
    }

    async fn category_visibility(
        &mut self,
        dataset_id: &str,
    ) -> RemoteResult<HashMap<CategoryId, bool>> {
        self.enter("category_visibility")?;
        if !self.datasets.contains_key(dataset_id) {
            return Err(RemoteError::new("dataset not found"));
        }
        Ok(self
            .visibility
            .iter()
            .filter(|((ds, _), _)| ds == dataset_id)
            .map(|((_, cat), hidden)| (cat.clone(), *hidden))
            .collect())
    }

    async fn list_datasets(&mut self) -> RemoteResult<Vec<Dataset>> {
        self.enter("list_datasets")?;
        let mut datasets: Vec<Dataset> = self.datasets.values().cloned().collect();
        datasets.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(datasets)
    }

    async fn create_dataset(&mut self, name: &str) -> RemoteResult<Dataset> {
        self.enter("create_dataset")?;
        let dataset = Dataset::new(self.assign_id("ds"), name);
        self.datasets.insert(dataset.id.clone(), dataset.clone());
        Ok(dataset)
    }
}
