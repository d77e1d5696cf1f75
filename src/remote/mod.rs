//! Remote collaborator interface.
//!
//! The authoritative annotation store lives behind a CRUD API. This module
//! defines the contract the cache consumes ([`RemoteBackend`]), the request
//! payload types, and an in-memory implementation ([`MemoryBackend`]) used
//! by tests and offline callers.
//!
//! Transport concerns (HTTP verbs, headers, authentication tokens) belong
//! to the implementation, not the contract: the cache only sees typed
//! results and a uniform failure carrying the server's message.

mod memory;

pub use memory::MemoryBackend;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{
    Annotation, Category, CategoryId, Dataset, DatasetId, Geometry, ImageId, ImageRecord,
};

/// A failed remote call, carrying the machine-readable server message.
///
/// The cache treats any non-success uniformly; status codes and network
/// errors are collapsed into the message by the transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct RemoteError {
    /// The server's error message.
    pub message: String,
}

impl RemoteError {
    /// Create an error from a server message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Result alias for remote calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Payload for creating an image: the multipart upload reduced to its parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUpload {
    /// Filename to record with the image.
    pub filename: String,
    /// Raw image bytes.
    pub data: Vec<u8>,
    /// Dataset the image belongs to. When `None`, the store fills in the
    /// active dataset context before the call.
    pub dataset_id: Option<DatasetId>,
}

/// Payload for creating an annotation.
///
/// Carries no identifier or timestamps; the server assigns those, and the
/// cache only ever stores server-confirmed entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAnnotation {
    /// Image the annotation is placed on.
    pub image_id: ImageId,
    /// Category to assign.
    pub category_id: CategoryId,
    /// Geometry payload.
    #[serde(flatten)]
    pub geometry: Geometry,
}

impl NewAnnotation {
    /// Build a creation payload from an existing annotation, stripping the
    /// identifier and timestamps so the server assigns fresh ones.
    pub fn from_snapshot(annotation: &Annotation) -> Self {
        Self {
            image_id: annotation.image_id.clone(),
            category_id: annotation.category_id.clone(),
            geometry: annotation.geometry.clone(),
        }
    }
}

/// Partial update for an annotation. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnotationUpdate {
    /// New category, if changing.
    pub category_id: Option<CategoryId>,
    /// New geometry, if changing.
    pub geometry: Option<Geometry>,
}

impl AnnotationUpdate {
    /// Update carrying only a new geometry.
    pub fn geometry(geometry: Geometry) -> Self {
        Self {
            category_id: None,
            geometry: Some(geometry),
        }
    }
}

/// Payload for creating a category.
///
/// The server rejects creation without a dataset reference; the store fills
/// in the active context when `dataset_id` is `None` and raises a
/// precondition error if there is none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCategory {
    /// Dataset the category belongs to.
    pub dataset_id: Option<DatasetId>,
    /// Display name.
    pub name: String,
    /// Display color as a hex string.
    pub color: String,
    /// Optional parent category name.
    pub supercategory: Option<String>,
}

/// Partial update for a category. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryUpdate {
    /// New display name, if changing.
    pub name: Option<String>,
    /// New color, if changing.
    pub color: Option<String>,
    /// New parent category name, if changing.
    pub supercategory: Option<String>,
}

/// Server-side filter for annotation listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnotationFilter {
    /// Annotations placed on one image.
    ByImage(ImageId),
    /// Annotations on any image of one dataset.
    ByDataset(DatasetId),
    /// Every annotation the caller can see.
    All,
}

/// The CRUD contract the cache consumes.
///
/// Implementations are expected to be network-fallible; every method
/// returns the server's machine-readable message on failure. Methods take
/// `&mut self` because implementations may track connection or session
/// state; the store serializes access by owning its backend. Cancellation
/// is not part of the contract - an issued call runs to completion or
/// failure, and transport timeouts surface as ordinary [`RemoteError`]s.
#[allow(async_fn_in_trait)]
pub trait RemoteBackend {
    /// Upload an image; returns the created record with its server id.
    async fn create_image(&mut self, upload: ImageUpload) -> RemoteResult<ImageRecord>;

    /// List images, optionally filtered by dataset.
    async fn list_images(&mut self, dataset_id: Option<&str>) -> RemoteResult<Vec<ImageRecord>>;

    /// Delete an image. The server cascades to its annotations.
    async fn delete_image(&mut self, image_id: &str) -> RemoteResult<()>;

    /// Set or clear an image's completion flag; returns the updated record.
    async fn set_image_completion(
        &mut self,
        image_id: &str,
        completed: bool,
    ) -> RemoteResult<ImageRecord>;

    /// Create an annotation; returns the created entity with its server id.
    async fn create_annotation(&mut self, new: NewAnnotation) -> RemoteResult<Annotation>;

    /// List annotations matching a filter.
    async fn list_annotations(&mut self, filter: AnnotationFilter)
    -> RemoteResult<Vec<Annotation>>;

    /// Apply a partial update; returns the full updated representation.
    async fn update_annotation(
        &mut self,
        annotation_id: &str,
        update: AnnotationUpdate,
    ) -> RemoteResult<Annotation>;

    /// Delete one annotation.
    async fn delete_annotation(&mut self, annotation_id: &str) -> RemoteResult<()>;

    /// Bulk-delete every annotation on an image.
    async fn delete_image_annotations(&mut self, image_id: &str) -> RemoteResult<()>;

    /// Create a category. Requires a dataset reference.
    async fn create_category(&mut self, new: NewCategory) -> RemoteResult<Category>;

    /// List categories, optionally filtered by dataset.
    async fn list_categories(&mut self, dataset_id: Option<&str>) -> RemoteResult<Vec<Category>>;

    /// Update name/color/supercategory; returns the updated category.
    async fn update_category(
        &mut self,
        category_id: &str,
        update: CategoryUpdate,
    ) -> RemoteResult<Category>;

    /// Delete a category. Without `force` the server rejects while
    /// annotations reference it; with `force` it cascades. An optional
    /// dataset id scopes the reference check server-side.
    async fn delete_category(
        &mut self,
        category_id: &str,
        dataset_id: Option<&str>,
        force: bool,
    ) -> RemoteResult<()>;

    /// Cross-dataset count of annotations referencing a category.
    async fn category_annotation_count(&mut self, category_id: &str) -> RemoteResult<usize>;

    /// Flip a category's persisted per-dataset hidden flag; returns the new
    /// hidden state.
    async fn toggle_category_visibility(
        &mut self,
        category_id: &str,
        dataset_id: &str,
    ) -> RemoteResult<bool>;

    /// Persisted per-dataset category hidden flags.
    async fn category_visibility(
        &mut self,
        dataset_id: &str,
    ) -> RemoteResult<HashMap<CategoryId, bool>>;

    /// List all datasets.
    async fn list_datasets(&mut self) -> RemoteResult<Vec<Dataset>>;

    /// Create a dataset with the given name.
    async fn create_dataset(&mut self, name: &str) -> RemoteResult<Dataset>;
}
