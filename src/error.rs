//! Error types for store operations.

use thiserror::Error;

use crate::model::{AnnotationId, CategoryId, ImageId};
use crate::remote::RemoteError;

/// Errors surfaced by [`AnnotationStore`](crate::AnnotationStore) operations.
///
/// Nothing here is fatal: every failure is per-operation and recoverable by
/// retry or caller correction.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The remote store rejected or failed an operation. The cache is left
    /// unchanged, except for the documented partial application during undo
    /// replay.
    #[error("remote operation failed: {0}")]
    Remote(#[from] RemoteError),

    /// JSON serialization error during snapshot export.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An operation needed a dataset context but none is active.
    #[error("no dataset context is active")]
    MissingDataset,

    /// A non-forced category delete was attempted while annotations still
    /// reference the category.
    #[error("category {id} still has {count} annotation(s)")]
    CategoryInUse {
        /// The category that is still referenced.
        id: CategoryId,
        /// How many annotations reference it.
        count: usize,
    },

    /// The annotation id is not present in the cache.
    #[error("annotation not found: {0}")]
    UnknownAnnotation(AnnotationId),

    /// The image id is not present in the cache.
    #[error("image not found: {0}")]
    UnknownImage(ImageId),

    /// Polygon geometry has no resize semantics.
    #[error("polygon annotations cannot be resized")]
    UnsupportedResize,
}
