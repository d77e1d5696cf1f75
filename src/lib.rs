//! labelstore - Client-side cache and undo engine for annotation editors
//!
//! A local mirror of a remote annotation store: images, categories, and
//! geometric annotations, scoped to one dataset at a time. Every write is
//! confirm-then-apply against a [`RemoteBackend`], with a bounded per-image
//! undo history that replays compensating remote calls.

mod error;
mod model;
pub mod remote;
mod store;
pub mod transform;
mod undo;
mod visibility;

pub use error::StoreError;
pub use model::{
    Annotation, AnnotationId, Category, CategoryId, Dataset, DatasetId, Geometry, ImageId,
    ImageRecord,
};
pub use remote::{
    AnnotationFilter, AnnotationUpdate, CategoryUpdate, ImageUpload, MemoryBackend, NewAnnotation,
    NewCategory, RemoteBackend, RemoteError, RemoteResult,
};
pub use store::AnnotationStore;
pub use undo::{UndoEntry, UndoHistory, UndoStack, UNDO_DEPTH};
pub use visibility::VisibilityMap;
