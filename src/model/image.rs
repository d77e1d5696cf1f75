//! Image record model.

use serde::{Deserialize, Serialize};

use crate::model::DatasetId;

/// Unique identifier for an image (server-assigned, opaque).
pub type ImageId = String;

/// Metadata for an uploaded image.
///
/// Pixel data stays on the server; the cache only mirrors the record.
/// Deleting an image cascades to its annotations, and marking it complete
/// freezes its annotation set (the undo history for it is dropped).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Server-assigned identifier.
    #[serde(alias = "_id")]
    pub id: ImageId,
    /// Dataset this image belongs to, if any.
    #[serde(default)]
    pub dataset_id: Option<DatasetId>,
    /// Original filename from the upload.
    pub filename: String,
    /// Whether annotation work on this image is finished.
    #[serde(default)]
    pub completed: bool,
    /// Server timestamp of completion, present while `completed` is set.
    #[serde(default)]
    pub completed_at: Option<String>,
}
