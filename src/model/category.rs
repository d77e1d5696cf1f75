//! Category model for annotation labels.

use serde::{Deserialize, Serialize};

use crate::model::DatasetId;

/// Unique identifier for a category (server-assigned, opaque).
pub type CategoryId = String;

/// An annotation category with a name and display color.
///
/// Categories are usually scoped to a dataset; a missing `dataset_id`
/// marks a global category visible across datasets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    /// Server-assigned identifier.
    #[serde(alias = "_id")]
    pub id: CategoryId,
    /// Dataset this category belongs to; `None` means global.
    #[serde(default)]
    pub dataset_id: Option<DatasetId>,
    /// Display name of the category.
    pub name: String,
    /// Display color as a hex string, e.g. `#ff0000`.
    pub color: String,
    /// Optional parent category name (COCO-style supercategory).
    #[serde(default)]
    pub supercategory: Option<String>,
}
