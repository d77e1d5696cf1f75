//! Dataset model - the scoping context for all other collections.

use serde::{Deserialize, Serialize};

/// Unique identifier for a dataset (server-assigned, opaque).
pub type DatasetId = String;

/// A dataset groups images and categories under one scoping context.
///
/// The store caches data for at most one dataset at a time; switching
/// datasets drops every dataset-scoped collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    /// Server-assigned identifier.
    #[serde(alias = "_id")]
    pub id: DatasetId,
    /// Display name of the dataset.
    pub name: String,
}

impl Dataset {
    /// Create a new dataset handle.
    pub fn new(id: impl Into<DatasetId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}
