//! Annotation model and geometry payloads.

use serde::{Deserialize, Serialize};

use crate::model::{CategoryId, ImageId};

/// Unique identifier for an annotation (server-assigned, opaque).
pub type AnnotationId = String;

/// Geometry payload of an annotation, tagged by kind.
///
/// Every kind is matched exhaustively wherever geometry is interpreted;
/// there is no fallback kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Geometry {
    /// Axis-aligned bounding box as `[x, y, width, height]`.
    #[serde(rename = "bbox")]
    Box {
        /// `[x, y, width, height]` in image coordinates.
        bbox: [f32; 4],
    },
    /// Polygon as an ordered list of `[x, y]` vertices.
    Polygon {
        /// Vertices in drawing order.
        points: Vec<[f32; 2]>,
    },
    /// Point marker stored as a box-like anchor whose width and height
    /// carry a symmetric diameter.
    Keypoint {
        /// `[x, y, diameter, diameter]` in image coordinates.
        bbox: [f32; 4],
    },
}

impl Geometry {
    /// Wire tag for this geometry kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Geometry::Box { .. } => "bbox",
            Geometry::Polygon { .. } => "polygon",
            Geometry::Keypoint { .. } => "keypoint",
        }
    }
}

/// A single annotation on an image.
///
/// `image_id` must reference an image present in the cache; the store
/// maintains this by cascading image deletes to annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    /// Server-assigned identifier.
    #[serde(alias = "_id")]
    pub id: AnnotationId,
    /// Image this annotation belongs to.
    pub image_id: ImageId,
    /// Category reference. The wire format historically carried this under
    /// both `category` and `category_id`; one canonical field absorbs both,
    /// so the two can never drift apart.
    #[serde(alias = "category")]
    pub category_id: CategoryId,
    /// Geometry payload.
    #[serde(flatten)]
    pub geometry: Geometry,
    /// Server creation timestamp, opaque to the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Server timestamp of the last update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_wire_tags() {
        let geometry = Geometry::Box {
            bbox: [1.0, 2.0, 3.0, 4.0],
        };
        let value = serde_json::to_value(&geometry).expect("serialize");
        assert_eq!(value["type"], "bbox");
        assert_eq!(value["bbox"][2], 3.0);

        let geometry = Geometry::Polygon {
            points: vec![[0.0, 0.0], [10.0, 0.0]],
        };
        let value = serde_json::to_value(&geometry).expect("serialize");
        assert_eq!(value["type"], "polygon");
        assert_eq!(value["points"][1][0], 10.0);
    }

    #[test]
    fn test_annotation_accepts_category_alias() {
        let json = r#"{
            "id": "ann-1",
            "image_id": "img-1",
            "category": "cat-1",
            "type": "keypoint",
            "bbox": [5.0, 5.0, 12.0, 12.0]
        }"#;
        let annotation: Annotation = serde_json::from_str(json).expect("deserialize");
        assert_eq!(annotation.category_id, "cat-1");
        assert_eq!(annotation.geometry.kind(), "keypoint");
        assert!(annotation.created_at.is_none());
    }

    #[test]
    fn test_annotation_roundtrip() {
        let annotation = Annotation {
            id: "ann-7".to_string(),
            image_id: "img-2".to_string(),
            category_id: "cat-3".to_string(),
            geometry: Geometry::Polygon {
                points: vec![[0.0, 0.0], [4.0, 0.0], [4.0, 4.0]],
            },
            created_at: Some("t000001".to_string()),
            updated_at: None,
        };
        let json = serde_json::to_string(&annotation).expect("serialize");
        let back: Annotation = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, annotation);
    }
}
