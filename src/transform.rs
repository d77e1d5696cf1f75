//! Type-aware geometric transforms.
//!
//! Pure functions over [`Geometry`]: they compute a new payload and leave
//! persistence to the store's remote-confirmed update path, so a transform
//! becomes visible only after the server accepts it.

use crate::error::StoreError;
use crate::model::Geometry;

/// Translate a geometry by `(dx, dy)`.
///
/// Boxes and keypoints shift their anchor and keep their size; polygons
/// shift every vertex.
pub fn translated(geometry: &Geometry, dx: f32, dy: f32) -> Geometry {
    match geometry {
        Geometry::Box { bbox } => Geometry::Box {
            bbox: [bbox[0] + dx, bbox[1] + dy, bbox[2], bbox[3]],
        },
        Geometry::Keypoint { bbox } => Geometry::Keypoint {
            bbox: [bbox[0] + dx, bbox[1] + dy, bbox[2], bbox[3]],
        },
        Geometry::Polygon { points } => Geometry::Polygon {
            points: points.iter().map(|p| [p[0] + dx, p[1] + dy]).collect(),
        },
    }
}

/// Resize a geometry to the given width and height.
///
/// Boxes take the new size directly. Keypoints derive a radius of
/// `max(width, height) / 2` and store it as a symmetric diameter. Polygons
/// have no resize semantics and return [`StoreError::UnsupportedResize`].
pub fn resized(geometry: &Geometry, width: f32, height: f32) -> Result<Geometry, StoreError> {
    match geometry {
        Geometry::Box { bbox } => Ok(Geometry::Box {
            bbox: [bbox[0], bbox[1], width, height],
        }),
        Geometry::Keypoint { bbox } => {
            let radius = width.max(height) / 2.0;
            Ok(Geometry::Keypoint {
                bbox: [bbox[0], bbox[1], radius * 2.0, radius * 2.0],
            })
        }
        Geometry::Polygon { .. } => Err(StoreError::UnsupportedResize),
    }
}
