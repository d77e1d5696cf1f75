//! Data models for the annotation store.

mod annotation;
mod category;
mod dataset;
mod image;

pub use annotation::{Annotation, AnnotationId, Geometry};
pub use category::{Category, CategoryId};
pub use dataset::{Dataset, DatasetId};
pub use image::{ImageId, ImageRecord};
