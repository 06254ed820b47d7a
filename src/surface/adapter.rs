//! The seam between the marker core and a concrete map renderer.
//!
//! A [`MapSurface`] is owned by exactly one surface worker task and is
//! only ever called from it, so implementations need not be `Sync`.

use std::fmt;

use crate::core::geo::LatLng;
use crate::icons::cache::MarkerBitmap;
use crate::markers::spec::{ClusteringOptions, MarkerSpec};
use crate::Result;

/// Renderer-issued reference to one visual annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AnnotationHandle(pub u64);

impl fmt::Display for AnnotationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "annotation#{}", self.0)
    }
}

/// Everything a renderer needs to draw one marker
#[derive(Debug, Clone)]
pub struct Annotation {
    pub marker_id: String,
    pub position: LatLng,
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub image: MarkerBitmap,
}

impl Annotation {
    pub fn from_spec(spec: &MarkerSpec, image: MarkerBitmap) -> Self {
        Self {
            marker_id: spec.id.clone(),
            position: spec.position,
            title: spec.title.clone(),
            subtitle: spec.subtitle.clone(),
            image,
        }
    }
}

/// Platform map renderer.
///
/// Mutations may fail; the worker recovers a failed move or image swap by
/// removing and re-adding the annotation.
pub trait MapSurface: Send + 'static {
    /// Attach the annotation subsystem. Fails while the renderer's own
    /// dependencies (style, annotation manager) are not yet available.
    fn initialize(&mut self) -> Result<()>;

    fn add_annotation(&mut self, annotation: &Annotation) -> Result<AnnotationHandle>;

    fn move_annotation(&mut self, handle: AnnotationHandle, position: LatLng) -> Result<()>;

    fn set_annotation_image(&mut self, handle: AnnotationHandle, image: &MarkerBitmap) -> Result<()>;

    fn remove_annotation(&mut self, handle: AnnotationHandle) -> Result<()>;

    /// Remove every annotation this surface holds
    fn remove_all(&mut self) -> Result<()>;

    /// Apply clustering settings to subsequent renders
    fn set_clustering(&mut self, options: &ClusteringOptions) -> Result<()>;
}
