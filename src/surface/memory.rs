//! Headless [`MapSurface`] that keeps annotations in memory.
//!
//! Used when no renderer is attached (server-side previews, tests) and as
//! the reference adapter. A [`MemoryProbe`] shares its state for
//! inspection and failure injection.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::core::geo::LatLng;
use crate::icons::cache::MarkerBitmap;
use crate::markers::spec::ClusteringOptions;
use crate::spatial::clustering::{cluster_markers, Cluster};
use crate::surface::adapter::{Annotation, AnnotationHandle, MapSurface};
use crate::{MarkerError, Result};

/// An annotation as currently drawn
#[derive(Debug, Clone)]
pub struct RenderedAnnotation {
    pub handle: AnnotationHandle,
    pub marker_id: String,
    pub position: LatLng,
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub image: MarkerBitmap,
}

/// Mutation log entry
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceEvent {
    Initialized,
    Added(String),
    Moved(String),
    ImageChanged(String),
    Removed(String),
    Cleared,
    Clustering(ClusteringOptions),
}

#[derive(Debug, Default)]
struct MemoryState {
    initialized: bool,
    init_attempts: u32,
    init_failures: u32,
    update_failures: u32,
    next_handle: u64,
    annotations: BTreeMap<AnnotationHandle, RenderedAnnotation>,
    clustering: Option<ClusteringOptions>,
    events: Vec<SurfaceEvent>,
}

impl MemoryState {
    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(MarkerError::Surface("annotation manager not attached".into()))
        }
    }

    fn consume_update_failure(&mut self) -> Result<()> {
        if self.update_failures > 0 {
            self.update_failures -= 1;
            return Err(MarkerError::Surface("injected annotation update failure".into()));
        }
        Ok(())
    }

    fn marker_id(&self, handle: AnnotationHandle) -> Result<String> {
        self.annotations
            .get(&handle)
            .map(|a| a.marker_id.clone())
            .ok_or_else(|| MarkerError::Surface(format!("unknown {}", handle)))
    }
}

#[derive(Debug, Default)]
pub struct MemorySurface {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn probe(&self) -> MemoryProbe {
        MemoryProbe {
            state: self.state.clone(),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MapSurface for MemorySurface {
    fn initialize(&mut self) -> Result<()> {
        let mut state = self.state();
        state.init_attempts += 1;
        if state.init_failures > 0 {
            state.init_failures -= 1;
            return Err(MarkerError::Surface("style not loaded".into()));
        }
        state.initialized = true;
        state.events.push(SurfaceEvent::Initialized);
        Ok(())
    }

    fn add_annotation(&mut self, annotation: &Annotation) -> Result<AnnotationHandle> {
        let mut state = self.state();
        state.ensure_initialized()?;
        state.next_handle += 1;
        let handle = AnnotationHandle(state.next_handle);
        state.annotations.insert(
            handle,
            RenderedAnnotation {
                handle,
                marker_id: annotation.marker_id.clone(),
                position: annotation.position,
                title: annotation.title.clone(),
                subtitle: annotation.subtitle.clone(),
                image: annotation.image.clone(),
            },
        );
        state
            .events
            .push(SurfaceEvent::Added(annotation.marker_id.clone()));
        Ok(handle)
    }

    fn move_annotation(&mut self, handle: AnnotationHandle, position: LatLng) -> Result<()> {
        let mut state = self.state();
        state.ensure_initialized()?;
        state.consume_update_failure()?;
        let marker_id = state.marker_id(handle)?;
        if let Some(annotation) = state.annotations.get_mut(&handle) {
            annotation.position = position;
        }
        state.events.push(SurfaceEvent::Moved(marker_id));
        Ok(())
    }

    fn set_annotation_image(&mut self, handle: AnnotationHandle, image: &MarkerBitmap) -> Result<()> {
        let mut state = self.state();
        state.ensure_initialized()?;
        state.consume_update_failure()?;
        let marker_id = state.marker_id(handle)?;
        if let Some(annotation) = state.annotations.get_mut(&handle) {
            annotation.image = image.clone();
        }
        state.events.push(SurfaceEvent::ImageChanged(marker_id));
        Ok(())
    }

    fn remove_annotation(&mut self, handle: AnnotationHandle) -> Result<()> {
        let mut state = self.state();
        let removed = state
            .annotations
            .remove(&handle)
            .ok_or_else(|| MarkerError::Surface(format!("unknown {}", handle)))?;
        state.events.push(SurfaceEvent::Removed(removed.marker_id));
        Ok(())
    }

    fn remove_all(&mut self) -> Result<()> {
        let mut state = self.state();
        state.annotations.clear();
        state.events.push(SurfaceEvent::Cleared);
        Ok(())
    }

    fn set_clustering(&mut self, options: &ClusteringOptions) -> Result<()> {
        let mut state = self.state();
        state.clustering = Some(options.clone());
        state.events.push(SurfaceEvent::Clustering(options.clone()));
        Ok(())
    }
}

/// Shared view into a [`MemorySurface`]
#[derive(Debug, Clone)]
pub struct MemoryProbe {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryProbe {
    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_initialized(&self) -> bool {
        self.state().initialized
    }

    pub fn init_attempts(&self) -> u32 {
        self.state().init_attempts
    }

    /// Make the next `count` initialize calls fail
    pub fn fail_initialize(&self, count: u32) {
        self.state().init_failures = count;
    }

    /// Make the next `count` move or image mutations fail
    pub fn fail_next_updates(&self, count: u32) {
        self.state().update_failures = count;
    }

    pub fn annotation_count(&self) -> usize {
        self.state().annotations.len()
    }

    pub fn annotation(&self, marker_id: &str) -> Option<RenderedAnnotation> {
        self.state()
            .annotations
            .values()
            .find(|a| a.marker_id == marker_id)
            .cloned()
    }

    /// Sorted ids of every drawn marker
    pub fn marker_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self
            .state()
            .annotations
            .values()
            .map(|a| a.marker_id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn events(&self) -> Vec<SurfaceEvent> {
        self.state().events.clone()
    }

    pub fn clear_events(&self) {
        self.state().events.clear();
    }

    /// Moves and image swaps recorded for a marker
    pub fn mutations_for(&self, marker_id: &str) -> usize {
        self.state()
            .events
            .iter()
            .filter(|event| match event {
                SurfaceEvent::Moved(id) | SurfaceEvent::ImageChanged(id) => id == marker_id,
                _ => false,
            })
            .count()
    }

    pub fn moves_for(&self, marker_id: &str) -> usize {
        self.state()
            .events
            .iter()
            .filter(|event| matches!(event, SurfaceEvent::Moved(id) if id == marker_id))
            .count()
    }

    pub fn clustering(&self) -> Option<ClusteringOptions> {
        self.state().clustering.clone()
    }

    /// Group drawn markers the way the renderer would at `zoom`
    pub fn clusters(&self, zoom: f64) -> Vec<Cluster> {
        let state = self.state();
        let options = state.clustering.clone().unwrap_or_default();
        cluster_markers(
            state
                .annotations
                .values()
                .map(|a| (a.marker_id.as_str(), a.position)),
            &options,
            zoom,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;

    fn annotation(id: &str) -> Annotation {
        Annotation {
            marker_id: id.to_string(),
            position: LatLng::new(1.0, 1.0),
            title: Some("t".into()),
            subtitle: None,
            image: Arc::new(RgbaImage::new(2, 2)),
        }
    }

    #[test]
    fn test_requires_initialization() {
        let mut surface = MemorySurface::new();
        let probe = surface.probe();
        assert!(surface.add_annotation(&annotation("a")).is_err());

        probe.fail_initialize(2);
        assert!(surface.initialize().is_err());
        assert!(surface.initialize().is_err());
        assert!(surface.initialize().is_ok());
        assert_eq!(probe.init_attempts(), 3);
        assert!(probe.is_initialized());
        assert!(surface.add_annotation(&annotation("a")).is_ok());
    }

    #[test]
    fn test_mutations_are_logged() {
        let mut surface = MemorySurface::new();
        let probe = surface.probe();
        surface.initialize().unwrap();

        let handle = surface.add_annotation(&annotation("a")).unwrap();
        surface.move_annotation(handle, LatLng::new(2.0, 2.0)).unwrap();
        surface
            .set_annotation_image(handle, &Arc::new(RgbaImage::new(3, 3)))
            .unwrap();

        assert_eq!(probe.mutations_for("a"), 2);
        assert_eq!(probe.moves_for("a"), 1);
        assert_eq!(probe.annotation("a").unwrap().image.dimensions(), (3, 3));

        probe.fail_next_updates(1);
        assert!(surface.move_annotation(handle, LatLng::new(0.0, 0.0)).is_err());
        assert!(surface.move_annotation(handle, LatLng::new(0.0, 0.0)).is_ok());

        surface.remove_annotation(handle).unwrap();
        assert!(surface.remove_annotation(handle).is_err());
        assert_eq!(probe.annotation_count(), 0);
    }

    #[test]
    fn test_clusters_use_configured_options() {
        let mut surface = MemorySurface::new();
        let probe = surface.probe();
        surface.initialize().unwrap();
        surface.add_annotation(&annotation("a")).unwrap();
        surface.add_annotation(&annotation("b")).unwrap();

        assert_eq!(probe.clusters(5.0).len(), 1);

        surface
            .set_clustering(&ClusteringOptions::new(false, 50, 14))
            .unwrap();
        assert_eq!(probe.clusters(5.0).len(), 2);
    }
}
