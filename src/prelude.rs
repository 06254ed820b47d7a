//! Prelude module for common navmarkers types and traits
//!
//! This module re-exports the most commonly used types, traits, and functions
//! for easy importing with `use navmarkers::prelude::*;`

pub use crate::core::{
    config::{
        BatchConfig, IconCacheConfig, MarkerOptions, MarkerPerformanceProfile, ReadinessConfig,
        ThrottleConfig,
    },
    geo::{LatLng, Point},
};

pub use crate::bridge::{MarkerChannel, MarkerMethod, MethodCall, SurfaceContext};

pub use crate::controller::MarkerController;

pub use crate::icons::{
    AssetSource, AvatarComposer, BitmapCache, DirectoryAssets, HttpFetcher, IconRequest,
    IconResolver, IconSource, ImageFetcher, MarkerBitmap, MarkerColor, StaticAssets,
};

pub use crate::markers::{
    ClusteringOptions, MarkerManager, MarkerOperation, MarkerSpec, MarkerState, MarkerStore,
    MarkerUpdate, UpdateThrottler,
};

pub use crate::spatial::{cluster_markers, Cluster};

pub use crate::surface::{
    Annotation, AnnotationHandle, MapSurface, MemoryProbe, MemorySurface, ReadinessState,
    RenderedAnnotation, RetryPolicy, SurfaceEvent, SurfaceHandle, SurfaceWorker,
};

pub use crate::runtime::{async_delay, execute_blocking, spawn, spawn_delayed};

pub use crate::{MarkerError, Result};

// Common external types
pub use std::sync::Arc;
pub use std::time::Duration;
