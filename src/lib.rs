//! # navmarkers
//!
//! Live map markers for navigation views: batched creation, throttled and
//! coalesced position updates, self-healing for updates that arrive before
//! their marker, asynchronous icon and avatar loading with LRU caches, and
//! a readiness gate that queues operations until the map surface can take
//! annotations.
//!
//! Rendering is delegated to a [`MapSurface`] implementation; the crate
//! ships a headless [`MemorySurface`](surface::MemorySurface).

pub mod bridge;
pub mod controller;
pub mod core;
pub mod icons;
pub mod markers;
pub mod prelude;
pub mod runtime;
pub mod spatial;
pub mod surface;
pub use crate::core::constants;

// Re-export public API
pub use crate::core::{
    config::{MarkerOptions, MarkerPerformanceProfile},
    geo::LatLng,
};

pub use bridge::{MarkerChannel, MethodCall, SurfaceContext};
pub use controller::MarkerController;
pub use icons::{AvatarComposer, IconResolver, IconSource, MarkerColor};
pub use markers::{
    ClusteringOptions, MarkerManager, MarkerOperation, MarkerSpec, MarkerState, MarkerUpdate,
};
pub use surface::{MapSurface, ReadinessState};

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, MarkerError>;

/// Common error types
#[derive(Debug, thiserror::Error)]
pub enum MarkerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Base64 decode error: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    #[error("Invalid marker: {0}")]
    InvalidMarker(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    #[error("Surface error: {0}")]
    Surface(String),

    #[error("Surface unavailable: {0}")]
    SurfaceUnavailable(String),

    #[error("Pending operation queue full ({0} queued)")]
    QueueFull(usize),

    #[error("Cancelled: {0}")]
    Cancelled(String),
}

/// Error type alias for convenience
pub type Error = MarkerError;

/// Install `env_logger` with an `info` default filter. Safe to call more
/// than once; later calls are ignored.
#[cfg(feature = "debug")]
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}
