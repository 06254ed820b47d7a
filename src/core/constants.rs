//! Core constants for marker rendering and update coalescing.
//! Keeping them in a single place makes it easier to tweak engine-wide magic numbers.

/// Default square tile size in pixels, used for pixel-space projections.
pub const TILE_SIZE: u32 = 256;

/// Mean earth radius for Haversine distances.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Marker icon default size in device-independent pixels.
pub const DEFAULT_ICON_SIZE: (u32, u32) = (40, 40);

/// Largest icon or avatar edge; requested sizes are clamped to this.
pub const MAX_ICON_DIMENSION: u32 = 512;

/// Fill color of synthesized default markers (packed RGB).
pub const DEFAULT_MARKER_COLOR: u32 = 0x2196F3;

/// Stroke width of the white ring around synthesized default markers.
pub const DEFAULT_MARKER_STROKE: f32 = 2.0;

/// Number of markers attached per render batch during `add`.
pub const ADD_BATCH_SIZE: usize = 10;

/// Minimum interval between applied batches of position updates.
pub const THROTTLE_WINDOW_MS: u64 = 100;

/// Buffered updates moving less than this are dropped as noise.
pub const MIN_MOTION_METERS: f64 = 5.0;

/// Capacity of the decoded icon cache.
pub const ICON_CACHE_CAPACITY: usize = 50;

/// Capacity of the composed avatar cache.
pub const AVATAR_CACHE_CAPACITY: usize = 150;

/// White ring drawn around avatars.
pub const AVATAR_BORDER_WIDTH: f32 = 3.0;

/// Gap between the avatar ring and the clipped avatar image.
pub const AVATAR_PADDING: f32 = 2.0;

/// Surface initialization attempts before the readiness gate gives up.
pub const READINESS_MAX_ATTEMPTS: u32 = 5;

/// Fixed delay between surface initialization attempts.
pub const READINESS_RETRY_DELAY_MS: u64 = 500;

/// Upper bound on operations queued while the surface is not ready.
pub const MAX_PENDING_OPERATIONS: usize = 1000;

/// Clustering defaults applied when fields are omitted.
pub const DEFAULT_CLUSTER_RADIUS: u32 = 50;
pub const DEFAULT_CLUSTER_MAX_ZOOM: u32 = 14;

/// Timeout applied to avatar/icon downloads.
pub const FETCH_TIMEOUT_SECS: u64 = 10;
