pub mod adapter;
pub mod memory;
pub mod readiness;
pub mod worker;

pub use adapter::{Annotation, AnnotationHandle, MapSurface};
pub use memory::{MemoryProbe, MemorySurface, RenderedAnnotation, SurfaceEvent};
pub use readiness::{ReadinessState, RetryPolicy};
pub use worker::{SurfaceHandle, SurfaceWorker};
