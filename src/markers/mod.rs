pub mod manager;
pub mod operation;
pub mod spec;
pub mod store;
pub mod throttle;

// Re-exports for convenience
pub use manager::MarkerManager;
pub use operation::MarkerOperation;
pub use spec::{parse_markers, parse_updates, ClusteringOptions, MarkerSpec, MarkerUpdate};
pub use store::{MarkerState, MarkerStore};
pub use throttle::{ThrottleDecision, ThrottleState, UpdateThrottler};
