pub mod clustering;

pub use clustering::{cluster_markers, Cluster};
