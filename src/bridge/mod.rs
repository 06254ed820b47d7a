pub mod channel;

pub use channel::{MarkerChannel, MarkerMethod, MethodCall, SurfaceContext};
