pub mod avatar;
pub mod cache;
pub mod draw;
pub mod fetch;
pub mod resolver;
pub mod source;

// Re-exports for convenience
pub use avatar::AvatarComposer;
pub use cache::{BitmapCache, MarkerBitmap};
pub use fetch::{AssetSource, DirectoryAssets, HttpFetcher, ImageFetcher, StaticAssets};
pub use resolver::IconResolver;
pub use source::{IconRequest, IconSource, MarkerColor};
