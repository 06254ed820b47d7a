use std::sync::Arc;

use crate::core::constants::{AVATAR_BORDER_WIDTH, AVATAR_PADDING};
use crate::icons::{
    cache::{BitmapCache, MarkerBitmap},
    draw,
    resolver::IconResolver,
    source::{clamp_dimension, AvatarKey, MarkerColor},
};
use crate::runtime::execute_blocking;
use crate::Result;

/// Builds circular "dot with avatar inside" bitmaps.
///
/// Raw avatars are fetched through the icon resolver's network path but
/// composed results live in a separate, larger cache keyed by
/// (url, size, color): composition costs more than decoding, and the
/// marker color is baked into the result.
pub struct AvatarComposer {
    cache: BitmapCache<AvatarKey>,
    resolver: Arc<IconResolver>,
    border: f32,
    padding: f32,
}

impl AvatarComposer {
    pub fn new(capacity: usize, resolver: Arc<IconResolver>) -> Self {
        Self {
            cache: BitmapCache::new(capacity),
            resolver,
            border: AVATAR_BORDER_WIDTH,
            padding: AVATAR_PADDING,
        }
    }

    pub fn cache(&self) -> &BitmapCache<AvatarKey> {
        &self.cache
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Compose the avatar at `url` into a `size` x `size` dot of `color`.
    /// A failed fetch fails the composition; nothing is cached for it.
    pub async fn compose(&self, url: &str, size: u32, color: MarkerColor) -> Result<MarkerBitmap> {
        let size = clamp_dimension(size);
        let key = AvatarKey {
            url: url.to_string(),
            size,
            color,
        };
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }

        let avatar = self.resolver.fetch_image(url).await.map_err(|e| {
            log::warn!("avatar {} failed to load: {}", url, e);
            e
        })?;

        let (border, padding) = (self.border, self.padding);
        let composed = execute_blocking(move || {
            Ok(Arc::new(draw::compose_avatar(
                &avatar, size, color, border, padding,
            )))
        })
        .await?;

        self.cache.insert(key, composed.clone());
        log::debug!("composed avatar {} at {}px", url, size);
        Ok(composed)
    }
}
