use std::sync::{Arc, Mutex};

use base64::{engine::general_purpose, Engine};
use fxhash::FxHashMap;
use image::DynamicImage;

use crate::core::constants::DEFAULT_MARKER_STROKE;
use crate::icons::{
    cache::{BitmapCache, MarkerBitmap},
    draw,
    fetch::{AssetSource, HttpFetcher, ImageFetcher, StaticAssets},
    source::{clamp_dimension, IconKey, IconRequest, IconSource, MarkerColor},
};
use crate::runtime::execute_blocking;
use crate::{MarkerError, Result};

type KeyGate = Arc<tokio::sync::Mutex<()>>;

/// Loads marker icons from network URLs, bundled assets, inline base64
/// strings, or synthesizes a default dot, and caches the resized result.
///
/// Concurrent resolves for the same key are serialized on a per-key gate so
/// only the first performs I/O; the rest are served from the cache it fills.
pub struct IconResolver {
    cache: BitmapCache<IconKey>,
    fetcher: Arc<dyn ImageFetcher>,
    assets: Arc<dyn AssetSource>,
    in_flight: Mutex<FxHashMap<IconKey, KeyGate>>,
}

impl IconResolver {
    pub fn new(
        capacity: usize,
        fetcher: Arc<dyn ImageFetcher>,
        assets: Arc<dyn AssetSource>,
    ) -> Self {
        Self {
            cache: BitmapCache::new(capacity),
            fetcher,
            assets,
            in_flight: Mutex::new(FxHashMap::default()),
        }
    }

    /// HTTP fetching and an empty asset bundle
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(
            capacity,
            Arc::new(HttpFetcher),
            Arc::new(StaticAssets::new()),
        )
    }

    pub fn cache(&self) -> &BitmapCache<IconKey> {
        &self.cache
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Resolve a bitmap for the request, consulting the cache first
    pub async fn resolve(&self, request: &IconRequest) -> Result<MarkerBitmap> {
        let key = request.key();
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }

        if request.source == IconSource::DefaultIcon {
            return Ok(self.default_bitmap(request.width, request.height, request.color));
        }

        let gate = self.gate(&key);
        let result = {
            let _guard = gate.lock().await;
            // Another resolve may have filled the cache while we waited
            match self.cache.get(&key) {
                Some(hit) => Ok(hit),
                None => self.load(request).await.map(|bitmap| {
                    self.cache.insert(key.clone(), bitmap.clone());
                    bitmap
                }),
            }
        };
        self.release(&key, &gate);

        if let Err(e) = &result {
            log::warn!("icon {:?} failed to load: {}", request.source, e);
        }
        result
    }

    /// Synthesized filled circle with a white border. Never fails; the
    /// size is clamped like every other icon request.
    pub fn default_bitmap(
        &self,
        width: u32,
        height: u32,
        color: Option<MarkerColor>,
    ) -> MarkerBitmap {
        let key = IconRequest::default_dot(width, height, color).key();
        if let Some(hit) = self.cache.get(&key) {
            return hit;
        }
        let bitmap = Arc::new(draw::default_marker(
            key.width,
            key.height,
            color.unwrap_or_default(),
            DEFAULT_MARKER_STROKE,
        ));
        self.cache.insert(key, bitmap.clone());
        bitmap
    }

    /// Fetch and decode a network image without resizing or caching it.
    /// Used by the avatar composer, which keeps its own cache.
    pub async fn fetch_image(&self, url: &str) -> Result<DynamicImage> {
        let bytes = self.fetcher.fetch(url).await?;
        execute_blocking(move || Ok(image::load_from_memory(&bytes)?)).await
    }

    async fn load(&self, request: &IconRequest) -> Result<MarkerBitmap> {
        let bytes = match request.source {
            IconSource::NetworkUrl => self.fetcher.fetch(payload(request)?).await?,
            IconSource::AssetPath => self.assets.read(payload(request)?).await?,
            IconSource::Base64 => decode_inline(payload(request)?)?,
            IconSource::DefaultIcon => {
                return Ok(self.default_bitmap(request.width, request.height, request.color))
            }
        };

        let (width, height) = (clamp_dimension(request.width), clamp_dimension(request.height));
        execute_blocking(move || {
            let decoded = image::load_from_memory(&bytes)?;
            Ok(Arc::new(draw::resize_exact(&decoded, width, height)))
        })
        .await
    }

    fn gate(&self, key: &IconKey) -> KeyGate {
        match self.in_flight.lock() {
            Ok(mut in_flight) => in_flight.entry(key.clone()).or_default().clone(),
            Err(_) => KeyGate::default(),
        }
    }

    fn release(&self, key: &IconKey, gate: &KeyGate) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            // The map holds one reference and we hold another; anything more
            // means a waiter will release it later.
            let idle = in_flight
                .get(key)
                .map(|current| Arc::ptr_eq(current, gate) && Arc::strong_count(gate) <= 2)
                .unwrap_or(false);
            if idle {
                in_flight.remove(key);
            }
        }
    }

    #[cfg(test)]
    fn in_flight_len(&self) -> usize {
        self.in_flight.lock().map(|m| m.len()).unwrap_or(0)
    }
}

fn payload(request: &IconRequest) -> Result<&str> {
    request
        .data
        .as_deref()
        .filter(|data| !data.is_empty())
        .ok_or_else(|| {
            MarkerError::InvalidMarker(format!("{:?} icon requires iconData", request.source))
        })
}

/// Decode an inline base64 payload, tolerating a `data:<mime>;base64,`
/// prefix and embedded whitespace.
pub fn decode_inline(payload: &str) -> Result<Vec<u8>> {
    let body = match payload.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map(|(_, body)| body).unwrap_or(rest),
        None => payload,
    };
    let compact: String = body.chars().filter(|c| !c.is_whitespace()).collect();

    general_purpose::STANDARD
        .decode(&compact)
        .or_else(|_| general_purpose::STANDARD_NO_PAD.decode(&compact))
        .map_err(MarkerError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constants::MAX_ICON_DIMENSION;
    use async_trait::async_trait;
    use image::{Rgba, RgbaImage};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn png(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba(color)))
            .write_to(&mut Cursor::new(&mut bytes), image::ImageOutputFormat::Png)
            .unwrap();
        bytes
    }

    struct CountingFetcher {
        body: Vec<u8>,
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl ImageFetcher for CountingFetcher {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if url.contains("missing") {
                return Err(MarkerError::Http {
                    status: 404,
                    url: url.to_string(),
                });
            }
            Ok(self.body.clone())
        }
    }

    fn resolver(delay: Duration) -> (IconResolver, Arc<CountingFetcher>) {
        let fetcher = Arc::new(CountingFetcher {
            body: png(8, 8, [0, 128, 0, 255]),
            calls: AtomicUsize::new(0),
            delay,
        });
        let assets = StaticAssets::new().with_asset("pins/red.png", png(4, 4, [255, 0, 0, 255]));
        let resolver = IconResolver::new(50, fetcher.clone(), Arc::new(assets));
        (resolver, fetcher)
    }

    #[tokio::test]
    async fn test_network_icon_is_cached() {
        let (resolver, fetcher) = resolver(Duration::ZERO);
        let request = IconRequest::new(IconSource::NetworkUrl, Some("https://x/pin.png".into()))
            .with_size(32, 24);

        let first = resolver.resolve(&request).await.unwrap();
        let second = resolver.resolve(&request).await.unwrap();

        assert_eq!(first.dimensions(), (32, 24));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_resolves_share_one_fetch() {
        let (resolver, fetcher) = resolver(Duration::from_millis(30));
        let resolver = Arc::new(resolver);
        let request = IconRequest::new(IconSource::NetworkUrl, Some("https://x/pin.png".into()));

        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let resolver = resolver.clone();
                let request = request.clone();
                tokio::spawn(async move { resolver.resolve(&request).await })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.in_flight_len(), 0);
    }

    #[tokio::test]
    async fn test_asset_and_base64_sources() {
        let (resolver, _) = resolver(Duration::ZERO);

        let asset = IconRequest::new(IconSource::AssetPath, Some("pins/red.png".into()));
        let bitmap = resolver.resolve(&asset).await.unwrap();
        assert_eq!(bitmap.dimensions(), (40, 40));
        assert_eq!(*bitmap.get_pixel(20, 20), Rgba([255, 0, 0, 255]));

        let encoded = general_purpose::STANDARD.encode(png(2, 2, [0, 0, 255, 255]));
        let inline = IconRequest::new(
            IconSource::Base64,
            Some(format!("data:image/png;base64,{}", encoded)),
        )
        .with_size(10, 10);
        let bitmap = resolver.resolve(&inline).await.unwrap();
        assert_eq!(bitmap.dimensions(), (10, 10));
        assert_eq!(*bitmap.get_pixel(5, 5), Rgba([0, 0, 255, 255]));
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let (resolver, fetcher) = resolver(Duration::ZERO);

        let missing = IconRequest::new(IconSource::NetworkUrl, Some("https://x/missing.png".into()));
        assert!(resolver.resolve(&missing).await.is_err());
        assert!(resolver.resolve(&missing).await.is_err());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);

        let no_asset = IconRequest::new(IconSource::AssetPath, Some("pins/none.png".into()));
        assert!(matches!(
            resolver.resolve(&no_asset).await,
            Err(MarkerError::AssetNotFound(_))
        ));

        let bad_inline = IconRequest::new(IconSource::Base64, Some("***".into()));
        assert!(resolver.resolve(&bad_inline).await.is_err());

        let no_payload = IconRequest::new(IconSource::NetworkUrl, None);
        assert!(matches!(
            resolver.resolve(&no_payload).await,
            Err(MarkerError::InvalidMarker(_))
        ));

        assert!(resolver.cache().is_empty());
    }

    #[tokio::test]
    async fn test_default_icon_always_succeeds() {
        let (resolver, fetcher) = resolver(Duration::ZERO);
        let request = IconRequest::default_dot(40, 40, Some(MarkerColor(0xFF0000)));

        let bitmap = resolver.resolve(&request).await.unwrap();
        assert_eq!(bitmap.dimensions(), (40, 40));
        assert_eq!(*bitmap.get_pixel(20, 20), Rgba([255, 0, 0, 255]));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(resolver.cache().len(), 1);
    }

    #[tokio::test]
    async fn test_oversized_default_dot_is_clamped() {
        let (resolver, _) = resolver(Duration::ZERO);
        let bitmap = resolver.default_bitmap(u32::MAX, u32::MAX, None);
        assert_eq!(bitmap.dimensions(), (MAX_ICON_DIMENSION, MAX_ICON_DIMENSION));

        let again = resolver.default_bitmap(MAX_ICON_DIMENSION, MAX_ICON_DIMENSION, None);
        assert!(Arc::ptr_eq(&bitmap, &again));
    }

    #[test]
    fn test_decode_inline_variants() {
        let raw = vec![1u8, 2, 3, 4, 5];
        let encoded = general_purpose::STANDARD.encode(&raw);
        assert_eq!(decode_inline(&encoded).unwrap(), raw);
        assert_eq!(
            decode_inline(&format!("data:image/png;base64,{}", encoded)).unwrap(),
            raw
        );
        assert_eq!(decode_inline(encoded.trim_end_matches('=')).unwrap(), raw);
        assert!(decode_inline("not base64!").is_err());
    }
}
