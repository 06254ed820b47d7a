//! Shared fixtures for the scenario tests
#![allow(dead_code)]

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use image::{DynamicImage, Rgba, RgbaImage};

use navmarkers::icons::{ImageFetcher, StaticAssets};
use navmarkers::prelude::*;

pub const RED: [u8; 4] = [255, 0, 0, 255];
pub const GREEN: [u8; 4] = [0, 160, 0, 255];

/// Default marker blue as drawn
pub const DEFAULT_BLUE: Rgba<u8> = Rgba([0x21, 0x96, 0xF3, 255]);

pub fn png(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba(color)))
        .write_to(&mut Cursor::new(&mut bytes), image::ImageOutputFormat::Png)
        .unwrap();
    bytes
}

/// Serves a green square for icon URLs and a red square for avatar URLs.
/// URLs containing "broken" fail. Counts every fetch.
pub struct CountingFetcher {
    calls: AtomicUsize,
}

impl CountingFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageFetcher for CountingFetcher {
    async fn fetch(&self, url: &str) -> navmarkers::Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        if url.contains("broken") {
            return Err(MarkerError::Http {
                status: 404,
                url: url.to_string(),
            });
        }
        if url.contains("avatar") {
            Ok(png(16, 16, RED))
        } else {
            Ok(png(8, 8, GREEN))
        }
    }
}

pub fn assets() -> Arc<StaticAssets> {
    Arc::new(StaticAssets::new().with_asset("pins/red.png", png(4, 4, RED)))
}

pub struct Harness {
    pub manager: MarkerManager,
    pub probe: MemoryProbe,
    pub fetcher: Arc<CountingFetcher>,
}

/// A manager on an initialized in-memory surface
pub async fn harness() -> Harness {
    navmarkers::init_logging();
    let surface = MemorySurface::new();
    let probe = surface.probe();
    let (handle, _) = SurfaceWorker::spawn(Box::new(surface));
    handle.initialize().await.unwrap();

    let options = MarkerOptions::for_testing();
    let fetcher = CountingFetcher::new();
    let icons = Arc::new(IconResolver::new(
        options.cache.icon_capacity,
        fetcher.clone(),
        assets(),
    ));
    let avatars = Arc::new(AvatarComposer::new(
        options.cache.avatar_capacity,
        icons.clone(),
    ));

    Harness {
        manager: MarkerManager::new(options, handle, icons, avatars),
        probe,
        fetcher,
    }
}

/// A controller using the counting fetcher, with nothing attached yet
pub fn controller() -> (MarkerController, Arc<CountingFetcher>) {
    navmarkers::init_logging();
    let fetcher = CountingFetcher::new();
    let controller =
        MarkerController::with_sources(MarkerOptions::for_testing(), fetcher.clone(), assets());
    (controller, fetcher)
}

pub fn surface() -> (Box<dyn MapSurface>, MemoryProbe) {
    let surface = MemorySurface::new();
    let probe = surface.probe();
    (Box::new(surface), probe)
}

pub fn marker(id: &str, lat: f64, lng: f64) -> MarkerSpec {
    MarkerSpec::new(id, LatLng::new(lat, lng))
}

/// Roughly `meters` north of `origin`
pub fn north_of(origin: LatLng, meters: f64) -> LatLng {
    LatLng::new(origin.lat + meters / 111_195.0, origin.lng)
}
