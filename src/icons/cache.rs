use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use image::RgbaImage;
use lru::LruCache;

/// A decoded, ready-to-render marker bitmap. Shared, never mutated after
/// creation.
pub type MarkerBitmap = Arc<RgbaImage>;

/// In-memory bitmap cache using LRU eviction
///
/// Safe for concurrent get/put from multiple background load tasks. Entries
/// are replaced, never mutated.
#[derive(Debug)]
pub struct BitmapCache<K: Hash + Eq> {
    cache: Arc<Mutex<LruCache<K, MarkerBitmap>>>,
}

impl<K: Hash + Eq> BitmapCache<K> {
    /// Create a new cache with the given capacity (at least one entry)
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    /// Get a bitmap, marking it most recently used
    pub fn get(&self, key: &K) -> Option<MarkerBitmap> {
        self.cache.lock().ok()?.get(key).cloned()
    }

    /// Insert a bitmap, evicting the least recently used entry when full
    pub fn insert(&self, key: K, bitmap: MarkerBitmap) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(key, bitmap);
        }
    }

    /// Check presence without touching recency
    pub fn contains(&self, key: &K) -> bool {
        self.cache
            .lock()
            .ok()
            .map(|cache| cache.contains(key))
            .unwrap_or(false)
    }

    pub fn remove(&self, key: &K) -> Option<MarkerBitmap> {
        self.cache.lock().ok()?.pop(key)
    }

    pub fn clear(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.cache.lock().ok().map(|cache| cache.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.cache
            .lock()
            .ok()
            .map(|cache| cache.cap().get())
            .unwrap_or(0)
    }
}

impl<K: Hash + Eq> Clone for BitmapCache<K> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
        }
    }
}
