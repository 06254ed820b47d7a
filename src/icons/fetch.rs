use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fxhash::FxHashMap;
use once_cell::sync::Lazy;

use crate::core::constants::FETCH_TIMEOUT_SECS;
use crate::{MarkerError, Result};

/// Shared async HTTP client for icon and avatar downloads. Building the
/// client once avoids TLS and connection pool setup for every marker.
pub(crate) static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .user_agent(concat!("navmarkers/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
        .pool_idle_timeout(Duration::from_secs(90))
        .build()
        .unwrap_or_else(|e| {
            log::warn!("falling back to default HTTP client: {}", e);
            reqwest::Client::new()
        })
});

/// Fetches raw image bytes from a network URL
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Reads raw image bytes from the bundled-resource namespace
#[async_trait]
pub trait AssetSource: Send + Sync {
    async fn read(&self, path: &str) -> Result<Vec<u8>>;
}

/// reqwest-backed fetcher
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher;

#[async_trait]
impl ImageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = HTTP_CLIENT.get(url).send().await?;

        if !response.status().is_success() {
            return Err(MarkerError::Http {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let bytes = response.bytes().await?;
        log::debug!("downloaded {} ({} bytes)", url, bytes.len());
        Ok(bytes.to_vec())
    }
}

/// Assets read from a directory on disk
#[derive(Debug, Clone)]
pub struct DirectoryAssets {
    root: PathBuf,
}

impl DirectoryAssets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve an asset path below the root, refusing anything that would
    /// escape it.
    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            None
        } else {
            Some(self.root.join(relative))
        }
    }
}

#[async_trait]
impl AssetSource for DirectoryAssets {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full = self
            .resolve(path)
            .ok_or_else(|| MarkerError::AssetNotFound(path.to_string()))?;

        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(MarkerError::AssetNotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Assets compiled into or registered with the host at startup
#[derive(Debug, Clone, Default)]
pub struct StaticAssets {
    assets: FxHashMap<String, Arc<Vec<u8>>>,
}

impl StaticAssets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_asset(mut self, path: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.insert(path, bytes);
        self
    }

    pub fn insert(&mut self, path: impl Into<String>, bytes: Vec<u8>) {
        self.assets.insert(path.into(), Arc::new(bytes));
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

#[async_trait]
impl AssetSource for StaticAssets {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.assets
            .get(path)
            .map(|bytes| bytes.as_ref().clone())
            .ok_or_else(|| MarkerError::AssetNotFound(path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_assets() {
        let assets = StaticAssets::new().with_asset("icons/pin.png", vec![1, 2, 3]);
        assert_eq!(assets.read("icons/pin.png").await.unwrap(), vec![1, 2, 3]);
        assert!(matches!(
            assets.read("icons/missing.png").await,
            Err(MarkerError::AssetNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_directory_assets() {
        let root = std::env::temp_dir().join(format!("navmarkers-assets-{}", std::process::id()));
        tokio::fs::create_dir_all(root.join("icons")).await.unwrap();
        tokio::fs::write(root.join("icons/pin.png"), [9u8, 8, 7])
            .await
            .unwrap();

        let assets = DirectoryAssets::new(&root);
        assert_eq!(assets.read("icons/pin.png").await.unwrap(), vec![9, 8, 7]);
        assert_eq!(assets.read("/icons/pin.png").await.unwrap(), vec![9, 8, 7]);
        assert!(matches!(
            assets.read("icons/none.png").await,
            Err(MarkerError::AssetNotFound(_))
        ));
        assert!(matches!(
            assets.read("../etc/passwd").await,
            Err(MarkerError::AssetNotFound(_))
        ));

        let _ = tokio::fs::remove_dir_all(&root).await;
    }
}
