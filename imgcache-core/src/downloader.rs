use std::sync::Arc;

use tracing::debug;

use crate::{
    codec::{Image, ImageCodec, RasterCodec},
    color::ColorValue,
    config::CacheConfig,
    coordinator::{EntryKind, FetchCoordinator},
    error::Result,
    key::ImageKey,
    stats::FetchStatsSnapshot,
    transport::{HttpTransport, ImageTransport},
};

/// Application-facing handle to one fetch coordinator.
///
/// Build one at the composition root and clone it into whatever needs
/// images; clones share the same caches and in-flight fetches.
#[derive(Debug, Clone)]
pub struct ImageDownloader {
    inner: Arc<FetchCoordinator>,
}

impl ImageDownloader {
    /// HTTP transport and the `image`-crate codec, configured from `config`.
    pub fn new(config: CacheConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    pub fn builder() -> ImageDownloaderBuilder {
        ImageDownloaderBuilder::default()
    }

    pub fn coordinator(&self) -> &FetchCoordinator {
        &self.inner
    }

    pub async fn download(&self, key: &ImageKey) -> Result<Image> {
        self.inner.download(key).await
    }

    /// Parse `url` and download it.
    pub async fn download_url(&self, url: &str) -> Result<Image> {
        let key = ImageKey::parse(url)?;
        self.inner.download(&key).await
    }

    pub async fn cancel(&self, key: &ImageKey) {
        self.inner.cancel(key).await
    }

    pub async fn download_and_cache(&self, keys: &[ImageKey]) -> Result<()> {
        self.inner.download_and_cache(keys).await
    }

    pub async fn clear_cache(&self, keys: &[ImageKey]) {
        self.inner.clear_cache(keys).await
    }

    pub async fn color_for(&self, key: &ImageKey) -> Option<ColorValue> {
        self.inner.color_for(key).await
    }

    pub async fn state_of(&self, key: &ImageKey) -> Option<EntryKind> {
        self.inner.state_of(key).await
    }

    pub fn stats(&self) -> FetchStatsSnapshot {
        self.inner.stats()
    }
}

#[derive(Default)]
pub struct ImageDownloaderBuilder {
    config: CacheConfig,
    transport: Option<Arc<dyn ImageTransport>>,
    codec: Option<Arc<dyn ImageCodec>>,
}

impl std::fmt::Debug for ImageDownloaderBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageDownloaderBuilder")
            .field("config", &self.config)
            .field("custom_transport", &self.transport.is_some())
            .field("custom_codec", &self.codec.is_some())
            .finish()
    }
}

impl ImageDownloaderBuilder {
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn ImageTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn codec(mut self, codec: Arc<dyn ImageCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn build(self) -> Result<ImageDownloader> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(self.config.request_timeout)?),
        };
        let codec = self
            .codec
            .unwrap_or_else(|| Arc::new(RasterCodec::new()));

        debug!(
            disk_dir = ?self.config.disk_dir,
            strict_disk_writes = self.config.strict_disk_writes,
            max_concurrent_fetches = self.config.max_concurrent_fetches,
            "image downloader ready"
        );

        Ok(ImageDownloader {
            inner: Arc::new(FetchCoordinator::new(transport, codec, &self.config)),
        })
    }
}
