#![allow(dead_code)]

use std::{
    collections::HashMap,
    io::Cursor,
    sync::{
        Arc, Barrier, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use imgcache_core::{
    CacheConfig, ColorValue, EntryKind, FetchError, Image, ImageCodec,
    ImageDownloader, ImageKey, ImageTransport, RasterCodec, Result,
};
use tokio::sync::Semaphore;
use url::Url;

pub fn png_bytes(px: [u8; 4]) -> Vec<u8> {
    let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(3, 2, Rgba(px)));
    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .unwrap();
    out
}

pub fn key(url: &str) -> ImageKey {
    ImageKey::parse(url).unwrap()
}

/// In-memory transport keyed by URL path, counting every request.
///
/// With a gate installed every request parks until [`MockTransport::release`]
/// hands out a permit.
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<String, Result<Vec<u8>>>>,
    calls: Mutex<HashMap<String, usize>>,
    total: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::default()
        }
    }

    pub fn route(self, path: &str, response: Result<Vec<u8>>) -> Self {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), response);
        self
    }

    pub fn set_route(&self, path: &str, response: Result<Vec<u8>>) {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), response);
    }

    pub fn calls_for(&self, path: &str) -> usize {
        self.calls.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    /// Yield until at least `n` requests have reached the transport.
    pub async fn wait_for_calls(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.total_calls() < n {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("transport never reached the expected call count");
    }
}

#[async_trait::async_trait]
impl ImageTransport for MockTransport {
    async fn get(&self, url: &Url) -> Result<Vec<u8>> {
        let path = url.path().to_string();
        *self.calls.lock().unwrap().entry(path.clone()).or_default() += 1;
        self.total.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .expect("gate closed")
                .forget();
        }

        self.routes
            .lock()
            .unwrap()
            .get(&path)
            .cloned()
            .unwrap_or_else(|| Err(FetchError::Network(format!("HTTP 404: {url}"))))
    }
}

/// Real codec that counts how often each operation runs.
///
/// [`CountingCodec::hold_decode_of`] parks the next decode of specific bytes
/// on a blocking thread until the returned barrier is passed.
#[derive(Default)]
pub struct CountingCodec {
    inner: RasterCodec,
    pub decodes: AtomicUsize,
    pub encodes: AtomicUsize,
    pub color_samples: AtomicUsize,
    hold: Mutex<Option<(Vec<u8>, Arc<Barrier>)>>,
}

impl CountingCodec {
    pub fn color_samples(&self) -> usize {
        self.color_samples.load(Ordering::SeqCst)
    }

    pub fn encodes(&self) -> usize {
        self.encodes.load(Ordering::SeqCst)
    }

    pub fn hold_decode_of(&self, bytes: &[u8]) -> Arc<Barrier> {
        let barrier = Arc::new(Barrier::new(2));
        *self.hold.lock().unwrap() = Some((bytes.to_vec(), barrier.clone()));
        barrier
    }

    pub async fn wait_for_decodes(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.decodes.load(Ordering::SeqCst) < n {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("codec never reached the expected decode count");
    }
}

impl ImageCodec for CountingCodec {
    fn decode(&self, bytes: &[u8]) -> Result<Image> {
        self.decodes.fetch_add(1, Ordering::SeqCst);
        let held = {
            let mut hold = self.hold.lock().unwrap();
            match hold.as_ref() {
                Some((held, _)) if held.as_slice() == bytes => {
                    hold.take().map(|(_, barrier)| barrier)
                }
                _ => None,
            }
        };
        if let Some(barrier) = held {
            barrier.wait();
        }
        self.inner.decode(bytes)
    }

    fn encode(&self, image: &Image) -> Result<Vec<u8>> {
        self.encodes.fetch_add(1, Ordering::SeqCst);
        self.inner.encode(image)
    }

    fn average_color(&self, image: &Image) -> Option<ColorValue> {
        self.color_samples.fetch_add(1, Ordering::SeqCst);
        self.inner.average_color(image)
    }
}

pub struct Harness {
    pub downloader: ImageDownloader,
    pub transport: Arc<MockTransport>,
    pub codec: Arc<CountingCodec>,
}

pub fn harness(transport: MockTransport, config: CacheConfig) -> Harness {
    let transport = Arc::new(transport);
    let codec = Arc::new(CountingCodec::default());
    let downloader = ImageDownloader::builder()
        .config(config)
        .transport(transport.clone())
        .codec(codec.clone())
        .build()
        .unwrap();
    Harness {
        downloader,
        transport,
        codec,
    }
}

/// Yield until the memory-tier state of `key` equals `want`.
pub async fn wait_for_state(
    downloader: &ImageDownloader,
    key: &ImageKey,
    want: Option<EntryKind>,
) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while downloader.state_of(key).await != want {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("entry never reached the expected state");
}

/// Let one parked request through once the transport has seen `calls`.
pub async fn release_after(transport: &MockTransport, calls: usize) {
    transport.wait_for_calls(calls).await;
    transport.release(1);
}
