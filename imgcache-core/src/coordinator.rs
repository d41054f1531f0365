//! Single-flight fetch coordinator.
//!
//! One [`FetchCoordinator`] owns the memory tier (task states) and the colour
//! cache behind a single mutex, so every check-then-act sequence over either
//! map is atomic with respect to other callers. Network work runs in spawned
//! tasks whose results are shared by every caller that asked for the key
//! while the fetch was in flight.

use std::{any::type_name_of_val, collections::HashMap, fmt, sync::Arc};

use futures::{
    FutureExt,
    future::{BoxFuture, Shared, join_all},
};
use tokio::{
    sync::{Mutex, Semaphore},
    task::AbortHandle,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    codec::{Image, ImageCodec},
    color::{ColorCache, ColorValue},
    config::CacheConfig,
    disk::DiskStore,
    error::{FetchError, Result},
    key::ImageKey,
    stats::{FetchStats, FetchStatsSnapshot},
    transport::ImageTransport,
};

type SharedFetch = Shared<BoxFuture<'static, Result<Image>>>;

/// Handle to a running fetch. Cloning it adds another waiter, not another fetch.
#[derive(Clone)]
struct InFlight {
    generation: u64,
    result: SharedFetch,
    abort: AbortHandle,
}

enum TaskState {
    InProgress(InFlight),
    Ready(Image),
}

/// Public view of a memory-tier entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    InProgress,
    Ready,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, TaskState>,
    colors: ColorCache,
    next_generation: u64,
}

impl CacheState {
    fn ready(&self, key: &str) -> Option<&Image> {
        match self.entries.get(key) {
            Some(TaskState::Ready(image)) => Some(image),
            _ => None,
        }
    }

    /// True while `key` still maps to the fetch tagged `generation`.
    fn is_current(&self, key: &str, generation: u64) -> bool {
        matches!(
            self.entries.get(key),
            Some(TaskState::InProgress(f)) if f.generation == generation
        )
    }

    fn forget(&mut self, key: &str) -> Option<TaskState> {
        self.colors.remove(key);
        self.entries.remove(key)
    }
}

enum Lookup {
    Ready(Image),
    Wait(InFlight),
}

/// State and collaborators shared with spawned fetch tasks, so a fetch can
/// settle its own cache entry even when every caller has gone away.
struct Inner {
    state: Mutex<CacheState>,
    disk: Option<DiskStore>,
    codec: Arc<dyn ImageCodec>,
    strict_disk_writes: bool,
    stats: FetchStats,
}

pub struct FetchCoordinator {
    inner: Arc<Inner>,
    transport: Arc<dyn ImageTransport>,
    permits: Arc<Semaphore>,
}

impl fmt::Debug for FetchCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self
            .inner
            .state
            .try_lock()
            .map(|guard| guard.entries.len())
            .unwrap_or(0);

        f.debug_struct("FetchCoordinator")
            .field("entries", &entries)
            .field("disk", &self.inner.disk)
            .field("transport", &type_name_of_val(self.transport.as_ref()))
            .field("codec", &type_name_of_val(self.inner.codec.as_ref()))
            .field("permits_available", &self.permits.available_permits())
            .field("strict_disk_writes", &self.inner.strict_disk_writes)
            .field("stats", &self.inner.stats.snapshot())
            .finish()
    }
}

impl FetchCoordinator {
    pub fn new(
        transport: Arc<dyn ImageTransport>,
        codec: Arc<dyn ImageCodec>,
        config: &CacheConfig,
    ) -> Self {
        if !config.allow_cache
            || config.count_limit > 0
            || config.total_cost_limit > 0
        {
            debug!(
                allow_cache = config.allow_cache,
                count_limit = config.count_limit,
                total_cost_limit = config.total_cost_limit,
                "memory cache limits are accepted but not enforced"
            );
        }

        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(CacheState::default()),
                disk: config.disk_dir.clone().map(DiskStore::new),
                codec,
                strict_disk_writes: config.strict_disk_writes,
                stats: FetchStats::default(),
            }),
            transport,
            permits: Arc::new(Semaphore::new(config.max_concurrent_fetches.max(1))),
        }
    }

    pub fn disk(&self) -> Option<&DiskStore> {
        self.inner.disk.as_ref()
    }

    pub fn stats(&self) -> FetchStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Memory-tier state for `key`, if any.
    pub async fn state_of(&self, key: &ImageKey) -> Option<EntryKind> {
        let state = self.inner.state.lock().await;
        state.entries.get(key.as_str()).map(|entry| match entry {
            TaskState::InProgress(_) => EntryKind::InProgress,
            TaskState::Ready(_) => EntryKind::Ready,
        })
    }

    /// Resolve `key` to an image: memory, then disk, then the in-flight fetch
    /// for the key, then a new network fetch.
    pub async fn download(&self, key: &ImageKey) -> Result<Image> {
        let id = key.as_str();
        let inner = &self.inner;

        {
            let state = inner.state.lock().await;
            if let Some(image) = state.ready(id) {
                inner.stats.on_memory_hit();
                debug!(key = %key, "image served from memory");
                return Ok(image.clone());
            }
        }

        if let Some(image) = inner.load_from_disk(key).await {
            inner.stats.on_disk_hit();
            debug!(key = %key, "image served from disk, promoting to memory");
            let color = inner.sample_color(key, &image).await;
            let mut state = inner.state.lock().await;
            state
                .entries
                .insert(id.to_string(), TaskState::Ready(image.clone()));
            match color {
                Ok(color) => state.colors.insert(id.to_string(), color),
                Err(_) => {
                    state.colors.remove(id);
                }
            }
            return Ok(image);
        }

        let lookup = {
            let mut state = inner.state.lock().await;

            // A handle that already holds a failure was never settled (its
            // task died); start over instead of replaying it.
            let stale = matches!(
                state.entries.get(id),
                Some(TaskState::InProgress(f)) if matches!(f.result.peek(), Some(Err(_)))
            );
            if stale {
                debug!(key = %key, "discarding failed fetch handle");
                state.forget(id);
            }

            let existing = match state.entries.get(id) {
                Some(TaskState::Ready(image)) => Some(Lookup::Ready(image.clone())),
                Some(TaskState::InProgress(inflight)) => {
                    let joins = inner.stats.on_join();
                    debug!(key = %key, generation = inflight.generation, joins, "joining in-flight fetch");
                    Some(Lookup::Wait(inflight.clone()))
                }
                None => None,
            };

            match existing {
                Some(lookup) => lookup,
                None => {
                    // Recorded before anyone awaits it so concurrent callers join.
                    let inflight = self.start_fetch(&mut state, key);
                    state.entries.insert(
                        id.to_string(),
                        TaskState::InProgress(inflight.clone()),
                    );
                    Lookup::Wait(inflight)
                }
            }
        };

        match lookup {
            Lookup::Ready(image) => {
                inner.persist(key, &image).await?;
                Ok(image)
            }
            Lookup::Wait(inflight) => self.await_fetch(key, inflight).await,
        }
    }

    /// Run `download` for every key concurrently. All downloads run to
    /// completion; the first failure (in input order) is returned.
    pub async fn download_and_cache(&self, keys: &[ImageKey]) -> Result<()> {
        let results = join_all(keys.iter().map(|key| self.download(key))).await;

        let mut first_error = None;
        for (key, result) in keys.iter().zip(results) {
            if let Err(err) = result {
                warn!(key = %key, "batch download failed: {err}");
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Forget `key`: abort its in-flight fetch (if any) and drop its memory
    /// and colour entries. The disk copy is kept.
    pub async fn cancel(&self, key: &ImageKey) {
        let mut state = self.inner.state.lock().await;
        match state.forget(key.as_str()) {
            Some(TaskState::InProgress(inflight)) => {
                inflight.abort.abort();
                self.inner.stats.on_cancel();
                info!(key = %key, generation = inflight.generation, "cancelled image download");
            }
            Some(TaskState::Ready(_)) => {
                debug!(key = %key, "cancel dropped ready image from memory");
            }
            None => {}
        }
    }

    /// Drop memory and colour entries for `keys`. Disk copies are kept and
    /// in-flight fetches keep running, but their results are not cached.
    pub async fn clear_cache(&self, keys: &[ImageKey]) {
        let mut state = self.inner.state.lock().await;
        for key in keys {
            state.forget(key.as_str());
        }
        debug!(count = keys.len(), "cleared memory cache entries");
    }

    /// Colour for `key`, derived from the ready image on first request.
    /// Never fetches or reads disk.
    pub async fn color_for(&self, key: &ImageKey) -> Option<ColorValue> {
        let id = key.as_str();
        let image = {
            let state = self.inner.state.lock().await;
            if let Some(color) = state.colors.get(id) {
                return color;
            }
            state.ready(id)?.clone()
        };

        let color = self.inner.sample_color(key, &image).await.ok()?;

        let mut state = self.inner.state.lock().await;
        if let Some(existing) = state.colors.get(id) {
            return existing;
        }
        if state.ready(id).is_some_and(|current| current.ptr_eq(&image)) {
            state.colors.insert(id.to_string(), color);
        }
        color
    }

    fn start_fetch(&self, state: &mut CacheState, key: &ImageKey) -> InFlight {
        state.next_generation += 1;
        let generation = state.next_generation;
        let fetches = self.inner.stats.on_network_fetch();
        debug!(key = %key, generation, fetches, "starting network fetch");

        let inner = Arc::clone(&self.inner);
        let transport = Arc::clone(&self.transport);
        let permits = Arc::clone(&self.permits);
        let key = key.clone();

        let task = tokio::spawn(async move {
            let fetched: Result<Image> = async {
                let _permit = Arc::clone(&permits).acquire_owned().await.map_err(|_| {
                    FetchError::Internal("fetch limiter closed".to_string())
                })?;
                fetch_image(transport.as_ref(), Arc::clone(&inner.codec), key.url())
                    .await
            }
            .await;
            inner.settle(&key, generation, fetched).await
        });
        let abort = task.abort_handle();

        let result = async move {
            match task.await {
                Ok(result) => result,
                Err(err) if err.is_cancelled() => Err(FetchError::Cancelled),
                Err(err) => {
                    Err(FetchError::Internal(format!("fetch task failed: {err}")))
                }
            }
        }
        .boxed()
        .shared();

        InFlight {
            generation,
            result,
            abort,
        }
    }

    /// Await a shared fetch. The fetch task settles the cache itself; a waiter
    /// only cleans up after a task that died before it could.
    async fn await_fetch(&self, key: &ImageKey, inflight: InFlight) -> Result<Image> {
        let outcome = inflight.result.clone().await;

        if let Err(err) = &outcome {
            let mut state = self.inner.state.lock().await;
            if state.is_current(key.as_str(), inflight.generation) {
                state.forget(key.as_str());
                self.inner.stats.on_failure();
                warn!(key = %key, generation = inflight.generation, "image fetch task ended without settling: {err}");
            }
        }
        outcome
    }
}

impl Inner {
    /// Record a finished fetch. Runs inside the fetch task, so it completes
    /// regardless of who is still waiting. The returned value is what every
    /// waiter of this generation receives.
    async fn settle(
        &self,
        key: &ImageKey,
        generation: u64,
        fetched: Result<Image>,
    ) -> Result<Image> {
        let id = key.as_str();

        let image = match fetched {
            Ok(image) => image,
            Err(err) => {
                let mut state = self.state.lock().await;
                if state.is_current(id, generation) {
                    state.forget(id);
                    self.stats.on_failure();
                    warn!(key = %key, generation, "image fetch failed: {err}");
                }
                return Err(err);
            }
        };

        if !self.state.lock().await.is_current(id, generation) {
            debug!(key = %key, generation, "fetch finished after its entry was dropped; not caching");
            return Ok(image);
        }

        // Sampled outside the lock; the entry is re-checked before anything
        // is written.
        let color = self.sample_color(key, &image).await;
        {
            let mut state = self.state.lock().await;
            if !state.is_current(id, generation) {
                debug!(key = %key, generation, "entry dropped while sampling colour; not caching");
                return Ok(image);
            }
            state
                .entries
                .insert(id.to_string(), TaskState::Ready(image.clone()));
            if let Ok(color) = color {
                state.colors.insert(id.to_string(), color);
            }
        }

        debug!(key = %key, generation, "fetch complete, image ready");
        self.persist(key, &image).await?;
        Ok(image)
    }

    async fn load_from_disk(&self, key: &ImageKey) -> Option<Image> {
        let disk = self.disk.as_ref()?;
        let bytes = disk.load(key).await?;
        let codec = Arc::clone(&self.codec);
        match tokio::task::spawn_blocking(move || codec.decode(&bytes)).await {
            Ok(Ok(image)) => Some(image),
            Ok(Err(err)) => {
                debug!(key = %key, "disk copy did not decode, refetching: {err}");
                None
            }
            Err(err) => {
                warn!(key = %key, "disk decode task failed: {err}");
                None
            }
        }
    }

    /// Average colour of `image`, computed off the runtime and without the
    /// state lock held.
    async fn sample_color(
        &self,
        key: &ImageKey,
        image: &Image,
    ) -> Result<Option<ColorValue>> {
        let codec = Arc::clone(&self.codec);
        let image = image.clone();
        let color = tokio::task::spawn_blocking(move || codec.average_color(&image))
            .await
            .map_err(|err| {
                warn!(key = %key, "colour sampling task failed: {err}");
                FetchError::Internal(format!("colour sampling failed: {err}"))
            })?;
        self.stats.on_color_derived();
        Ok(color)
    }

    async fn persist(&self, key: &ImageKey, image: &Image) -> Result<()> {
        let Some(disk) = self.disk.as_ref() else {
            return Ok(());
        };
        let Some(path) = disk.path_for(key) else {
            debug!(key = %key, "key has no disk path, keeping image in memory only");
            return Ok(());
        };

        let codec = Arc::clone(&self.codec);
        let owned = image.clone();
        let encoded = tokio::task::spawn_blocking(move || codec.encode(&owned))
            .await
            .map_err(|e| FetchError::Internal(format!("encode task failed: {e}")))
            .and_then(|r| r);

        let result = match encoded {
            Ok(bytes) => disk.save(key, &bytes).await.map(|_| ()),
            Err(err) => Err(FetchError::DiskWrite {
                path,
                message: err.to_string(),
            }),
        };

        match result {
            Ok(()) => Ok(()),
            Err(err) => {
                self.stats.on_disk_write_error();
                if self.strict_disk_writes {
                    warn!(key = %key, "failed to persist image: {err}");
                    Err(err)
                } else {
                    warn!(key = %key, "failed to persist image, serving from memory: {err}");
                    Ok(())
                }
            }
        }
    }
}

async fn fetch_image(
    transport: &dyn ImageTransport,
    codec: Arc<dyn ImageCodec>,
    url: &Url,
) -> Result<Image> {
    let bytes = transport.get(url).await?;
    tokio::task::spawn_blocking(move || codec.decode(&bytes))
        .await
        .map_err(|e| FetchError::Internal(format!("decode task failed: {e}")))?
}
