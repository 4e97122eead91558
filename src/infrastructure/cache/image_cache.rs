//! Two-tier image cache: decoded images in memory, encoded bytes on disk.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, trace, warn};

use super::disk_cache::DiskCache;
use super::io_queue::IoQueue;
use super::lifecycle::{self, LifecycleNotifier, LifecycleSubscription};
use super::memory_cache::MemoryCache;
use crate::domain::entities::{
    CacheKey, CacheQueryResult, CacheType, CachedImage, QueryOptions,
};
use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::ports::{CleanupReport, DiskCachePort, ImageCodecPort, MemoryCachePort};
use crate::infrastructure::codec::ImageCrateCodec;
use crate::infrastructure::config::{AppConfig, CacheConfig, DEFAULT_NAMESPACE};

/// Maps a key to a read-only file outside the cache directory, e.g. a bundled asset.
pub type AdditionalCachePath = Arc<dyn Fn(&CacheKey) -> Option<PathBuf> + Send + Sync>;

static DEFAULT_DIRECTORY: RwLock<Option<PathBuf>> = parking_lot::const_rwlock(None);
static SHARED: OnceLock<Result<ImageCache, CacheError>> = OnceLock::new();

/// Returns the directory new caches are rooted in when none is given.
#[must_use]
pub fn default_disk_cache_directory() -> PathBuf {
    DEFAULT_DIRECTORY
        .read()
        .clone()
        .unwrap_or_else(AppConfig::default_cache_root)
}

/// Overrides the default root for caches created afterwards. `None` restores the platform default.
pub fn set_default_disk_cache_directory(directory: Option<PathBuf>) {
    *DEFAULT_DIRECTORY.write() = directory;
}

/// Two-tier image cache.
///
/// Memory operations are synchronous and happen on the calling thread. Every
/// disk operation goes through one serial I/O queue per cache, so disk work is
/// ordered even between synchronous and asynchronous callers.
pub struct ImageCache {
    namespace: String,
    disk_cache_path: PathBuf,
    config: CacheConfig,
    memory: Arc<dyn MemoryCachePort>,
    io: Arc<IoQueue>,
    codec: Arc<dyn ImageCodecPort>,
    additional_cache_path: RwLock<Option<AdditionalCachePath>>,
    lifecycle: Mutex<Option<LifecycleSubscription>>,
}

impl ImageCache {
    /// Creates a cache in `<default directory>/<namespace>`.
    ///
    /// # Errors
    /// Returns error if the I/O queue cannot be started.
    pub fn new(namespace: &str) -> CacheResult<Self> {
        Self::with_directory(namespace, None)
    }

    /// Creates a cache in `<directory>/<namespace>`.
    ///
    /// # Errors
    /// Returns error if the I/O queue cannot be started.
    pub fn with_directory(namespace: &str, directory: Option<&Path>) -> CacheResult<Self> {
        Self::with_config(namespace, directory, CacheConfig::default())
    }

    /// Creates a cache with explicit settings. Tier factories in `config` are honoured here only.
    ///
    /// # Errors
    /// Returns error if the I/O queue cannot be started.
    pub fn with_config(
        namespace: &str,
        directory: Option<&Path>,
        config: CacheConfig,
    ) -> CacheResult<Self> {
        let namespace = if namespace.is_empty() {
            DEFAULT_NAMESPACE
        } else {
            namespace
        };
        let root = directory.map_or_else(default_disk_cache_directory, Path::to_path_buf);
        let disk_cache_path = root.join(namespace);

        let memory: Arc<dyn MemoryCachePort> = match &config.memory_cache_factory {
            Some(factory) => factory(&config),
            None => Arc::new(MemoryCache::from_config(&config)),
        };
        let disk: Box<dyn DiskCachePort> = match &config.disk_cache_factory {
            Some(factory) => factory(&disk_cache_path, &config),
            None => Box::new(DiskCache::new(disk_cache_path.clone(), &config)),
        };
        let io = Arc::new(IoQueue::spawn(namespace, disk)?);

        info!(namespace, path = %disk_cache_path.display(), "Image cache ready");

        Ok(Self {
            namespace: namespace.to_string(),
            disk_cache_path,
            config,
            memory,
            io,
            codec: Arc::new(ImageCrateCodec::new()),
            additional_cache_path: RwLock::new(None),
            lifecycle: Mutex::new(None),
        })
    }

    /// Returns the process-wide cache with namespace `"default"`, creating it on first use.
    ///
    /// # Errors
    /// Returns the construction error, which is sticky for the life of the process.
    pub fn shared() -> CacheResult<&'static Self> {
        SHARED
            .get_or_init(|| Self::new(DEFAULT_NAMESPACE))
            .as_ref()
            .map_err(Clone::clone)
    }

    /// Replaces the codec used to decode disk data and encode images for disk.
    #[must_use]
    pub fn with_codec(mut self, codec: Arc<dyn ImageCodecPort>) -> Self {
        self.codec = codec;
        self
    }

    /// Starts reacting to `notifier`. Replaces any earlier subscription.
    pub fn subscribe(&self, notifier: &LifecycleNotifier) {
        let subscription = lifecycle::spawn_listener(
            notifier,
            self.memory.clone(),
            self.io.clone(),
            self.config.should_remove_expired_data_on_background,
        );
        *self.lifecycle.lock() = subscription;
    }

    /// Sets the read-only fallback consulted when a key is absent from the disk tier.
    pub fn set_additional_cache_path(&self, lookup: Option<AdditionalCachePath>) {
        *self.additional_cache_path.write() = lookup;
    }

    /// Returns the namespace this cache was created with.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the directory holding this namespace's files.
    #[must_use]
    pub fn disk_cache_path(&self) -> &Path {
        &self.disk_cache_path
    }

    /// Returns the policy fixed at construction.
    #[must_use]
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Returns the memory tier.
    #[must_use]
    pub fn memory_cache(&self) -> &Arc<dyn MemoryCachePort> {
        &self.memory
    }

    /// Returns the codec used to decode disk hits and encode stores.
    #[must_use]
    pub fn codec(&self) -> &Arc<dyn ImageCodecPort> {
        &self.codec
    }

    /// Stores into memory (if an image is given) and optionally onto disk.
    ///
    /// Without `data` the image is encoded for disk. Resolves once both tiers
    /// have settled; disk failures are logged and dropped.
    pub async fn store(
        &self,
        image: Option<Arc<CachedImage>>,
        data: Option<Bytes>,
        key: &str,
        to_disk: bool,
    ) {
        let Some(key) = CacheKey::new(key) else {
            return;
        };
        if image.is_none() && data.is_none() {
            return;
        }

        if let Some(image) = &image {
            self.put_in_memory(&key, image.clone());
        }
        if !to_disk {
            return;
        }

        let codec = self.codec.clone();
        let job_key = key.clone();
        let result = self
            .io
            .run(move |disk| write_to_disk(disk, codec.as_ref(), &job_key, image, data))
            .await
            .and_then(std::convert::identity);
        if let Err(e) = result {
            warn!(%key, error = %e, "Failed to store image on disk");
        }
    }

    /// Stores a decoded image in memory only.
    pub fn store_image_to_memory(&self, image: Arc<CachedImage>, key: &str) {
        if let Some(key) = CacheKey::new(key) {
            self.put_in_memory(&key, image);
        }
    }

    /// Writes encoded bytes to disk, blocking until written.
    pub fn store_image_data_to_disk(&self, data: &[u8], key: &str) {
        let Some(key) = CacheKey::new(key) else {
            return;
        };
        let data = data.to_vec();
        let job_key = key.clone();
        let result = self
            .io
            .run_sync(move |disk| disk.set_data(&job_key, &data))
            .and_then(std::convert::identity);
        if let Err(e) = result {
            warn!(%key, error = %e, "Failed to store image data on disk");
        }
    }

    /// Looks `key` up in the tiers selected by `cache_type`.
    pub async fn query(
        &self,
        key: &str,
        options: QueryOptions,
        cache_type: CacheType,
    ) -> CacheQueryResult {
        let Some(key) = CacheKey::new(key) else {
            return CacheQueryResult::miss();
        };

        if cache_type.includes_memory()
            && let Some(image) = self.memory_image(&key, options)
        {
            let data = if options.contains(QueryOptions::QUERY_MEMORY_DATA)
                && cache_type.includes_disk()
            {
                if options.contains(QueryOptions::QUERY_MEMORY_DATA_SYNC) {
                    self.read_disk_sync(&key)
                } else {
                    self.read_disk(&key).await
                }
            } else {
                None
            };
            return CacheQueryResult {
                image: Some(image),
                data,
                cache_type: CacheType::Memory,
            };
        }

        if !cache_type.includes_disk() {
            return CacheQueryResult::miss();
        }

        let sync = options.contains(QueryOptions::QUERY_DISK_DATA_SYNC);
        let data = if sync {
            self.read_disk_sync(&key)
        } else {
            self.read_disk(&key).await
        };
        let Some(data) = data else {
            return CacheQueryResult::miss();
        };

        if options.contains(QueryOptions::AVOID_DECODE_IMAGE) {
            return CacheQueryResult {
                image: None,
                data: Some(data),
                cache_type: CacheType::Disk,
            };
        }

        let decoded = if sync {
            self.codec.decode(&data, options)
        } else {
            let codec = self.codec.clone();
            let bytes = data.clone();
            tokio::task::spawn_blocking(move || codec.decode(&bytes, options))
                .await
                .unwrap_or_else(|e| {
                    warn!(%key, error = %e, "Decode task failed");
                    None
                })
        };

        match self.accept_disk_image(&key, decoded, options) {
            Some(image) => CacheQueryResult {
                image: Some(image),
                data: Some(data),
                cache_type: CacheType::Disk,
            },
            None => CacheQueryResult::miss(),
        }
    }

    /// Returns the image held in memory, if any.
    #[must_use]
    pub fn image_from_memory_cache(&self, key: &str) -> Option<Arc<CachedImage>> {
        self.image_from_memory_cache_with_options(key, QueryOptions::empty())
    }

    /// Like [`Self::image_from_memory_cache`], honouring `options`.
    #[must_use]
    pub fn image_from_memory_cache_with_options(
        &self,
        key: &str,
        options: QueryOptions,
    ) -> Option<Arc<CachedImage>> {
        let key = CacheKey::new(key)?;
        self.memory_image(&key, options)
    }

    /// Reads and decodes the disk copy, writing it back into memory.
    #[must_use]
    pub fn image_from_disk_cache(&self, key: &str) -> Option<Arc<CachedImage>> {
        self.image_from_disk_cache_with_options(key, QueryOptions::empty())
    }

    /// Like [`Self::image_from_disk_cache`], honouring `options`.
    #[must_use]
    pub fn image_from_disk_cache_with_options(
        &self,
        key: &str,
        options: QueryOptions,
    ) -> Option<Arc<CachedImage>> {
        let key = CacheKey::new(key)?;
        let data = self.read_disk_sync(&key)?;
        let decoded = self.codec.decode(&data, options);
        self.accept_disk_image(&key, decoded, options)
    }

    /// Memory first, then disk.
    #[must_use]
    pub fn image_from_cache(&self, key: &str) -> Option<Arc<CachedImage>> {
        self.image_from_cache_with_options(key, QueryOptions::empty())
    }

    /// Like [`Self::image_from_cache`], honouring `options`.
    #[must_use]
    pub fn image_from_cache_with_options(
        &self,
        key: &str,
        options: QueryOptions,
    ) -> Option<Arc<CachedImage>> {
        self.image_from_memory_cache_with_options(key, options)
            .or_else(|| self.image_from_disk_cache_with_options(key, options))
    }

    /// Reads the encoded bytes, blocking the caller.
    #[must_use]
    pub fn disk_image_data(&self, key: &str) -> Option<Bytes> {
        let key = CacheKey::new(key)?;
        self.read_disk_sync(&key)
    }

    /// Reads the encoded bytes on the I/O queue.
    pub async fn disk_image_data_query(&self, key: &str) -> Option<Bytes> {
        let key = CacheKey::new(key)?;
        self.read_disk(&key).await
    }

    /// Checks the disk tier, blocking the caller.
    #[must_use]
    pub fn disk_image_data_exists(&self, key: &str) -> bool {
        let Some(key) = CacheKey::new(key) else {
            return false;
        };
        let lookup = self.additional_cache_path.read().clone();
        self.io
            .run_sync(move |disk| exists_on_disk(disk, lookup.as_ref(), &key))
            .unwrap_or(false)
    }

    /// Checks the disk tier on the I/O queue.
    pub async fn disk_image_exists(&self, key: &str) -> bool {
        let Some(key) = CacheKey::new(key) else {
            return false;
        };
        let lookup = self.additional_cache_path.read().clone();
        self.io
            .run(move |disk| exists_on_disk(disk, lookup.as_ref(), &key))
            .await
            .unwrap_or(false)
    }

    /// Removes from memory and, if asked, from disk.
    pub async fn remove(&self, key: &str, from_disk: bool) {
        let Some(key) = CacheKey::new(key) else {
            return;
        };
        self.memory.remove(key.as_str());
        if from_disk {
            let job_key = key.clone();
            let result = self
                .io
                .run(move |disk| disk.remove_data(&job_key))
                .await
                .and_then(std::convert::identity);
            if let Err(e) = result {
                warn!(%key, error = %e, "Failed to remove image from disk");
            }
        }
    }

    /// Drops the decoded image held in memory.
    pub fn remove_from_memory(&self, key: &str) {
        if !key.is_empty() {
            self.memory.remove(key);
        }
    }

    /// Removes the disk copy, blocking the caller.
    pub fn remove_from_disk(&self, key: &str) {
        let Some(key) = CacheKey::new(key) else {
            return;
        };
        let job_key = key.clone();
        let result = self
            .io
            .run_sync(move |disk| disk.remove_data(&job_key))
            .and_then(std::convert::identity);
        if let Err(e) = result {
            warn!(%key, error = %e, "Failed to remove image from disk");
        }
    }

    /// Empties the memory tier.
    pub fn clear_memory(&self) {
        self.memory.remove_all();
    }

    /// Deletes every file in the disk tier.
    pub async fn clear_disk(&self) {
        let result = self
            .io
            .run(|disk| disk.remove_all_data())
            .await
            .and_then(std::convert::identity);
        match result {
            Ok(()) => info!(namespace = %self.namespace, "Cleared disk cache"),
            Err(e) => warn!(namespace = %self.namespace, error = %e, "Failed to clear disk cache"),
        }
    }

    /// Applies the age and size limits to the disk tier.
    pub async fn delete_expired(&self) -> CleanupReport {
        match self.io.run(|disk| disk.remove_expired_data()).await {
            Ok(report) => report,
            Err(e) => {
                warn!(namespace = %self.namespace, error = %e, "Disk cleanup skipped");
                CleanupReport::default()
            }
        }
    }

    /// Summed size of disk files in bytes, blocking the caller.
    #[must_use]
    pub fn total_disk_size(&self) -> u64 {
        self.io.run_sync(|disk| disk.total_size()).unwrap_or(0)
    }

    /// Number of disk files, blocking the caller.
    #[must_use]
    pub fn total_disk_count(&self) -> usize {
        self.io.run_sync(|disk| disk.total_count()).unwrap_or(0)
    }

    /// Returns `(file_count, total_bytes)` for the disk tier.
    pub async fn calculate_size(&self) -> (usize, u64) {
        self.io
            .run(|disk| (disk.total_count(), disk.total_size()))
            .await
            .unwrap_or((0, 0))
    }

    /// Path the disk tier uses for `key`.
    #[must_use]
    pub fn cache_path(&self, key: &str) -> Option<PathBuf> {
        let key = CacheKey::new(key)?;
        self.io.run_sync(move |disk| disk.cache_path(&key)).ok()
    }

    fn put_in_memory(&self, key: &CacheKey, image: Arc<CachedImage>) {
        if self.config.should_cache_images_in_memory {
            let cost = image.cost();
            self.memory.set(key.as_str(), image, cost);
        }
    }

    fn memory_image(&self, key: &CacheKey, options: QueryOptions) -> Option<Arc<CachedImage>> {
        let image = self.memory.get(key.as_str())?;
        if options.contains(QueryOptions::MATCH_ANIMATED_IMAGE_CLASS) && !image.is_animated() {
            trace!(%key, "Memory hit is not animated, skipping");
            return None;
        }
        Some(image)
    }

    fn accept_disk_image(
        &self,
        key: &CacheKey,
        decoded: Option<CachedImage>,
        options: QueryOptions,
    ) -> Option<Arc<CachedImage>> {
        let Some(image) = decoded else {
            warn!(%key, "Disk data could not be decoded");
            return None;
        };
        if options.contains(QueryOptions::MATCH_ANIMATED_IMAGE_CLASS) && !image.is_animated() {
            debug!(%key, "Decoded image is not animated, treating as miss");
            return None;
        }
        let image = Arc::new(image);
        self.put_in_memory(key, image.clone());
        Some(image)
    }

    fn read_disk_sync(&self, key: &CacheKey) -> Option<Bytes> {
        let lookup = self.additional_cache_path.read().clone();
        let job_key = key.clone();
        self.io
            .run_sync(move |disk| read_from_disk(disk, lookup.as_ref(), &job_key))
            .ok()
            .flatten()
    }

    async fn read_disk(&self, key: &CacheKey) -> Option<Bytes> {
        let lookup = self.additional_cache_path.read().clone();
        let job_key = key.clone();
        self.io
            .run(move |disk| read_from_disk(disk, lookup.as_ref(), &job_key))
            .await
            .ok()
            .flatten()
    }
}

impl std::fmt::Debug for ImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageCache")
            .field("namespace", &self.namespace)
            .field("disk_cache_path", &self.disk_cache_path)
            .field("io", &self.io)
            .finish_non_exhaustive()
    }
}

fn read_from_disk(
    disk: &dyn DiskCachePort,
    lookup: Option<&AdditionalCachePath>,
    key: &CacheKey,
) -> Option<Bytes> {
    if let Some(data) = disk.data(key) {
        trace!(%key, size = data.len(), "Disk cache hit");
        return Some(Bytes::from(data));
    }
    let path = lookup.and_then(|lookup| lookup(key))?;
    match fs::read(&path) {
        Ok(data) => {
            trace!(%key, path = %path.display(), "Additional cache path hit");
            Some(Bytes::from(data))
        }
        Err(_) => None,
    }
}

fn exists_on_disk(
    disk: &dyn DiskCachePort,
    lookup: Option<&AdditionalCachePath>,
    key: &CacheKey,
) -> bool {
    disk.contains_data(key)
        || lookup
            .and_then(|lookup| lookup(key))
            .is_some_and(|path| path.is_file())
}

fn write_to_disk(
    disk: &dyn DiskCachePort,
    codec: &dyn ImageCodecPort,
    key: &CacheKey,
    image: Option<Arc<CachedImage>>,
    data: Option<Bytes>,
) -> CacheResult<()> {
    if let Some(data) = data {
        return disk.set_data(key, &data);
    }
    let Some(image) = image else {
        return Ok(());
    };
    let encoded = codec
        .encode(&image)
        .ok_or_else(|| CacheError::decode(format!("failed to encode image for {key}")))?;
    disk.set_data(key, &encoded)
}
