//! Disk-based image cache for persistence across sessions.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use filetime::FileTime;
use tracing::{debug, info, trace, warn};

use crate::domain::entities::{CacheKey, DiskReadOptions, DiskWriteOptions};
use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::ports::{CleanupReport, DiskCachePort};
use crate::infrastructure::config::{CacheConfig, ExpireType};

/// Marker file that tells backup tools to skip the directory.
pub const CACHEDIR_TAG: &str = "CACHEDIR.TAG";
const CACHEDIR_TAG_CONTENT: &str = "Signature: 8a477f597d28d172789f06886806bc55\n\
# This file is a cache directory tag created by picache.\n\
# For information about cache directory tags see https://bford.info/cachedir/\n";

/// Prefix of in-flight atomic writes; never counted as entries.
const TEMP_PREFIX: &str = ".picache-tmp";

/// One file in the cache directory.
#[derive(Debug)]
struct DiskEntry {
    path: PathBuf,
    name: String,
    size: u64,
    time: FileTime,
}

/// Disk cache that persists encoded image bytes as one file per key.
///
/// Not internally synchronized; the owning cache serializes access.
#[derive(Debug)]
pub struct DiskCache {
    cache_dir: PathBuf,
    max_age: Option<Duration>,
    max_size: u64,
    expire_type: ExpireType,
    read_options: DiskReadOptions,
    write_options: DiskWriteOptions,
    exclude_from_backup: bool,
}

impl DiskCache {
    /// Creates a disk cache rooted at `cache_dir`.
    ///
    /// The directory is created eagerly; a failure is logged and retried on
    /// the next write.
    #[must_use]
    pub fn new(cache_dir: PathBuf, config: &CacheConfig) -> Self {
        let cache = Self {
            cache_dir,
            max_age: config.max_disk_age,
            max_size: config.max_disk_size,
            expire_type: config.disk_expire_type,
            read_options: config.disk_read_options,
            write_options: config.disk_write_options,
            exclude_from_backup: !config.should_disable_backup_exclusion,
        };
        if let Err(e) = cache.ensure_dir() {
            warn!(dir = %cache.cache_dir.display(), error = %e, "Failed to create disk cache dir");
        }
        cache
    }

    /// Returns the cache directory.
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn ensure_dir(&self) -> CacheResult<()> {
        fs::create_dir_all(&self.cache_dir)
            .map_err(|e| CacheError::io("failed to create cache dir", &e))?;
        if self.exclude_from_backup {
            let tag = self.cache_dir.join(CACHEDIR_TAG);
            if !tag.exists() {
                fs::write(&tag, CACHEDIR_TAG_CONTENT)
                    .map_err(|e| CacheError::io("failed to write cache tag", &e))?;
            }
        }
        Ok(())
    }

    fn entries(&self) -> Vec<DiskEntry> {
        let read_dir = match fs::read_dir(&self.cache_dir) {
            Ok(read_dir) => read_dir,
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    warn!(dir = %self.cache_dir.display(), error = %e, "Failed to read cache dir");
                }
                return Vec::new();
            }
        };

        read_dir
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                if name == CACHEDIR_TAG || name.starts_with(TEMP_PREFIX) {
                    return None;
                }
                let meta = entry.metadata().ok()?;
                if !meta.is_file() {
                    return None;
                }
                Some(DiskEntry {
                    path: entry.path(),
                    name,
                    size: meta.len(),
                    time: entry_time(&meta, self.expire_type),
                })
            })
            .collect()
    }

    fn write_file(&self, path: &Path, data: &[u8]) -> CacheResult<()> {
        if self.write_options.contains(DiskWriteOptions::ATOMIC) {
            let mut temp = tempfile::Builder::new()
                .prefix(TEMP_PREFIX)
                .tempfile_in(&self.cache_dir)
                .map_err(|e| CacheError::io("failed to create temp file", &e))?;
            temp.write_all(data)
                .map_err(|e| CacheError::io("failed to write temp file", &e))?;
            temp.persist(path)
                .map_err(|e| CacheError::io("failed to persist cache file", &e.error))?;
        } else {
            fs::write(path, data).map_err(|e| CacheError::io("failed to write cache file", &e))?;
        }
        Ok(())
    }
}

/// Reads the timestamp selected by `expire_type`.
fn entry_time(meta: &fs::Metadata, expire_type: ExpireType) -> FileTime {
    match expire_type {
        ExpireType::Access => FileTime::from_last_access_time(meta),
        ExpireType::Modification => FileTime::from_last_modification_time(meta),
        ExpireType::Creation => FileTime::from_creation_time(meta)
            .unwrap_or_else(|| FileTime::from_last_modification_time(meta)),
        ExpireType::Change => change_time(meta),
    }
}

#[cfg(unix)]
fn change_time(meta: &fs::Metadata) -> FileTime {
    use std::os::unix::fs::MetadataExt;
    let nanos = u32::try_from(meta.ctime_nsec()).unwrap_or(0);
    FileTime::from_unix_time(meta.ctime(), nanos)
}

#[cfg(not(unix))]
fn change_time(meta: &fs::Metadata) -> FileTime {
    FileTime::from_last_modification_time(meta)
}

impl DiskCachePort for DiskCache {
    fn contains_data(&self, key: &CacheKey) -> bool {
        self.cache_path(key).is_file()
    }

    fn data(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let path = self.cache_path(key);
        match fs::read(&path) {
            Ok(bytes) => {
                trace!(key = %key, path = %path.display(), "Disk cache hit");
                if self.read_options.contains(DiskReadOptions::TOUCH_ACCESS_TIME)
                    && let Err(e) = filetime::set_file_atime(&path, FileTime::now())
                {
                    debug!(key = %key, error = %e, "Failed to touch access time");
                }
                Some(bytes)
            }
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    warn!(key = %key, error = %e, "Failed to read cache file");
                }
                trace!(key = %key, "Disk cache miss");
                None
            }
        }
    }

    fn set_data(&self, key: &CacheKey, data: &[u8]) -> CacheResult<()> {
        self.ensure_dir()?;
        let path = self.cache_path(key);

        if self.write_options.contains(DiskWriteOptions::WITHOUT_OVERWRITING) && path.exists() {
            trace!(key = %key, "Keeping existing cache file");
            return Ok(());
        }

        self.write_file(&path, data)?;
        debug!(key = %key, path = %path.display(), size = data.len(), "Stored image in disk cache");
        Ok(())
    }

    fn remove_data(&self, key: &CacheKey) -> CacheResult<()> {
        let path = self.cache_path(key);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(key = %key, "Removed from disk cache");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::io("failed to remove cache file", &e)),
        }
    }

    fn remove_all_data(&self) -> CacheResult<()> {
        match fs::remove_dir_all(&self.cache_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(CacheError::io("failed to clear cache dir", &e)),
        }
        self.ensure_dir()?;
        info!(dir = %self.cache_dir.display(), "Cleared disk cache");
        Ok(())
    }

    fn remove_expired_data(&self) -> CleanupReport {
        let entries = self.entries();
        let mut report = CleanupReport::default();
        let mut total: u64 = entries.iter().map(|e| e.size).sum();

        let cutoff = self
            .max_age
            .and_then(|age| SystemTime::now().checked_sub(age))
            .map(FileTime::from_system_time);

        let mut remaining = Vec::with_capacity(entries.len());
        for entry in entries {
            if cutoff.is_some_and(|cutoff| entry.time < cutoff) {
                match fs::remove_file(&entry.path) {
                    Ok(()) => {
                        trace!(file = %entry.name, "Removed expired cache file");
                        total -= entry.size;
                        report.removed_bytes += entry.size;
                        report.removed.push(entry.name);
                        continue;
                    }
                    Err(e) => {
                        warn!(file = %entry.name, error = %e, "Failed to remove expired cache file");
                    }
                }
            }
            remaining.push(entry);
        }

        if self.max_size > 0 && total > self.max_size {
            let target = self.max_size / 2;
            debug!(
                current_size = total,
                max_size = self.max_size,
                target,
                "Disk cache over limit, trimming"
            );

            remaining.sort_by_key(|e| e.time);
            let mut kept = Vec::with_capacity(remaining.len());
            for entry in remaining {
                if total <= target {
                    kept.push(entry);
                    continue;
                }
                match fs::remove_file(&entry.path) {
                    Ok(()) => {
                        trace!(file = %entry.name, "Removed old cache file");
                        total -= entry.size;
                        report.removed_bytes += entry.size;
                        report.removed.push(entry.name);
                    }
                    Err(e) => {
                        warn!(file = %entry.name, error = %e, "Failed to remove old cache file");
                        kept.push(entry);
                    }
                }
            }
            remaining = kept;
        }

        report.remaining_size = total;
        report.remaining_count = remaining.len();

        if !report.is_noop() {
            info!(
                removed = report.removed.len(),
                freed = report.removed_bytes,
                remaining_size = report.remaining_size,
                remaining_count = report.remaining_count,
                "Disk cache cleanup complete"
            );
        }
        report
    }

    fn cache_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir.join(key.file_name())
    }

    fn total_count(&self) -> usize {
        self.entries().len()
    }

    fn total_size(&self) -> u64 {
        self.entries().iter().map(|e| e.size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use test_case::test_case;

    const WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);

    fn key(s: &str) -> CacheKey {
        CacheKey::new(s).unwrap()
    }

    fn create_test_cache(config: &CacheConfig) -> (DiskCache, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let cache = DiskCache::new(temp_dir.path().join("ns"), config);
        (cache, temp_dir)
    }

    fn ago(d: Duration) -> FileTime {
        FileTime::from_system_time(SystemTime::now() - d)
    }

    #[test]
    fn test_set_and_get_data() {
        let (cache, _temp) = create_test_cache(&CacheConfig::default());
        let id = key("test1");

        cache.set_data(&id, b"test image data").unwrap();

        assert_eq!(cache.data(&id).as_deref(), Some(&b"test image data"[..]));
        assert!(cache.contains_data(&id));
    }

    #[test]
    fn test_cache_miss() {
        let (cache, _temp) = create_test_cache(&CacheConfig::default());
        assert!(cache.data(&key("nonexistent")).is_none());
        assert!(!cache.contains_data(&key("nonexistent")));
    }

    #[test]
    fn test_remove_data() {
        let (cache, _temp) = create_test_cache(&CacheConfig::default());
        let id = key("test1");

        cache.set_data(&id, b"test").unwrap();
        cache.remove_data(&id).unwrap();
        assert!(!cache.contains_data(&id));

        // Removing again is quiet.
        assert_eq!(cache.remove_data(&id), Ok(()));
    }

    #[test]
    fn test_remove_all_data() {
        let (cache, _temp) = create_test_cache(&CacheConfig::default());
        cache.set_data(&key("test1"), b"data1").unwrap();
        cache.set_data(&key("test2"), b"data2").unwrap();
        assert_eq!(cache.total_count(), 2);

        cache.remove_all_data().unwrap();
        assert_eq!(cache.total_count(), 0);
        assert!(cache.cache_dir().exists());
        assert!(cache.cache_dir().join(CACHEDIR_TAG).exists());
    }

    #[test]
    fn test_totals_ignore_tag_file() {
        let (cache, _temp) = create_test_cache(&CacheConfig::default());
        assert!(cache.cache_dir().join(CACHEDIR_TAG).exists());

        cache.set_data(&key("test1"), b"hello").unwrap();
        cache.set_data(&key("test2"), b"world!").unwrap();
        assert_eq!(cache.total_count(), 2);
        assert_eq!(cache.total_size(), 11);

        cache.set_data(&key("test1"), b"hey").unwrap();
        assert_eq!(cache.total_count(), 2);
        assert_eq!(cache.total_size(), 9);
    }

    #[test]
    fn test_backup_exclusion_can_be_disabled() {
        let config = CacheConfig {
            should_disable_backup_exclusion: true,
            ..CacheConfig::default()
        };
        let (cache, _temp) = create_test_cache(&config);
        cache.set_data(&key("a"), b"1").unwrap();
        assert!(!cache.cache_dir().join(CACHEDIR_TAG).exists());
    }

    #[test]
    fn test_without_overwriting_keeps_first_write() {
        let config = CacheConfig {
            disk_write_options: DiskWriteOptions::WITHOUT_OVERWRITING,
            ..CacheConfig::default()
        };
        let (cache, _temp) = create_test_cache(&config);
        cache.set_data(&key("a"), b"first").unwrap();
        cache.set_data(&key("a"), b"second").unwrap();
        assert_eq!(cache.data(&key("a")).as_deref(), Some(&b"first"[..]));
    }

    #[test]
    fn test_touch_access_time_on_read() {
        let config = CacheConfig {
            disk_read_options: DiskReadOptions::TOUCH_ACCESS_TIME,
            ..CacheConfig::default()
        };
        let (cache, _temp) = create_test_cache(&config);
        let id = key("a");
        cache.set_data(&id, b"1").unwrap();
        let path = cache.cache_path(&id);
        filetime::set_file_atime(&path, ago(2 * WEEK)).unwrap();

        cache.data(&id).unwrap();

        let atime = FileTime::from_last_access_time(&fs::metadata(&path).unwrap());
        assert!(atime > ago(WEEK));
    }

    #[test]
    fn test_cleanup_removes_expired_entries() {
        let (cache, _temp) = create_test_cache(&CacheConfig::default());
        cache.set_data(&key("old"), b"old").unwrap();
        cache.set_data(&key("new"), b"new").unwrap();
        filetime::set_file_mtime(cache.cache_path(&key("old")), ago(2 * WEEK)).unwrap();

        let report = cache.remove_expired_data();

        assert_eq!(report.removed, vec![key("old").file_name()]);
        assert_eq!(report.remaining_count, 1);
        assert!(cache.contains_data(&key("new")));
    }

    #[test]
    fn test_cleanup_without_age_limit_keeps_everything() {
        let config = CacheConfig::default().with_max_disk_age(None);
        let (cache, _temp) = create_test_cache(&config);
        cache.set_data(&key("old"), b"old").unwrap();
        filetime::set_file_mtime(cache.cache_path(&key("old")), ago(52 * WEEK)).unwrap();

        assert!(cache.remove_expired_data().is_noop());
    }

    #[test]
    fn test_cleanup_trims_oldest_to_half_limit() {
        let config = CacheConfig::default().with_max_disk_size(100);
        let (cache, _temp) = create_test_cache(&config);

        for i in 0..5u64 {
            let id = key(&format!("k{i}"));
            cache.set_data(&id, &[0u8; 30]).unwrap();
            // k0 is the oldest, k4 the newest; all within the age limit.
            filetime::set_file_mtime(
                cache.cache_path(&id),
                ago(Duration::from_secs(3600 * (10 - i))),
            )
            .unwrap();
        }

        let report = cache.remove_expired_data();

        assert!(report.remaining_size <= 50);
        assert_eq!(report.remaining_size, 30);
        assert_eq!(report.removed_bytes, 120);
        let expected: Vec<String> = (0..4).map(|i| key(&format!("k{i}")).file_name()).collect();
        assert_eq!(report.removed, expected);
        assert!(cache.contains_data(&key("k4")));
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let config = CacheConfig::default().with_max_disk_size(50);
        let (cache, _temp) = create_test_cache(&config);
        for i in 0..4 {
            cache.set_data(&key(&format!("k{i}")), &[1u8; 20]).unwrap();
        }
        filetime::set_file_mtime(cache.cache_path(&key("k0")), ago(2 * WEEK)).unwrap();

        let first = cache.remove_expired_data();
        assert!(!first.is_noop());

        let second = cache.remove_expired_data();
        assert!(second.is_noop());
        assert_eq!(second.remaining_size, first.remaining_size);
        assert_eq!(second.remaining_count, first.remaining_count);
    }

    #[test_case(ExpireType::Access, true, false, true ; "access_time_aged")]
    #[test_case(ExpireType::Access, false, true, false ; "access_ignores_modification")]
    #[test_case(ExpireType::Modification, false, true, true ; "modification_time_aged")]
    #[test_case(ExpireType::Modification, true, false, false ; "modification_ignores_access")]
    #[test_case(ExpireType::Change, true, true, false ; "change_time_is_refreshed_by_touching")]
    fn test_expiry_follows_expire_type(
        expire_type: ExpireType,
        age_access: bool,
        age_modification: bool,
        expect_removed: bool,
    ) {
        let config = CacheConfig::default().with_expire_type(expire_type);
        let (cache, _temp) = create_test_cache(&config);
        let id = key("entry");
        cache.set_data(&id, b"pixels").unwrap();
        let path = cache.cache_path(&id);

        let old = ago(2 * WEEK);
        let now = FileTime::now();
        filetime::set_file_times(
            &path,
            if age_access { old } else { now },
            if age_modification { old } else { now },
        )
        .unwrap();

        let report = cache.remove_expired_data();

        assert_eq!(!report.is_noop(), expect_removed);
        assert_eq!(cache.contains_data(&id), !expect_removed);
    }
}
