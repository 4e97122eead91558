//! Cache policy configuration.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::domain::entities::{DiskReadOptions, DiskWriteOptions};
use crate::domain::ports::{DiskCachePort, MemoryCachePort};

/// One week.
pub const DEFAULT_MAX_DISK_AGE: Duration = Duration::from_secs(60 * 60 * 24 * 7);

/// Builds a custom memory tier at cache construction.
pub type MemoryCacheFactory = Arc<dyn Fn(&CacheConfig) -> Arc<dyn MemoryCachePort> + Send + Sync>;

/// Builds a custom disk tier for the given directory at cache construction.
pub type DiskCacheFactory =
    Arc<dyn Fn(&Path, &CacheConfig) -> Box<dyn DiskCachePort> + Send + Sync>;

/// File timestamp used to compute the age of a disk entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpireType {
    /// Last access time.
    Access,
    /// Last content modification time.
    #[default]
    Modification,
    /// Creation (birth) time.
    Creation,
    /// Last metadata change time (rename, permission or xattr update).
    Change,
}

impl std::fmt::Display for ExpireType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Access => write!(f, "access"),
            Self::Modification => write!(f, "modification"),
            Self::Creation => write!(f, "creation"),
            Self::Change => write!(f, "change"),
        }
    }
}

/// Cache policy. Fixed once a cache is constructed.
///
/// Size and count ceilings of `0` mean unlimited. A `max_disk_age` of `None`
/// disables age-based expiry.
#[allow(clippy::struct_excessive_bools)]
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Skip writing the backup-exclusion marker into the cache directory.
    pub should_disable_backup_exclusion: bool,

    /// Keep decoded images in the memory tier.
    pub should_cache_images_in_memory: bool,

    /// Track stored images weakly so evicted entries still referenced elsewhere
    /// can be recovered.
    pub should_use_weak_memory_cache: bool,

    /// Sweep expired disk entries when the host moves to the background.
    pub should_remove_expired_data_on_background: bool,

    /// Disk read behaviour.
    pub disk_read_options: DiskReadOptions,

    /// Disk write behaviour.
    pub disk_write_options: DiskWriteOptions,

    /// Maximum age of a disk entry, in seconds in the config file.
    /// A negative value disables expiry.
    #[serde(
        serialize_with = "serialize_age",
        deserialize_with = "deserialize_age"
    )]
    pub max_disk_age: Option<Duration>,

    /// Soft limit for total disk bytes.
    pub max_disk_size: u64,

    /// Limit for the summed cost of memory entries.
    pub max_memory_cost: u64,

    /// Limit for the number of memory entries.
    pub max_memory_count: usize,

    /// Timestamp basis for disk expiry.
    pub disk_expire_type: ExpireType,

    /// Custom memory tier.
    #[serde(skip)]
    pub memory_cache_factory: Option<MemoryCacheFactory>,

    /// Custom disk tier.
    #[serde(skip)]
    pub disk_cache_factory: Option<DiskCacheFactory>,
}

impl CacheConfig {
    /// Sets the disk age limit.
    #[must_use]
    pub const fn with_max_disk_age(mut self, age: Option<Duration>) -> Self {
        self.max_disk_age = age;
        self
    }

    /// Sets the disk size limit.
    #[must_use]
    pub const fn with_max_disk_size(mut self, bytes: u64) -> Self {
        self.max_disk_size = bytes;
        self
    }

    /// Sets the memory ceilings.
    #[must_use]
    pub const fn with_memory_limits(mut self, max_cost: u64, max_count: usize) -> Self {
        self.max_memory_cost = max_cost;
        self.max_memory_count = max_count;
        self
    }

    /// Sets the expiry timestamp basis.
    #[must_use]
    pub const fn with_expire_type(mut self, expire_type: ExpireType) -> Self {
        self.disk_expire_type = expire_type;
        self
    }

    /// Installs a custom memory tier.
    #[must_use]
    pub fn with_memory_cache_factory(mut self, factory: MemoryCacheFactory) -> Self {
        self.memory_cache_factory = Some(factory);
        self
    }

    /// Installs a custom disk tier.
    #[must_use]
    pub fn with_disk_cache_factory(mut self, factory: DiskCacheFactory) -> Self {
        self.disk_cache_factory = Some(factory);
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            should_disable_backup_exclusion: false,
            should_cache_images_in_memory: true,
            should_use_weak_memory_cache: true,
            should_remove_expired_data_on_background: true,
            disk_read_options: DiskReadOptions::empty(),
            disk_write_options: DiskWriteOptions::ATOMIC,
            max_disk_age: Some(DEFAULT_MAX_DISK_AGE),
            max_disk_size: 0,
            max_memory_cost: 0,
            max_memory_count: 0,
            disk_expire_type: ExpireType::Modification,
            memory_cache_factory: None,
            disk_cache_factory: None,
        }
    }
}

impl std::fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheConfig")
            .field("should_disable_backup_exclusion", &self.should_disable_backup_exclusion)
            .field("should_cache_images_in_memory", &self.should_cache_images_in_memory)
            .field("should_use_weak_memory_cache", &self.should_use_weak_memory_cache)
            .field(
                "should_remove_expired_data_on_background",
                &self.should_remove_expired_data_on_background,
            )
            .field("disk_read_options", &self.disk_read_options)
            .field("disk_write_options", &self.disk_write_options)
            .field("max_disk_age", &self.max_disk_age)
            .field("max_disk_size", &self.max_disk_size)
            .field("max_memory_cost", &self.max_memory_cost)
            .field("max_memory_count", &self.max_memory_count)
            .field("disk_expire_type", &self.disk_expire_type)
            .field("custom_memory_cache", &self.memory_cache_factory.is_some())
            .field("custom_disk_cache", &self.disk_cache_factory.is_some())
            .finish()
    }
}

#[allow(clippy::ref_option)]
fn serialize_age<S: Serializer>(age: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
    let secs = age.map_or(-1, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX));
    serializer.serialize_i64(secs)
}

fn deserialize_age<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
    let secs = i64::deserialize(deserializer)?;
    Ok(u64::try_from(secs).ok().map(Duration::from_secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert!(config.should_cache_images_in_memory);
        assert!(config.should_use_weak_memory_cache);
        assert!(config.should_remove_expired_data_on_background);
        assert!(!config.should_disable_backup_exclusion);
        assert_eq!(config.max_disk_age, Some(DEFAULT_MAX_DISK_AGE));
        assert_eq!(config.max_disk_size, 0);
        assert_eq!(config.disk_expire_type, ExpireType::Modification);
        assert_eq!(config.disk_write_options, DiskWriteOptions::ATOMIC);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: CacheConfig = toml::from_str(
            r#"
            max_disk_age = 3600
            max_disk_size = 1048576
            disk_expire_type = "access"
            should_use_weak_memory_cache = false
            "#,
        )
        .expect("parse");

        assert_eq!(config.max_disk_age, Some(Duration::from_secs(3600)));
        assert_eq!(config.max_disk_size, 1_048_576);
        assert_eq!(config.disk_expire_type, ExpireType::Access);
        assert!(!config.should_use_weak_memory_cache);
        assert!(config.should_cache_images_in_memory);
    }

    #[test]
    fn test_negative_age_disables_expiry() {
        let config: CacheConfig = toml::from_str("max_disk_age = -1").expect("parse");
        assert_eq!(config.max_disk_age, None);
    }

    #[test]
    fn test_round_trips_through_toml() {
        let config = CacheConfig::default().with_memory_limits(1024, 10);
        let text = toml::to_string(&config).expect("serialize");
        let parsed: CacheConfig = toml::from_str(&text).expect("parse");
        assert_eq!(parsed.max_memory_cost, 1024);
        assert_eq!(parsed.max_memory_count, 10);
        assert_eq!(parsed.max_disk_age, config.max_disk_age);
    }
}
