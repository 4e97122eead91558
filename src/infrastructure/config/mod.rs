//! Application and cache configuration.

pub mod app_config;
pub mod args;
pub mod cache_config;
pub mod storage;

pub use app_config::{AppConfig, DEFAULT_NAMESPACE, LogLevel};
pub use args::{CliArgs, Command};
pub use cache_config::{
    CacheConfig, DEFAULT_MAX_DISK_AGE, DiskCacheFactory, ExpireType, MemoryCacheFactory,
};
pub use storage::{ConfigError, StorageManager};
