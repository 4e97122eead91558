//! Application configuration.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::args::CliArgs;
use super::cache_config::CacheConfig;
use crate::infrastructure::download::DownloaderConfig;

const APP_NAME: &str = "picache";
const APP_QUALIFIER: &str = "com";
const APP_ORGANIZATION: &str = "linuxmobile";

/// Namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Application configuration, loaded from file and overridden by CLI.
#[derive(Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Configuration file path.
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[serde(skip)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Cache namespace; names the directory under the cache root.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Cache root directory. Defaults to the platform cache directory.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Cache policy.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Downloader settings.
    #[serde(default)]
    pub download: DownloaderConfig,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

impl AppConfig {
    /// Merges CLI arguments into the configuration.
    pub fn merge_with_args(&mut self, args: &CliArgs) {
        if let Some(config_path) = &args.config {
            self.config = Some(config_path.clone());
        }
        if let Some(log_path) = &args.log_path {
            self.log_path = Some(log_path.clone());
        }
        if let Some(log_level) = args.log_level {
            self.log_level = log_level;
        }
        if let Some(namespace) = &args.namespace {
            self.namespace.clone_from(namespace);
        }
        if let Some(cache_dir) = &args.cache_dir {
            self.cache_dir = Some(cache_dir.clone());
        }
        if let Some(max_disk_size) = args.max_disk_size {
            self.cache.max_disk_size = max_disk_size;
        }
        if let Some(max_concurrent) = args.max_concurrent_downloads {
            self.download.max_concurrent_downloads = max_concurrent;
        }
    }

    /// Returns default config directory.
    #[must_use]
    pub fn default_config_dir() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Returns default config file path.
    #[must_use]
    pub fn default_config_path() -> Option<PathBuf> {
        Self::default_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Returns default log file path.
    #[must_use]
    pub fn default_log_path() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.data_dir().join("picache.log"))
    }

    /// Returns default cache root directory.
    #[must_use]
    pub fn default_cache_root() -> PathBuf {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME).map_or_else(
            || std::env::temp_dir().join(APP_NAME).join("cache"),
            |dirs| dirs.cache_dir().to_path_buf(),
        )
    }

    /// Returns effective log path.
    #[must_use]
    pub fn effective_log_path(&self) -> Option<PathBuf> {
        self.log_path.clone().or_else(Self::default_log_path)
    }

    /// Returns the directory holding this namespace's files.
    #[must_use]
    pub fn effective_cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(Self::default_cache_root)
            .join(&self.namespace)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config: None,
            log_path: None,
            log_level: LogLevel::Info,
            namespace: default_namespace(),
            cache_dir: None,
            cache: CacheConfig::default(),
            download: DownloaderConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::ExpireType;
    use clap::Parser;

    #[test]
    fn test_parse_config_with_sections() {
        let toml_content = r#"
            namespace = "avatars"
            log_level = "debug"

            [cache]
            max_disk_size = 1000
            disk_expire_type = "creation"

            [download]
            max_concurrent_downloads = 2
        "#;

        let config: AppConfig = toml::from_str(toml_content).expect("Failed to parse config");

        assert_eq!(config.namespace, "avatars");
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.cache.max_disk_size, 1000);
        assert_eq!(config.cache.disk_expire_type, ExpireType::Creation);
        assert_eq!(config.download.max_concurrent_downloads, 2);
        assert!(config.cache.should_cache_images_in_memory);
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();

        assert_eq!(config.namespace, DEFAULT_NAMESPACE);
        assert!(config.cache_dir.is_none());
        assert!(config.effective_cache_dir().ends_with(DEFAULT_NAMESPACE));
    }

    #[test]
    fn test_cli_overrides_file_values() {
        let mut config = AppConfig::default();
        let args = CliArgs::parse_from([
            "picache",
            "--namespace",
            "thumbs",
            "--cache-dir",
            "/tmp/pc",
            "--max-disk-size",
            "42",
            "stats",
        ]);

        config.merge_with_args(&args);

        assert_eq!(config.namespace, "thumbs");
        assert_eq!(config.cache.max_disk_size, 42);
        assert_eq!(config.effective_cache_dir(), PathBuf::from("/tmp/pc/thumbs"));
    }
}
