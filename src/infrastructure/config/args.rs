//! Command line interface definition.

use super::app_config::LogLevel;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command line arguments.
#[derive(Debug, Parser)]
#[command(
    name = "picache",
    version,
    about = "Inspect and maintain a two-tier image cache",
    long_about = None
)]
pub struct CliArgs {
    /// Configuration file path.
    #[arg(short, long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH", global = true)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum, global = true)]
    pub log_level: Option<LogLevel>,

    /// Cache namespace.
    #[arg(short, long, env = "PICACHE_NAMESPACE", global = true)]
    pub namespace: Option<String>,

    /// Cache root directory.
    #[arg(long, value_name = "PATH", env = "PICACHE_DIR", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Disk size limit in bytes (0 = unlimited).
    #[arg(long, global = true)]
    pub max_disk_size: Option<u64>,

    /// Maximum concurrent downloads.
    #[arg(long, global = true)]
    pub max_concurrent_downloads: Option<usize>,

    /// Action to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Cache maintenance commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show disk usage of the cache.
    Stats {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Remove expired entries and trim to the size limit.
    Clean,
    /// Remove every entry.
    Clear,
    /// Print the file path used for a key.
    Path {
        /// Cache key.
        key: String,
    },
    /// Read an entry.
    Get {
        /// Cache key.
        key: String,
        /// Write the encoded bytes to this file.
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Store a file under a key.
    Put {
        /// Cache key.
        key: String,
        /// Image file to store.
        file: PathBuf,
    },
    /// Download URLs through the cache.
    Fetch {
        /// URLs to fetch; each URL is its own key.
        #[arg(required = true)]
        urls: Vec<String>,
    },
}
