//! Network download infrastructure.
//!
//! A [`DownloadOperation`] runs one fetch and fans its progress and outcome out
//! to every subscribed token. The [`Downloader`] keeps one operation per URL.

pub mod downloader;
pub mod http_transport;
pub mod operation;

pub use downloader::{DownloadHandle, Downloader, DownloaderConfig};
pub use http_transport::HttpTransport;
pub use operation::{CompletionCallback, DownloadOperation, ProgressCallback};
