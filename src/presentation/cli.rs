//! Command dispatch for the `picache` binary.

use std::io::Write;
use std::sync::Arc;

use bytes::Bytes;
use color_eyre::eyre::{Result, bail, eyre};
use futures_util::future::join_all;
use tracing::info;

use crate::application::services::ImageLoader;
use crate::domain::entities::QueryOptions;
use crate::infrastructure::cache::ImageCache;
use crate::infrastructure::config::{AppConfig, Command};
use crate::infrastructure::download::Downloader;

/// Everything a command needs.
#[derive(Debug, Clone)]
pub struct CliContext {
    /// Cache the commands act on.
    pub cache: Arc<ImageCache>,
    /// Loader used by `fetch`.
    pub loader: ImageLoader,
}

impl CliContext {
    /// Builds the cache and downloader described by `config`.
    ///
    /// # Errors
    /// Returns error if the cache or HTTP client cannot be created.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let cache = Arc::new(ImageCache::with_config(
            &config.namespace,
            config.cache_dir.as_deref(),
            config.cache.clone(),
        )?);
        let downloader = Arc::new(Downloader::with_http(config.download.clone())?);
        let loader = ImageLoader::new(cache.clone(), downloader);
        Ok(Self { cache, loader })
    }
}

/// Runs `command`, writing human-readable output to `out`.
///
/// # Errors
/// Returns error if the command fails or output cannot be written.
pub async fn execute<W: Write>(command: Command, ctx: &CliContext, out: &mut W) -> Result<()> {
    let cache = &ctx.cache;
    match command {
        Command::Stats { json } => {
            let (files, bytes) = cache.calculate_size().await;
            if json {
                let stats = serde_json::json!({
                    "namespace": cache.namespace(),
                    "path": cache.disk_cache_path(),
                    "files": files,
                    "bytes": bytes,
                });
                writeln!(out, "{}", serde_json::to_string_pretty(&stats)?)?;
            } else {
                writeln!(out, "namespace: {}", cache.namespace())?;
                writeln!(out, "path:      {}", cache.disk_cache_path().display())?;
                writeln!(out, "files:     {files}")?;
                writeln!(out, "bytes:     {bytes}")?;
            }
        }
        Command::Clean => {
            let report = cache.delete_expired().await;
            info!(removed = report.removed.len(), "Disk cleanup finished");
            writeln!(
                out,
                "removed {} files ({} bytes); {} files ({} bytes) remain",
                report.removed.len(),
                report.removed_bytes,
                report.remaining_count,
                report.remaining_size
            )?;
        }
        Command::Clear => {
            cache.clear_disk().await;
            writeln!(out, "cleared {}", cache.disk_cache_path().display())?;
        }
        Command::Path { key } => {
            let path = cache.cache_path(&key).ok_or_else(|| eyre!("key must not be empty"))?;
            writeln!(out, "{}", path.display())?;
        }
        Command::Get { key, output } => {
            let data = cache
                .disk_image_data_query(&key)
                .await
                .ok_or_else(|| eyre!("no entry for {key}"))?;
            if let Some(path) = output {
                tokio::fs::write(&path, &data).await?;
                writeln!(out, "wrote {} bytes to {}", data.len(), path.display())?;
            }
            match cache.codec().decode(&data, QueryOptions::empty()) {
                Some(image) => writeln!(
                    out,
                    "{key}: {}x{} {}, {} bytes",
                    image.width(),
                    image.height(),
                    image
                        .format()
                        .map_or_else(|| "unknown".to_string(), |f| format!("{f:?}").to_lowercase()),
                    data.len()
                )?,
                None => writeln!(out, "{key}: undecodable, {} bytes", data.len())?,
            }
        }
        Command::Put { key, file } => {
            let data = tokio::fs::read(&file).await?;
            let Some(image) = cache.codec().decode(&data, QueryOptions::empty()) else {
                bail!("{} is not a supported image", file.display());
            };
            cache
                .store(Some(Arc::new(image)), Some(Bytes::from(data)), &key, true)
                .await;
            let path = cache.cache_path(&key).ok_or_else(|| eyre!("key must not be empty"))?;
            writeln!(out, "stored {key} at {}", path.display())?;
        }
        Command::Fetch { urls } => {
            let results = join_all(
                urls.iter()
                    .map(|url| ctx.loader.load(url, QueryOptions::empty())),
            )
            .await;
            let mut failed = 0;
            for (url, result) in urls.iter().zip(results) {
                match result {
                    Ok(loaded) => writeln!(
                        out,
                        "{url}: {}x{} from {}",
                        loaded.image.width(),
                        loaded.image.height(),
                        loaded.source
                    )?,
                    Err(e) => {
                        failed += 1;
                        writeln!(out, "{url}: {e}")?;
                    }
                }
            }
            if failed > 0 {
                bail!("{failed} of {} downloads failed", urls.len());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat};
    use tempfile::TempDir;

    fn context(dir: &TempDir) -> CliContext {
        let config = AppConfig {
            namespace: "cli".to_string(),
            cache_dir: Some(dir.path().to_path_buf()),
            ..AppConfig::default()
        };
        CliContext::from_config(&config).unwrap()
    }

    async fn run(command: Command, ctx: &CliContext) -> Result<String> {
        let mut out = Vec::new();
        execute(command, ctx, &mut out).await?;
        Ok(String::from_utf8(out)?)
    }

    #[tokio::test]
    async fn test_put_get_stats_clear() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let source = dir.path().join("in.png");
        DynamicImage::new_rgb8(5, 2)
            .save_with_format(&source, ImageFormat::Png)
            .unwrap();

        let stored = run(
            Command::Put {
                key: "logo".into(),
                file: source.clone(),
            },
            &ctx,
        )
        .await
        .unwrap();
        assert!(stored.starts_with("stored logo at"));

        let exported = dir.path().join("out.png");
        let got = run(
            Command::Get {
                key: "logo".into(),
                output: Some(exported.clone()),
            },
            &ctx,
        )
        .await
        .unwrap();
        assert!(got.contains("logo: 5x2 png"));
        assert_eq!(std::fs::read(&exported).unwrap(), std::fs::read(&source).unwrap());

        let stats = run(Command::Stats { json: true }, &ctx).await.unwrap();
        let stats: serde_json::Value = serde_json::from_str(&stats).unwrap();
        assert_eq!(stats["files"], 1);
        assert_eq!(stats["namespace"], "cli");

        run(Command::Clear, &ctx).await.unwrap();
        let stats = run(Command::Stats { json: false }, &ctx).await.unwrap();
        assert!(stats.contains("files:     0"));
    }

    #[tokio::test]
    async fn test_get_missing_key_fails() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let result = run(
            Command::Get {
                key: "absent".into(),
                output: None,
            },
            &ctx,
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_put_rejects_non_image() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let source = dir.path().join("notes.txt");
        std::fs::write(&source, "hello").unwrap();

        let result = run(
            Command::Put {
                key: "notes".into(),
                file: source,
            },
            &ctx,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(ctx.cache.calculate_size().await, (0, 0));
    }

    #[tokio::test]
    async fn test_path_and_clean() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let path = run(Command::Path { key: "k".into() }, &ctx).await.unwrap();
        assert!(path.trim_end().starts_with(&dir.path().join("cli").display().to_string()));
        assert!(run(Command::Path { key: String::new() }, &ctx).await.is_err());

        let cleaned = run(Command::Clean, &ctx).await.unwrap();
        assert!(cleaned.starts_with("removed 0 files"));
    }
}
