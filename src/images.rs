//! Profile image download and resize.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use image::imageops::FilterType;
use image::DynamicImage;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::{M3Error, ResultExt};

/// Side length of the square image the model consumes.
pub const RESIZED_SIDE: u32 = 224;

static THUMBNAIL_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_(normal|200x200)").expect("valid thumbnail regex"));

/// Downloads a profile image and writes the resized (and optionally the
/// full-size) variant to disk.
///
/// Implementations never fail: errors are logged and the resized file is
/// simply left absent, which callers detect by checking the path.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn download_resize(&self, url: &str, resized: &Path, full: Option<&Path>);
}

/// Extension used for the resized image of `img_path`.
///
/// GIFs are re-encoded as PNG, and paths without an extension default to PNG.
pub fn get_extension(img_path: &str) -> String {
    let last = img_path.rsplit('/').next().unwrap_or(img_path);
    match last.rfind('.') {
        None => "png".to_string(),
        Some(pos) => {
            let ext = &last[pos + 1..];
            if ext.eq_ignore_ascii_case("gif") {
                "png".to_string()
            } else {
                ext.to_string()
            }
        }
    }
}

/// Extension of the original file, if the last path segment has one.
pub fn raw_extension(img_path: &str) -> Option<&str> {
    let last = img_path.rsplit('/').next().unwrap_or(img_path);
    last.rfind('.').map(|pos| &last[pos + 1..])
}

/// Upgrades a Twitter thumbnail URL (`_normal`, `_200x200`) to the 400x400 variant.
pub fn upgrade_thumbnail(url: &str) -> String {
    THUMBNAIL_SUFFIX.replace_all(url, "_400x400").into_owned()
}

/// Whether `path` names a remote http(s) resource rather than a local file.
pub fn is_url(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://")
}

/// `<dir>/<id>_224x224.<ext>`
pub fn resized_path(dir: &Path, id: &str, img_url: &str) -> PathBuf {
    dir.join(format!(
        "{}_{}x{}.{}",
        id,
        RESIZED_SIDE,
        RESIZED_SIDE,
        get_extension(img_url)
    ))
}

/// `<dir>/<id>[.<ext>]`, keeping the original extension.
pub fn full_size_path(dir: &Path, id: &str, img_url: &str) -> PathBuf {
    match raw_extension(img_url) {
        Some(ext) => dir.join(format!("{}.{}", id, ext)),
        None => dir.join(id),
    }
}

/// Resizes to the model's input size, dropping alpha for formats that cannot carry it.
pub fn resize_for_model(img: &DynamicImage, target: &Path) -> DynamicImage {
    let resized = img.resize_exact(RESIZED_SIDE, RESIZED_SIDE, FilterType::Lanczos3);
    let is_jpeg = target
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg"))
        .unwrap_or(false);
    if is_jpeg {
        DynamicImage::ImageRgb8(resized.to_rgb8())
    } else {
        resized
    }
}

/// Image fetcher backed by reqwest and the `image` crate.
#[derive(Clone)]
pub struct HttpImageFetcher {
    client: reqwest::Client,
}

impl HttpImageFetcher {
    pub fn new() -> Result<Self, M3Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                M3Error::ExternalApiError(format!("Failed to create image client: {}", e))
            })?;
        Ok(Self { client })
    }

    async fn try_download_resize(
        &self,
        url: &str,
        resized: &Path,
        full: Option<&Path>,
    ) -> Result<(), M3Error> {
        let bytes = self.read_source(url).await?;

        if let Some(full) = full {
            create_parent(full)?;
            tokio::fs::write(full, &bytes)
                .await
                .with_context(|| format!("Failed to write {}", full.display()))?;
        }

        let img = image::load_from_memory(&bytes)?;
        create_parent(resized)?;
        resize_for_model(&img, resized).save(resized)?;
        Ok(())
    }
}

impl HttpImageFetcher {
    /// Raw image bytes from an http(s) URL or a local file path.
    async fn read_source(&self, source: &str) -> Result<Vec<u8>, M3Error> {
        if !is_url(source) {
            return tokio::fs::read(source)
                .await
                .with_context(|| format!("Failed to read {}", source));
        }
        let response = self.client.get(source).send().await?;
        if !response.status().is_success() {
            return Err(M3Error::ExternalApiError(format!(
                "Image download returned {}",
                response.status()
            )));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

fn create_parent(path: &Path) -> Result<(), M3Error> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Ok(())
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn download_resize(&self, url: &str, resized: &Path, full: Option<&Path>) {
        tracing::debug!("Downloading profile image {} -> {}", url, resized.display());
        if let Err(e) = self.try_download_resize(url, resized, full).await {
            tracing::warn!("Unable to download or resize image {}: {}", url, e);
        }
    }
}
