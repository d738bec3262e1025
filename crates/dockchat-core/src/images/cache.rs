//! Session cache for images referenced by rendered markdown.
//!
//! Every URL is fetched at most once per session. Failures are cached too
//! (negative cache) and only `clear()` makes a URL eligible again.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use tokio::time::{Instant, timeout_at};

use super::scale::{Bitmap, decode_to_width};
use crate::config::ImagesConfig;

const USER_AGENT: &str = concat!("dockchat/", env!("CARGO_PKG_VERSION"));

/// Outcome of resolving an image URL.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageResolution {
    Ready(Arc<Bitmap>),
    Failed,
}

impl ImageResolution {
    pub fn is_failed(&self) -> bool {
        matches!(self, ImageResolution::Failed)
    }
}

/// Why an image could not be fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageFetchError {
    /// Connect timeout or download budget exceeded.
    Timeout,
    /// Connection refused, reset, DNS failure and the like.
    Transport(String),
    /// Non-success HTTP status.
    Status(u16),
    /// Payload is not a decodable image.
    Decode(String),
}

impl fmt::Display for ImageFetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageFetchError::Timeout => write!(f, "request timeout"),
            ImageFetchError::Transport(msg) => write!(f, "connection error: {msg}"),
            ImageFetchError::Status(code) => write!(f, "HTTP {code}"),
            ImageFetchError::Decode(msg) => write!(f, "unreadable image ({msg})"),
        }
    }
}

impl std::error::Error for ImageFetchError {}

/// Fetches, scales and caches remote images.
pub struct ImageResourceCache {
    http: reqwest::Client,
    download_budget: Duration,
    viewport_width: AtomicU32,
    entries: Mutex<HashMap<String, ImageResolution>>,
    notices: Mutex<Vec<String>>,
}

impl ImageResourceCache {
    /// Creates a cache with the configured connect timeout and download budget.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &ImagesConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .user_agent(USER_AGENT)
            .build()
            .context("build image HTTP client")?;

        Ok(Self {
            http,
            download_budget: config.download_budget(),
            viewport_width: AtomicU32::new(0),
            entries: Mutex::new(HashMap::new()),
            notices: Mutex::new(Vec::new()),
        })
    }

    /// Sets the width (in pixels) images are fitted to. 0 disables scaling.
    pub fn set_viewport_width(&self, width: u32) {
        self.viewport_width.store(width, Ordering::Relaxed);
    }

    pub fn viewport_width(&self) -> u32 {
        self.viewport_width.load(Ordering::Relaxed)
    }

    /// Returns the cached outcome for `url` without touching the network.
    pub fn lookup(&self, url: &str) -> Option<ImageResolution> {
        self.entries().get(url.trim()).cloned()
    }

    /// True when `url` is negatively cached.
    pub fn is_failed(&self, url: &str) -> bool {
        self.lookup(url).is_some_and(|r| r.is_failed())
    }

    /// Resolves `url` to a bitmap, fetching it on a cache miss.
    ///
    /// Bounded by the connect timeout plus the download budget. Only
    /// `http`/`https` URLs are fetched; anything else resolves to `Failed`
    /// without being cached.
    pub async fn resolve(&self, url: &str) -> ImageResolution {
        let key = url.trim();
        if let Some(hit) = self.lookup(key) {
            return hit;
        }

        if !is_fetchable(key) {
            tracing::debug!(url = key, "skipping non-http image");
            return ImageResolution::Failed;
        }

        let resolution = match self.fetch(key).await {
            Ok(bitmap) => {
                tracing::debug!(
                    url = key,
                    width = bitmap.width(),
                    height = bitmap.height(),
                    "image cached"
                );
                ImageResolution::Ready(Arc::new(bitmap))
            }
            Err(err) => {
                tracing::warn!(url = key, error = %err, "image fetch failed");
                self.push_notice(format!("Image failed to load ({err}): {key}"));
                ImageResolution::Failed
            }
        };

        // First outcome wins; a concurrent fetch of the same key never
        // replaces an entry.
        self.entries()
            .entry(key.to_string())
            .or_insert(resolution)
            .clone()
    }

    /// Drops every cached entry, including failures.
    pub fn clear(&self) {
        self.entries().clear();
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Returns and clears the user-facing failure notices collected so far.
    pub fn take_notices(&self) -> Vec<String> {
        std::mem::take(
            &mut *self
                .notices
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, ImageResolution>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push_notice(&self, notice: String) {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notice);
    }

    async fn fetch(&self, url: &str) -> Result<Bitmap, ImageFetchError> {
        // One budget covers the response head and every body chunk.
        let deadline = Instant::now() + self.download_budget;

        let response = timeout_at(deadline, self.http.get(url).send())
            .await
            .map_err(|_elapsed| ImageFetchError::Timeout)?
            .map_err(|e| classify_reqwest_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ImageFetchError::Status(status.as_u16()));
        }

        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        loop {
            match timeout_at(deadline, stream.next()).await {
                Err(_elapsed) => return Err(ImageFetchError::Timeout),
                Ok(None) => break,
                Ok(Some(Err(e))) => return Err(classify_reqwest_error(&e)),
                Ok(Some(Ok(chunk))) => body.extend_from_slice(&chunk),
            }
        }

        let max_width = self.viewport_width();
        tokio::task::spawn_blocking(move || decode_to_width(&body, max_width))
            .await
            .map_err(|e| ImageFetchError::Decode(e.to_string()))?
            .map_err(ImageFetchError::Decode)
    }
}

fn is_fetchable(url: &str) -> bool {
    url::Url::parse(url).is_ok_and(|u| matches!(u.scheme(), "http" | "https"))
}

fn classify_reqwest_error(e: &reqwest::Error) -> ImageFetchError {
    if e.is_timeout() {
        ImageFetchError::Timeout
    } else {
        ImageFetchError::Transport(e.to_string())
    }
}
