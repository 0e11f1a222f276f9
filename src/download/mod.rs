//! Streaming attachment downloads with an optional size cap.
//!
//! Downloads go through the session's dedicated download client so they carry
//! the session cookies. A body is streamed chunk by chunk to the destination;
//! the declared `Content-Length` is checked before the file is created and the
//! running total is checked before every write. Any failure removes the
//! partial file, so a `false` outcome never leaves data behind.
//!
//! # Example
//!
//! ```no_run
//! use catcher_core::download::{DownloadRequest, download_file};
//!
//! # async fn example(client: &reqwest::Client) {
//! let request = DownloadRequest::new("https://example.com/notice.pdf", "./notice.pdf")
//!     .with_max_size_mb(5);
//! let ok = download_file(client, &request).await;
//! println!("downloaded: {ok}");
//! # }
//! ```

pub mod constants;
mod error;
mod stream;

use std::path::{Path, PathBuf};

use serde::Serialize;

pub use error::DownloadError;
pub use stream::{download_file, stream_download};

use constants::BYTES_PER_MEGABYTE;

/// One attachment download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    /// Absolute URL of the file.
    pub url: String,
    /// Destination path; overwritten if it exists.
    pub destination: PathBuf,
    /// Optional `Referer` header value.
    pub referer: Option<String>,
    /// Optional size cap in megabytes. `0` means no cap.
    pub max_size_mb: Option<u64>,
}

impl DownloadRequest {
    /// Creates a request with no referer and no size cap.
    #[must_use]
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            destination: destination.into(),
            referer: None,
            max_size_mb: None,
        }
    }

    /// Sets the `Referer` header.
    #[must_use]
    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    /// Caps the body size in megabytes.
    #[must_use]
    pub fn with_max_size_mb(mut self, max_size_mb: u64) -> Self {
        self.max_size_mb = Some(max_size_mb);
        self
    }

    /// Returns the effective cap in bytes, if any.
    #[must_use]
    pub fn limit_bytes(&self) -> Option<u64> {
        self.max_size_mb
            .filter(|mb| *mb > 0)
            .map(|mb| mb.saturating_mul(BYTES_PER_MEGABYTE))
    }
}

/// Result of a download action as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadOutcome {
    /// Whether the file was fully written.
    pub success: bool,
    /// Destination path that was requested.
    pub path: String,
}

impl DownloadOutcome {
    /// Builds an outcome for `destination`.
    #[must_use]
    pub fn new(success: bool, destination: &Path) -> Self {
        Self {
            success,
            path: destination.display().to_string(),
        }
    }
}
