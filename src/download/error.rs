//! Error types for the download module.
//!
//! Every variant is recovered into a boolean failure by
//! [`download_file`](super::download_file); the structured form exists so the
//! failure can be logged with full context.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during a streamed file download.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// File system error during download (create file, write, etc.)
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// The body is larger than the caller's size limit.
    #[error(
        "file too large downloading {url}: {actual_bytes} bytes {}, over the limit of {limit_bytes} bytes",
        size_source(.declared)
    )]
    SizeLimitExceeded {
        /// The URL being downloaded.
        url: String,
        /// The configured limit in bytes.
        limit_bytes: u64,
        /// Declared (`Content-Length`) or received byte count.
        actual_bytes: u64,
        /// Whether `actual_bytes` came from the `Content-Length` header.
        declared: bool,
    },
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn size_source(declared: &bool) -> &'static str {
    if *declared { "declared" } else { "received" }
}

impl DownloadError {
    /// Creates a network error from a reqwest error, promoting timeouts.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            return Self::Timeout { url: url.into() };
        }
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a size limit error for a declared `Content-Length`.
    pub fn declared_too_large(url: impl Into<String>, limit_bytes: u64, declared: u64) -> Self {
        Self::SizeLimitExceeded {
            url: url.into(),
            limit_bytes,
            actual_bytes: declared,
            declared: true,
        }
    }

    /// Creates a size limit error for a body that streamed past the limit.
    pub fn received_too_large(url: impl Into<String>, limit_bytes: u64, received: u64) -> Self {
        Self::SizeLimitExceeded {
            url: url.into(),
            limit_bytes,
            actual_bytes: received,
            declared: false,
        }
    }

    /// Returns true when the download was aborted by the size limit.
    #[must_use]
    pub fn is_size_limit(&self) -> bool {
        matches!(self, Self::SizeLimitExceeded { .. })
    }
}
