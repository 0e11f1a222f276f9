//! Constants for the download module (timeouts, size limits).

/// Default HTTP connect timeout (10 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default total timeout for an attachment download (30 seconds).
pub const DOWNLOAD_TIMEOUT_SECS: u64 = 30;

/// Default total timeout for page and API requests (10 seconds).
pub const PAGE_TIMEOUT_SECS: u64 = 10;

/// Size limits are expressed in megabytes of this many bytes.
pub const BYTES_PER_MEGABYTE: u64 = 1024 * 1024;
