//! Catcher Core Library
//!
//! Fetches notification listings, detail pages and attachments from unrelated
//! third-party sites through per-site adapters, keeping each site's login
//! alive across runs with persisted cookies.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`client`] - Site adapters and the identifier registry
//! - [`session`] - Cookie-backed HTTP sessions and the login lifecycle
//! - [`download`] - Size-bounded streaming downloads
//! - [`signing`] - WBI request signing for the Bilibili API
//! - [`sanitize`] - Allow-list HTML sanitizer for detail pages

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod download;
pub mod sanitize;
pub mod session;
pub mod signing;
mod user_agent;

// Re-export commonly used types
pub use client::{
    Attachment, Client, ClientError, ClientRegistry, Credentials, DocumentResult, ExtraValue,
    ListingEntry, build_default_client_registry,
};
pub use download::{DownloadError, DownloadOutcome, DownloadRequest};
pub use session::{CookieStore, Session, SessionConfig, SiteAuth};
pub use user_agent::BROWSER_USER_AGENT;
