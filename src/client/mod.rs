//! Site clients: one adapter per website, resolved by identifier.
//!
//! # Architecture
//!
//! - [`Client`] - Async trait every site adapter implements
//! - [`ClientRegistry`] - Identifier → factory map built once at start-up
//! - [`BuptClient`] - CAS-authenticated university portal
//! - [`CmathcClient`] - Anonymous news list of the CMATHC site
//! - [`SaikrClient`] - Contest listing API plus detail pages
//! - [`BilibiliClient`] - WBI-signed dynamic feed of one space
//!
//! # Example
//!
//! ```no_run
//! use catcher_core::client::{Credentials, build_default_client_registry};
//! use catcher_core::session::SessionConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = build_default_client_registry()?;
//! let client = registry.create(
//!     "cmathc",
//!     Credentials::new("anyone", ""),
//!     &SessionConfig::default(),
//! )?;
//! for entry in client.list().await? {
//!     println!("{} {}", entry.date, entry.title);
//! }
//! # Ok(())
//! # }
//! ```

mod bilibili;
mod bupt;
mod cmathc;
mod credentials;
mod error;
mod registry;
mod saikr;
pub mod utils;

pub use bilibili::{BilibiliClient, BilibiliUrls};
pub use bupt::{BuptClient, BuptUrls};
pub use cmathc::CmathcClient;
pub use credentials::{Credentials, ExtraValue};
pub use error::ClientError;
pub use registry::{ClientFactory, ClientRegistry};
pub use saikr::{SaikrClient, SaikrUrls};

use async_trait::async_trait;
use serde::Serialize;
use tracing::instrument;

use crate::download::{DownloadOutcome, DownloadRequest};
use crate::session::{Session, SiteAuth};

/// Built-in clients in registration order.
const DEFAULT_CLIENTS: &[(&str, ClientFactory)] = &[
    (BuptClient::ID, BuptClient::create),
    (CmathcClient::ID, CmathcClient::create),
    (SaikrClient::ID, SaikrClient::create),
    (BilibiliClient::ID, BilibiliClient::create),
];

/// Builds the registry of built-in clients.
///
/// # Errors
///
/// Returns the registry error if a built-in identifier is invalid or repeated.
pub fn build_default_client_registry() -> Result<ClientRegistry, ClientError> {
    let mut registry = ClientRegistry::new();
    for (identifier, factory) in DEFAULT_CLIENTS {
        registry.register(identifier, *factory)?;
    }
    Ok(registry)
}

/// One row of a notification listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListingEntry {
    /// Cleaned title.
    pub title: String,
    /// Absolute URL of the detail page.
    pub url: String,
    /// Publication date as shown by the site.
    pub date: String,
}

/// A downloadable file linked from a detail page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    /// Display name.
    pub title: String,
    /// Absolute URL.
    pub url: String,
}

/// Sanitized body of a detail page with its attachments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentResult {
    /// Sanitized HTML.
    pub html: String,
    /// Attachments in page order.
    pub attachments: Vec<Attachment>,
}

/// Trait that all site clients implement.
///
/// This trait uses `async_trait` so clients can live behind
/// `Box<dyn Client>` in the registry.
#[async_trait]
pub trait Client: Send + Sync {
    /// Registry identifier of this client.
    fn id(&self) -> &'static str;

    /// The session this client issues requests through.
    fn session(&self) -> &Session;

    /// Login handshake of the site, or `None` for anonymous sites.
    fn auth(&self) -> Option<&dyn SiteAuth> {
        None
    }

    /// Guarantees an authenticated session before an action.
    async fn ensure_authenticated(&self) -> Result<(), ClientError> {
        match self.auth() {
            Some(auth) => self.session().ensure_authenticated(auth).await,
            None => Ok(()),
        }
    }

    /// Fetches the notification listing in page order.
    async fn list(&self) -> Result<Vec<ListingEntry>, ClientError>;

    /// Fetches and sanitizes one detail page.
    async fn detail(&self, url: &str) -> Result<DocumentResult, ClientError>;

    /// Downloads an attachment with the session cookies.
    ///
    /// Only authentication failures are errors; every download failure is
    /// reported as an unsuccessful outcome.
    #[instrument(skip(self, request), fields(client = self.id(), url = %request.url))]
    async fn download(&self, request: &DownloadRequest) -> Result<DownloadOutcome, ClientError> {
        self.ensure_authenticated().await?;
        let success = self.session().download(request).await;
        Ok(DownloadOutcome::new(success, &request.destination))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_has_builtin_clients() {
        let registry = build_default_client_registry().unwrap();
        assert_eq!(registry.identifiers(), vec!["bili", "bupt", "cmathc", "saikr"]);
    }

    #[test]
    fn test_listing_entry_serializes_without_ascii_escaping() {
        let entry = ListingEntry {
            title: "关于放假的通知".to_string(),
            url: "http://my.bupt.edu.cn/info/1.htm".to_string(),
            date: "2024-05-01".to_string(),
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(
            json,
            r#"{"title":"关于放假的通知","url":"http://my.bupt.edu.cn/info/1.htm","date":"2024-05-01"}"#
        );
    }

    #[test]
    fn test_document_result_serializes_attachments() {
        let doc = DocumentResult {
            html: "<p>x</p>".to_string(),
            attachments: vec![Attachment {
                title: "a.pdf".to_string(),
                url: "https://e.com/a.pdf".to_string(),
            }],
        };
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["attachments"][0]["title"], "a.pdf");
    }
}
