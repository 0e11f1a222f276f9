//! Authenticated HTTP sessions with durable cookies.
//!
//! A [`Session`] owns one cookie jar shared by three reqwest clients:
//! a page client that follows redirects, a probe client that does not, and a
//! download client with the longer download timeout. The jar is restored from
//! the [`CookieStore`] before the first action and written back after every
//! successful login, so repeated runs reuse a live portal session.
//!
//! Site clients plug their login handshake in through [`SiteAuth`]; the
//! session decides when it has to run.

mod http;
mod jar;
mod store;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};
use url::Url;

pub use jar::{CookieRecord, SessionJar};
pub use store::{CookieStore, DEFAULT_COOKIE_DIR, StorageError};

use crate::client::ClientError;
use crate::download::constants::{DOWNLOAD_TIMEOUT_SECS, PAGE_TIMEOUT_SECS};
use crate::download::{DownloadRequest, download_file};
use crate::user_agent;
use self::http::{ClientSpec, build_http_client};

/// Settings shared by every session created in one run.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Directory holding persisted cookie records.
    pub cookie_dir: PathBuf,
    /// Total timeout for page and API requests.
    pub page_timeout: Duration,
    /// Total timeout for attachment downloads.
    pub download_timeout: Duration,
    /// User-Agent presented on every request.
    pub user_agent: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_dir: PathBuf::from(DEFAULT_COOKIE_DIR),
            page_timeout: Duration::from_secs(PAGE_TIMEOUT_SECS),
            download_timeout: Duration::from_secs(DOWNLOAD_TIMEOUT_SECS),
            user_agent: user_agent::default_user_agent(),
        }
    }
}

impl SessionConfig {
    /// Returns a copy rooted at another cookie directory.
    #[must_use]
    pub fn with_cookie_dir(mut self, cookie_dir: impl Into<PathBuf>) -> Self {
        self.cookie_dir = cookie_dir.into();
        self
    }
}

/// A fetched page: final URL after redirects, status and decoded body.
#[derive(Debug, Clone)]
pub struct Page {
    /// URL of the last response in the redirect chain.
    pub url: Url,
    /// Status of the last response.
    pub status: StatusCode,
    /// Decoded body text.
    pub body: String,
}

impl Page {
    /// Returns the page, or a transport error for non-success statuses.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] when the status is not 2xx.
    pub fn ensure_success(self) -> Result<Self, ClientError> {
        if self.status.is_success() {
            Ok(self)
        } else {
            Err(ClientError::transport(
                self.url.as_str(),
                format!("server error: HTTP {}", self.status.as_u16()),
            ))
        }
    }
}

/// Login handshake of one site.
#[async_trait]
pub trait SiteAuth: Send + Sync {
    /// Cheap check that the cookies in `session` are still accepted.
    ///
    /// Transport failures count as "not authenticated".
    async fn is_authenticated(&self, session: &Session) -> bool;

    /// Runs the full login handshake, leaving fresh cookies in the session jar.
    async fn login(&self, session: &Session) -> Result<(), ClientError>;

    /// URL the persisted cookies belong to.
    ///
    /// Only cookies sent to this URL are persisted, and restored cookies are
    /// scoped to its host.
    fn session_url(&self) -> String;
}

/// HTTP session of one (site, account) pair.
pub struct Session {
    site_id: String,
    account_id: String,
    jar: Arc<SessionJar>,
    page_client: Client,
    probe_client: Client,
    download_client: Client,
    store: CookieStore,
    authenticated: AtomicBool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("site_id", &self.site_id)
            .field("account_id", &self.account_id)
            .field("jar", &self.jar)
            .field("store", &self.store)
            .field("authenticated", &self.is_authenticated())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Creates a session with an empty jar.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] when an HTTP client cannot be built.
    pub fn new(
        site_id: impl Into<String>,
        account_id: impl Into<String>,
        config: &SessionConfig,
    ) -> Result<Self, ClientError> {
        let jar = Arc::new(SessionJar::new());
        let page_spec = ClientSpec {
            name: "page",
            user_agent: &config.user_agent,
            timeout: config.page_timeout,
            follow_redirects: true,
        };
        let probe_spec = ClientSpec {
            name: "probe",
            follow_redirects: false,
            ..page_spec.clone()
        };
        let download_spec = ClientSpec {
            name: "download",
            timeout: config.download_timeout,
            ..page_spec.clone()
        };

        Ok(Self {
            site_id: site_id.into(),
            account_id: account_id.into(),
            page_client: build_http_client(&jar, &page_spec)?,
            probe_client: build_http_client(&jar, &probe_spec)?,
            download_client: build_http_client(&jar, &download_spec)?,
            jar,
            store: CookieStore::new(&config.cookie_dir),
            authenticated: AtomicBool::new(false),
        })
    }

    /// Site identifier used to key persisted cookies.
    #[must_use]
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    /// Account identifier used to key persisted cookies.
    #[must_use]
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// The cookie jar shared by all clients of this session.
    #[must_use]
    pub fn jar(&self) -> &SessionJar {
        &self.jar
    }

    /// The persistent cookie store.
    #[must_use]
    pub fn store(&self) -> &CookieStore {
        &self.store
    }

    /// Client that follows redirects.
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.page_client
    }

    /// Client that never follows redirects.
    #[must_use]
    pub fn probe_client(&self) -> &Client {
        &self.probe_client
    }

    /// True once [`Session::ensure_authenticated`] has succeeded.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    /// Makes sure the session holds accepted cookies, logging in at most once.
    ///
    /// Stored cookies are loaded first; login is skipped when they exist and
    /// the site probe accepts them. After a login the jar is persisted.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Authentication`] when the login handshake fails.
    #[instrument(skip(self, auth), fields(site = %self.site_id))]
    pub async fn ensure_authenticated(&self, auth: &dyn SiteAuth) -> Result<(), ClientError> {
        if self.is_authenticated() {
            return Ok(());
        }

        let scope = Url::parse(&auth.session_url()).map_err(|e| {
            ClientError::authentication(&self.site_id, format!("invalid session url: {e}"))
        })?;
        let has_cookies = self.restore_cookies(&scope);
        let accepted = auth.is_authenticated(self).await;
        debug!(has_cookies, accepted, "checked stored session");

        if has_cookies && accepted {
            info!("stored session is valid, skipping login");
        } else {
            info!("session out of date, logging in");
            auth.login(self).await.map_err(|error| {
                if error.is_authentication() {
                    error
                } else {
                    ClientError::authentication(&self.site_id, error.to_string())
                }
            })?;
            self.persist_cookies(&scope);
        }

        self.authenticated.store(true, Ordering::Release);
        Ok(())
    }

    /// Loads the persisted record into the jar, scoped to the host of `scope`.
    /// Returns true when a record existed.
    ///
    /// A corrupt record is logged and treated as absent.
    pub fn restore_cookies(&self, scope: &Url) -> bool {
        match self.store.load(&self.site_id, &self.account_id) {
            Ok(Some(record)) if !record.is_empty() => {
                self.jar.extend(&record, scope);
                true
            }
            Ok(_) => false,
            Err(error) => {
                warn!(error = %error, "ignoring unreadable cookie record");
                false
            }
        }
    }

    /// Writes the cookies sent to `scope` to the store. Returns the record path
    /// when written.
    ///
    /// An empty record is not written; storage failures are logged.
    pub fn persist_cookies(&self, scope: &Url) -> Option<PathBuf> {
        let snapshot = self.jar.snapshot_for(scope);
        if snapshot.is_empty() {
            warn!("login finished without cookies, nothing to persist");
            return None;
        }
        match self
            .store
            .save(&self.site_id, &self.account_id, &snapshot)
        {
            Ok(path) => {
                info!(path = %path.display(), count = snapshot.len(), "cookies persisted");
                Some(path)
            }
            Err(error) => {
                warn!(error = %error, "failed to persist cookies");
                None
            }
        }
    }

    /// GET through the redirect-following client. Any status is returned.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] on network failure.
    pub async fn get_page(&self, url: &str, headers: &[(&str, &str)]) -> Result<Page, ClientError> {
        let request = with_headers(self.page_client.get(url), headers);
        send_for_page(url, request).await
    }

    /// GET that must succeed and decode as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] on network failure or non-success
    /// status and [`ClientError::Parse`] when the body is not the expected JSON.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<T, ClientError> {
        let page = self.get_page(url, headers).await?.ensure_success()?;
        serde_json::from_str(&page.body)
            .map_err(|e| ClientError::parse(&format!("JSON from {url}"), e.to_string()))
    }

    /// POST an `application/x-www-form-urlencoded` body, following redirects.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] on network failure.
    pub async fn post_form(
        &self,
        url: &str,
        fields: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<Page, ClientError> {
        let request = with_headers(self.page_client.post(url), headers).form(fields);
        send_for_page(url, request).await
    }

    /// GET through the probe client and report whether the answer is exactly 200.
    pub async fn probe(&self, url: &str) -> bool {
        match self.probe_client.get(url).send().await {
            Ok(response) => {
                debug!(url, status = response.status().as_u16(), "probe answered");
                response.status() == StatusCode::OK
            }
            Err(error) => {
                debug!(url, error = %error, "probe failed");
                false
            }
        }
    }

    /// Streams an attachment to disk with the session cookies.
    pub async fn download(&self, request: &DownloadRequest) -> bool {
        download_file(&self.download_client, request).await
    }
}

fn with_headers(mut request: RequestBuilder, headers: &[(&str, &str)]) -> RequestBuilder {
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    request
}

async fn send_for_page(url: &str, request: RequestBuilder) -> Result<Page, ClientError> {
    let response = request
        .send()
        .await
        .map_err(|e| ClientError::transport(url, e))?;
    let final_url = response.url().clone();
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ClientError::transport(url, e))?;
    debug!(url = %final_url, status = status.as_u16(), bytes = body.len(), "page fetched");
    Ok(Page {
        url: final_url,
        status,
        body,
    })
}
