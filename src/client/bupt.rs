//! BUPT information portal (`my.bupt.edu.cn`) behind the university CAS.
//!
//! Login walks the CAS handshake: the portal redirects to the CAS form, the
//! form's `execution` token and the `owner` of the portal's service URL are
//! posted back with the credentials, and the portal entrance page names the
//! homepage that finally issues the session cookie.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, info, instrument};
use url::Url;

use super::utils::{
    UNKNOWN_TITLE, absolutize_url, collect_rows, compile_static_regex, compile_static_selector,
    extract_news_row, own_text,
};
use super::{Attachment, Client, ClientError, Credentials, DocumentResult, ListingEntry};
use crate::sanitize::{PLACEHOLDER_HTML, sanitize_element};
use crate::session::{Session, SessionConfig, SiteAuth};

/// School notices tree of the portal.
const NOTICE_LIST_PATH: &str = "/list.jsp?urltype=tree.TreeTempUrl&wbtreeid=1154";

static EXECUTION_INPUT: LazyLock<Selector> =
    LazyLock::new(|| compile_static_selector(r#"#loginForm > * > input[name="execution"]"#));
static ENTRANCE_SCRIPT: LazyLock<Selector> =
    LazyLock::new(|| compile_static_selector("div > script"));
static NOTICE_ROWS: LazyLock<Selector> =
    LazyLock::new(|| compile_static_selector(r#"div > ul[class="newslist list-unstyled"] > li"#));
static NOTICE_DATE: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("span.time"));
static DETAIL_BODY: LazyLock<Selector> =
    LazyLock::new(|| compile_static_selector(r#"div[class="v_news_content"]"#));
static ATTACHMENT_ROWS: LazyLock<Selector> =
    LazyLock::new(|| compile_static_selector(r#"div[class="battch"] > ul > li"#));
static ANCHOR: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("a"));
static QUOTED: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r#""(.*?)""#));

/// Endpoints of the portal and its CAS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuptUrls {
    /// Portal origin, e.g. `http://my.bupt.edu.cn`.
    pub portal: String,
    /// CAS origin, e.g. `https://auth.bupt.edu.cn`.
    pub auth: String,
}

impl Default for BuptUrls {
    fn default() -> Self {
        Self {
            portal: "http://my.bupt.edu.cn".to_string(),
            auth: "https://auth.bupt.edu.cn".to_string(),
        }
    }
}

impl BuptUrls {
    fn portal_root(&self) -> String {
        format!("{}/", self.portal.trim_end_matches('/'))
    }

    fn portal_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.portal.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Client for the BUPT portal.
#[derive(Debug)]
pub struct BuptClient {
    credentials: Credentials,
    urls: BuptUrls,
    session: Session,
}

impl BuptClient {
    /// Registry identifier.
    pub const ID: &'static str = "bupt";

    /// Creates a client against the production portal.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] when the session cannot be built.
    pub fn new(credentials: Credentials, config: &SessionConfig) -> Result<Self, ClientError> {
        Self::with_urls(credentials, config, BuptUrls::default())
    }

    /// Creates a client against custom endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] when the session cannot be built.
    pub fn with_urls(
        credentials: Credentials,
        config: &SessionConfig,
        urls: BuptUrls,
    ) -> Result<Self, ClientError> {
        let session = Session::new(Self::ID, credentials.account.clone(), config)?;
        Ok(Self {
            credentials,
            urls,
            session,
        })
    }

    /// Registry factory.
    ///
    /// # Errors
    ///
    /// See [`BuptClient::new`].
    pub fn create(
        credentials: Credentials,
        config: &SessionConfig,
    ) -> Result<Box<dyn Client>, ClientError> {
        Ok(Box::new(Self::new(credentials, config)?))
    }
}

#[async_trait]
impl SiteAuth for BuptClient {
    async fn is_authenticated(&self, session: &Session) -> bool {
        session.probe(&self.urls.portal_root()).await
    }

    #[instrument(skip(self, session), fields(account = %self.credentials.account))]
    async fn login(&self, session: &Session) -> Result<(), ClientError> {
        let fail = |reason: String| ClientError::authentication(Self::ID, reason);

        info!("accessing portal");
        let login_page = session.get_page(&self.urls.portal_root(), &[]).await?;
        if !login_page.status.is_success() {
            return Err(fail(format!(
                "server error: HTTP {}",
                login_page.status.as_u16()
            )));
        }
        let execution = extract_execution(&login_page.body)
            .ok_or_else(|| fail("login form has no execution token".to_string()))?;
        let owner = extract_owner(&login_page.url)
            .ok_or_else(|| fail(format!("no service owner in {}", login_page.url)))?;
        debug!(execution_len = execution.len(), owner = %owner, "parsed login form");

        let service = self
            .urls
            .portal_url(&format!("system/resource/code/auth/clogin.jsp?owner={owner}"));
        let login_url = format!(
            "{}/authserver/login?service={}",
            self.urls.auth.trim_end_matches('/'),
            urlencoding::encode(&service)
        );
        session
            .post_form(
                &login_url,
                &[
                    ("username", self.credentials.account.as_str()),
                    ("password", self.credentials.secret()),
                    ("submit", "登录"),
                    ("type", "username_password"),
                    ("execution", execution.as_str()),
                    ("_eventId", "submit"),
                ],
                &[],
            )
            .await?;

        let entrance = session
            .get_page(&self.urls.portal_url("index.jsp?null"), &[])
            .await?;
        let homepage_path = extract_homepage_path(&entrance.body)
            .ok_or_else(|| fail("entrance page has no homepage redirect".to_string()))?;
        info!("found homepage url");

        let homepage = session
            .get_page(&self.urls.portal_url(&homepage_path), &[])
            .await?;
        if homepage.status.as_u16() != 200 {
            return Err(fail(format!(
                "failed to open homepage, status_code: {}",
                homepage.status.as_u16()
            )));
        }
        info!("login ticket obtained");
        Ok(())
    }

    fn session_url(&self) -> String {
        self.urls.portal_root()
    }
}

#[async_trait]
impl Client for BuptClient {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn session(&self) -> &Session {
        &self.session
    }

    fn auth(&self) -> Option<&dyn SiteAuth> {
        Some(self)
    }

    #[instrument(skip(self), fields(client = Self::ID))]
    async fn list(&self) -> Result<Vec<ListingEntry>, ClientError> {
        self.ensure_authenticated().await?;
        let page = self
            .session
            .get_page(&self.urls.portal_url(NOTICE_LIST_PATH), &[])
            .await?
            .ensure_success()?;
        parse_notice_list(&page.body, &self.urls)
    }

    #[instrument(skip(self), fields(client = Self::ID))]
    async fn detail(&self, url: &str) -> Result<DocumentResult, ClientError> {
        self.ensure_authenticated().await?;
        let page = self.session.get_page(url, &[]).await?.ensure_success()?;
        parse_detail(&page.body, &self.urls)
    }
}

fn extract_execution(body: &str) -> Option<String> {
    let document = Html::parse_document(body);
    document
        .select(&EXECUTION_INPUT)
        .next()
        .and_then(|input| input.value().attr("value"))
        .map(str::to_string)
}

/// Reads `owner` from the portal service URL carried in the CAS login URL.
fn extract_owner(login_url: &Url) -> Option<String> {
    let service = login_url
        .query_pairs()
        .find(|(key, _)| key == "service")
        .map(|(_, value)| value.into_owned())?;
    let service = Url::parse(&service).ok()?;
    service
        .query_pairs()
        .find(|(key, _)| key == "owner")
        .map(|(_, value)| value.into_owned())
}

fn extract_homepage_path(body: &str) -> Option<String> {
    let document = Html::parse_document(body);
    let script = document.select(&ENTRANCE_SCRIPT).next()?;
    let source: String = script.text().collect();
    QUOTED
        .captures(&source)
        .and_then(|captures| captures.get(1))
        .map(|path| path.as_str().to_string())
}

fn parse_notice_list(body: &str, urls: &BuptUrls) -> Result<Vec<ListingEntry>, ClientError> {
    let base = Url::parse(&urls.portal_root())
        .map_err(|e| ClientError::parse("portal url", e.to_string()))?;
    let document = Html::parse_document(body);
    Ok(collect_rows(
        document.select(&NOTICE_ROWS),
        "bupt notice row",
        |row| extract_news_row(row, &base, &NOTICE_DATE),
    ))
}

fn parse_detail(body: &str, urls: &BuptUrls) -> Result<DocumentResult, ClientError> {
    let base = Url::parse(&urls.portal_root())
        .map_err(|e| ClientError::parse("portal url", e.to_string()))?;
    let document = Html::parse_document(body);
    let Some(container) = document.select(&DETAIL_BODY).next() else {
        return Ok(DocumentResult {
            html: PLACEHOLDER_HTML.to_string(),
            attachments: Vec::new(),
        });
    };
    let html = sanitize_element(container, urls.portal.trim_end_matches('/'));

    let attachments = collect_rows(
        document.select(&ATTACHMENT_ROWS),
        "bupt attachment row",
        |row| {
            let anchor = row
                .select(&ANCHOR)
                .next()
                .ok_or_else(|| ClientError::parse("attachment row", "row has no link"))?;
            let href = anchor
                .value()
                .attr("href")
                .ok_or_else(|| ClientError::parse("attachment row", "link has no href"))?;
            let url = absolutize_url(href, &base).ok_or_else(|| {
                ClientError::parse("attachment row", format!("unusable href '{href}'"))
            })?;
            let title = own_text(anchor).unwrap_or_else(|| UNKNOWN_TITLE.to_string());
            Ok(Attachment { title, url })
        },
    );

    Ok(DocumentResult { html, attachments })
}
