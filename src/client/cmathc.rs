//! CMATHC news list (`www.cmathc.org.cn`). Anonymous; no login.

use std::sync::LazyLock;

use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::instrument;
use url::Url;

use super::utils::{collect_rows, compile_static_selector, extract_news_row};
use super::{Client, ClientError, Credentials, DocumentResult, ListingEntry};
use crate::sanitize::{PLACEHOLDER_HTML, sanitize_element};
use crate::session::{Session, SessionConfig};

const DEFAULT_BASE_URL: &str = "https://www.cmathc.org.cn";

static NEWS_ROWS: LazyLock<Selector> =
    LazyLock::new(|| compile_static_selector(r#"div > ul[class="newslist ny"] > li"#));
static NEWS_DATE: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("span"));
static ARTICLE_BODY: LazyLock<Selector> =
    LazyLock::new(|| compile_static_selector(r#"div[class="article_txt"]"#));

/// Client for the CMATHC news pages.
#[derive(Debug)]
pub struct CmathcClient {
    base_url: String,
    session: Session,
}

impl CmathcClient {
    /// Registry identifier.
    pub const ID: &'static str = "cmathc";

    /// Creates a client against the production site.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] when the session cannot be built.
    pub fn new(credentials: Credentials, config: &SessionConfig) -> Result<Self, ClientError> {
        Self::with_base_url(credentials, config, DEFAULT_BASE_URL)
    }

    /// Creates a client against another origin.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] when the session cannot be built.
    pub fn with_base_url(
        credentials: Credentials,
        config: &SessionConfig,
        base_url: &str,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            session: Session::new(Self::ID, credentials.account, config)?,
        })
    }

    /// Registry factory.
    ///
    /// # Errors
    ///
    /// See [`CmathcClient::new`].
    pub fn create(
        credentials: Credentials,
        config: &SessionConfig,
    ) -> Result<Box<dyn Client>, ClientError> {
        Ok(Box::new(Self::new(credentials, config)?))
    }

    fn base(&self) -> Result<Url, ClientError> {
        Url::parse(&format!("{}/", self.base_url))
            .map_err(|e| ClientError::parse("base url", e.to_string()))
    }
}

#[async_trait]
impl Client for CmathcClient {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn session(&self) -> &Session {
        &self.session
    }

    #[instrument(skip(self), fields(client = Self::ID))]
    async fn list(&self) -> Result<Vec<ListingEntry>, ClientError> {
        let base = self.base()?;
        let page = self
            .session
            .get_page(&format!("{}/news/", self.base_url), &[])
            .await?
            .ensure_success()?;
        Ok(parse_news_list(&page.body, &base))
    }

    #[instrument(skip(self), fields(client = Self::ID))]
    async fn detail(&self, url: &str) -> Result<DocumentResult, ClientError> {
        let page = self.session.get_page(url, &[]).await?.ensure_success()?;
        Ok(parse_article(&page.body, &self.base_url))
    }
}

fn parse_news_list(body: &str, base: &Url) -> Vec<ListingEntry> {
    let document = Html::parse_document(body);
    collect_rows(document.select(&NEWS_ROWS), "cmathc news row", |row| {
        extract_news_row(row, base, &NEWS_DATE)
    })
}

fn parse_article(body: &str, base_url: &str) -> DocumentResult {
    let document = Html::parse_document(body);
    let html = document
        .select(&ARTICLE_BODY)
        .next()
        .map_or_else(|| PLACEHOLDER_HTML.to_string(), |body| sanitize_element(body, base_url));
    DocumentResult {
        html,
        attachments: Vec::new(),
    }
}
