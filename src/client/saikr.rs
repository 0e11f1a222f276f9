//! Saikr contest platform (`www.saikr.com`). Anonymous; no login.
//!
//! The listing comes from the contest JSON API. Detail pages are either
//! classic event pages carrying the body and attachment boxes, or redirects to
//! the `new.saikr.com/vse/` single-page app whose content is served by the
//! contest-info API instead.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{Local, TimeZone};
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::utils::{
    UNKNOWN_TITLE, clean_title, collect_rows, compile_static_selector,
};
use super::{Attachment, Client, ClientError, Credentials, DocumentResult, ListingEntry};
use crate::sanitize::{sanitize, sanitize_element};
use crate::session::{Session, SessionConfig};

const LIST_QUERY: &str = "page=1&limit=10&univs_id=&class_id=&level=0&sort=0";

static DETAIL_BODY: LazyLock<Selector> = LazyLock::new(|| {
    compile_static_selector(
        r#"#eventDetailBox > * > div[class="event4-1-detail-text-box text-body clearfix"]"#,
    )
});
static DOC_BOXES: LazyLock<Selector> = LazyLock::new(|| {
    compile_static_selector(r#"#eventDetailBox > div[class="event4-1-detail-box event4-1-doc-box"]"#)
});
static TITLED_DIV: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("div[title]"));
static ANCHOR: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("a"));

/// Origins used by the Saikr client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaikrUrls {
    /// Main site, prefix of listing URLs.
    pub www: String,
    /// JSON API origin.
    pub api: String,
    /// Origin of the `vse` single-page app.
    pub vse: String,
}

impl Default for SaikrUrls {
    fn default() -> Self {
        Self {
            www: "https://www.saikr.com".to_string(),
            api: "https://apiv4buffer.saikr.com".to_string(),
            vse: "https://new.saikr.com".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Value,
}

impl ApiEnvelope {
    fn into_data(self, context: &str) -> Result<Value, ClientError> {
        if self.code == 200 {
            Ok(self.data)
        } else {
            Err(ClientError::parse(
                context,
                format!(
                    "server error: code {} {}",
                    self.code,
                    self.msg.unwrap_or_default()
                ),
            ))
        }
    }
}

/// Client for Saikr contests.
#[derive(Debug)]
pub struct SaikrClient {
    urls: SaikrUrls,
    session: Session,
}

impl SaikrClient {
    /// Registry identifier.
    pub const ID: &'static str = "saikr";

    /// Creates a client against the production site.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] when the session cannot be built.
    pub fn new(credentials: Credentials, config: &SessionConfig) -> Result<Self, ClientError> {
        Self::with_urls(credentials, config, SaikrUrls::default())
    }

    /// Creates a client against custom origins.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] when the session cannot be built.
    pub fn with_urls(
        credentials: Credentials,
        config: &SessionConfig,
        urls: SaikrUrls,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            urls,
            session: Session::new(Self::ID, credentials.account, config)?,
        })
    }

    /// Registry factory.
    ///
    /// # Errors
    ///
    /// See [`SaikrClient::new`].
    pub fn create(
        credentials: Credentials,
        config: &SessionConfig,
    ) -> Result<Box<dyn Client>, ClientError> {
        Ok(Box::new(Self::new(credentials, config)?))
    }

    fn www(&self) -> &str {
        self.urls.www.trim_end_matches('/')
    }

    fn vse(&self) -> &str {
        self.urls.vse.trim_end_matches('/')
    }

    async fn fetch_vse_content(&self, contest: &str) -> Result<DocumentResult, ClientError> {
        let query_url = format!(
            "{}/api/pc/contest/info?contest_url={}&isp=",
            self.urls.api.trim_end_matches('/'),
            contest.replace('/', "%2F")
        );
        debug!(query_url = %query_url, "querying contest info");
        let origin = self.vse();
        let referer = format!("{origin}/");
        let envelope: ApiEnvelope = self
            .session
            .get_json(&query_url, &[("Origin", origin), ("Referer", &referer)])
            .await?;
        let data = envelope.into_data("saikr contest info")?;
        Ok(parse_contest_info(&data, origin))
    }
}

#[async_trait]
impl Client for SaikrClient {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn session(&self) -> &Session {
        &self.session
    }

    #[instrument(skip(self), fields(client = Self::ID))]
    async fn list(&self) -> Result<Vec<ListingEntry>, ClientError> {
        let url = format!(
            "{}/api/pc/contest/lists?{LIST_QUERY}",
            self.urls.api.trim_end_matches('/')
        );
        let origin = self.www();
        let referer = format!("{origin}/");
        let envelope: ApiEnvelope = self
            .session
            .get_json(&url, &[("Origin", origin), ("Referer", &referer)])
            .await?;
        let data = envelope.into_data("saikr contest list")?;
        let contests = data
            .get("list")
            .and_then(Value::as_array)
            .ok_or_else(|| ClientError::parse("saikr contest list", "missing data.list"))?;
        Ok(collect_rows(contests, "saikr contest", |contest| {
            contest_entry(contest, origin)
        }))
    }

    #[instrument(skip(self), fields(client = Self::ID))]
    async fn detail(&self, url: &str) -> Result<DocumentResult, ClientError> {
        let page = self.session.get_page(url, &[]).await?.ensure_success()?;
        if let Some(document) = parse_event_page(&page.body, self.www()) {
            return Ok(document);
        }

        let landed = page.url.as_str();
        debug!(landed, "no event body, checking for vse redirect");
        let prefix = format!("{}/vse/", self.vse());
        let Some(contest) = landed.strip_prefix(&prefix) else {
            warn!(landed, "detail page is neither an event page nor a vse page");
            return Err(ClientError::parse(
                "saikr detail page",
                format!("unrecognized page layout at {landed}"),
            ));
        };
        self.fetch_vse_content(contest).await
    }
}

fn contest_entry(contest: &Value, www: &str) -> Result<ListingEntry, ClientError> {
    let field = |name: &str| {
        contest
            .get(name)
            .ok_or_else(|| ClientError::parse("saikr contest", format!("missing '{name}'")))
    };
    let title = field("contest_name")?
        .as_str()
        .ok_or_else(|| ClientError::parse("saikr contest", "contest_name is not text"))?;
    let path = field("contest_url")?
        .as_str()
        .ok_or_else(|| ClientError::parse("saikr contest", "contest_url is not text"))?;
    let registered = field("regist_start_time")?;
    let timestamp = registered
        .as_i64()
        .or_else(|| registered.as_str().and_then(|s| s.trim().parse().ok()))
        .ok_or_else(|| {
            ClientError::parse("saikr contest", format!("bad regist_start_time {registered}"))
        })?;

    Ok(ListingEntry {
        title: clean_title(title),
        url: format!("{www}/{}", path.trim_start_matches('/')),
        date: local_date(timestamp)?,
    })
}

fn local_date(timestamp: i64) -> Result<String, ClientError> {
    Local
        .timestamp_opt(timestamp, 0)
        .single()
        .map(|time| time.format("%Y-%m-%d").to_string())
        .ok_or_else(|| ClientError::parse("saikr contest", format!("timestamp {timestamp} out of range")))
}

/// Parses a classic event page; `None` when the page has no event body.
fn parse_event_page(body: &str, base_url: &str) -> Option<DocumentResult> {
    let document = Html::parse_document(body);
    let container = document.select(&DETAIL_BODY).next()?;
    let html = sanitize_element(container, base_url);

    let boxes = document
        .select(&DOC_BOXES)
        .filter(|doc_box| doc_box.select(&ANCHOR).next().is_some());
    let attachments = collect_rows(boxes, "saikr attachment", |doc_box| {
        let href = doc_box
            .select(&ANCHOR)
            .next()
            .and_then(|anchor| anchor.value().attr("href"))
            .ok_or_else(|| ClientError::parse("saikr attachment", "link has no href"))?;
        let title = doc_box
            .select(&TITLED_DIV)
            .next()
            .and_then(|div| div.value().attr("title"))
            .ok_or_else(|| ClientError::parse("saikr attachment", "no titled div"))?
            .trim();
        Ok(Attachment {
            title: if title.is_empty() {
                UNKNOWN_TITLE.to_string()
            } else {
                title.to_string()
            },
            url: href.to_string(),
        })
    });

    Some(DocumentResult { html, attachments })
}

/// Builds the document from the contest-info API `data` object.
///
/// `attachment` maps title → URL; the API sends an empty array when there
/// are none.
fn parse_contest_info(data: &Value, base_url: &str) -> DocumentResult {
    let content = data.get("content").and_then(Value::as_str).unwrap_or_default();
    let attachments = match data.get("attachment") {
        Some(Value::Object(map)) => collect_rows(map, "saikr contest attachment", |(title, url)| {
            let url = url.as_str().ok_or_else(|| {
                ClientError::parse("saikr contest attachment", format!("'{title}' has no URL"))
            })?;
            Ok(Attachment {
                title: title.clone(),
                url: url.to_string(),
            })
        }),
        _ => Vec::new(),
    };
    DocumentResult {
        html: sanitize(content, base_url),
        attachments,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::sanitize::PLACEHOLDER_HTML;

    #[test]
    fn test_contest_entry_formats_local_date() {
        // 2024-05-01 12:00:00 UTC: the same calendar day in every common offset.
        let contest = json!({
            "contest_name": "\u{200b}全国大学生数学建模竞赛",
            "regist_start_time": 1_714_564_800,
            "contest_url": "vse/mcm2024"
        });
        let entry = contest_entry(&contest, "https://www.saikr.com").unwrap();
        assert_eq!(entry.title, "全国大学生数学建模竞赛");
        assert_eq!(entry.url, "https://www.saikr.com/vse/mcm2024");
        assert_eq!(entry.date, "2024-05-01");
    }

    #[test]
    fn test_contest_entry_accepts_string_timestamp() {
        let contest = json!({
            "contest_name": "A",
            "regist_start_time": "1714564800",
            "contest_url": "a"
        });
        assert!(contest_entry(&contest, "https://www.saikr.com").is_ok());
    }

    #[test]
    fn test_contest_entry_missing_field_is_error() {
        let contest = json!({"contest_name": "A"});
        assert!(contest_entry(&contest, "https://www.saikr.com").is_err());
    }

    #[test]
    fn test_parse_event_page_collects_doc_boxes() {
        let body = r#"<html><body><div id="eventDetailBox">
            <div><div class="event4-1-detail-text-box text-body clearfix"><p>比赛规则</p></div></div>
            <div class="event4-1-detail-box event4-1-doc-box">
                <div title="报名表.doc">报名表</div><a href="https://files.saikr.com/a.doc">下载</a>
            </div>
            <div class="event4-1-detail-box event4-1-doc-box"><div title="无链接"></div></div>
        </div></body></html>"#;
        let doc = parse_event_page(body, "https://www.saikr.com").unwrap();
        assert_eq!(doc.html, "<div><p>比赛规则</p></div>");
        assert_eq!(
            doc.attachments,
            vec![Attachment {
                title: "报名表.doc".to_string(),
                url: "https://files.saikr.com/a.doc".to_string(),
            }]
        );
    }

    #[test]
    fn test_parse_event_page_without_body_is_none() {
        assert!(parse_event_page("<html><body></body></html>", "https://www.saikr.com").is_none());
    }

    #[test]
    fn test_parse_contest_info_reads_attachment_map() {
        let data = json!({
            "content": "<p>赛事简介</p><script>x()</script>",
            "attachment": {"章程.pdf": "https://files.saikr.com/z.pdf"}
        });
        let doc = parse_contest_info(&data, "https://new.saikr.com");
        assert_eq!(doc.html, "<p>赛事简介</p>");
        assert_eq!(doc.attachments.len(), 1);
        assert_eq!(doc.attachments[0].title, "章程.pdf");
    }

    #[test]
    fn test_parse_contest_info_keeps_page_order() {
        let data: Value = serde_json::from_str(
            r#"{"content": "<p>x</p>", "attachment": {
                "报名表.doc": "https://files.saikr.com/b.doc",
                "章程.pdf": "https://files.saikr.com/z.pdf",
                "Appendix.zip": "https://files.saikr.com/a.zip"
            }}"#,
        )
        .unwrap();
        let doc = parse_contest_info(&data, "https://new.saikr.com");
        let titles: Vec<&str> = doc.attachments.iter().map(|a| a.title.as_str()).collect();
        assert_eq!(titles, ["报名表.doc", "章程.pdf", "Appendix.zip"]);
        assert_eq!(doc.attachments[2].url, "https://files.saikr.com/a.zip");
    }

    #[test]
    fn test_parse_contest_info_empty_array_and_content() {
        let data = json!({"content": "", "attachment": []});
        let doc = parse_contest_info(&data, "https://new.saikr.com");
        assert_eq!(doc.html, PLACEHOLDER_HTML);
        assert!(doc.attachments.is_empty());
    }

    #[test]
    fn test_envelope_non_200_is_error() {
        let envelope: ApiEnvelope =
            serde_json::from_str(r#"{"code": 500, "msg": "busy"}"#).unwrap();
        let error = envelope.into_data("saikr contest list").unwrap_err();
        assert!(error.to_string().contains("busy"));
    }
}
