//! Bilibili space dynamics (`space.bilibili.com/<uid>/dynamic`).
//!
//! Anonymous, but the feed API only answers browser-looking, WBI-signed
//! requests: the client visits the home page and the space page first, then
//! fetches the signing keys from `nav` and sends a payload carrying the
//! fingerprint fields a real browser would.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Local;
use rand::Rng;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};

use super::utils::{clean_title, collect_rows, compile_static_regex};
use super::{Client, ClientError, Credentials, DocumentResult, ListingEntry};
use crate::session::{Session, SessionConfig};
use crate::signing::{Params, WbiKeys, sign};

static SPACE_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"^https://space\.bilibili\.com/(\d+)/dynamic/?$"));

const DEFAULT_WARMUP_PAUSE: Duration = Duration::from_secs(2);
const SPMID: &str = "333.1387";
const FEATURES: &str = "itemOpusStyle,listOnlyfans,opusBigCover,onlyfansVote,forwardListHidden,\
decorationCard,commentsNewVersion,onlyfansAssetsV2,ugcDelete,onlyfansQaCard,avatarAutoTheme,\
sunflowerStyle,cardsEnhance,eva3CardOpus,eva3CardVideo,eva3CardComment,eva3CardUser";
const WEBGL_VERSION: &str = "WebGL 1.0 (OpenGL ES 2.0 Chromium)";
const WEBGL_RENDERER: &str = "ANGLE (AMD, AMD Radeon(TM) Graphics (0x0000164C) Direct3D11 vs_5_0 \
ps_5_0, D3D11)Google Inc. (AMD)";
const WINDOW_WIDTH: i64 = 298;
const WINDOW_HEIGHT: i64 = 691;
/// Link used for items that carry no jump URL of their own.
const FALLBACK_LINK: &str = "//www.bilibili.com";

/// Origins used by the Bilibili client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BilibiliUrls {
    /// Home page visited during warm-up.
    pub www: String,
    /// Space origin; also sent as `Origin`.
    pub space: String,
    /// API origin for `nav` and the feed.
    pub api: String,
}

impl Default for BilibiliUrls {
    fn default() -> Self {
        Self {
            www: "https://www.bilibili.com".to_string(),
            space: "https://space.bilibili.com".to_string(),
            api: "https://api.bilibili.com".to_string(),
        }
    }
}

/// Client for the dynamic feed of one Bilibili space.
#[derive(Debug)]
pub struct BilibiliClient {
    space_url: String,
    uid: i64,
    urls: BilibiliUrls,
    warmup_pause: Duration,
    session: Session,
}

impl BilibiliClient {
    /// Registry identifier.
    pub const ID: &'static str = "bili";

    /// Creates a client for the space named by the `url` extra.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidCredentials`] when `url` is missing or is
    /// not a `https://space.bilibili.com/<uid>/dynamic` URL, and
    /// [`ClientError::Transport`] when the session cannot be built.
    pub fn new(credentials: Credentials, config: &SessionConfig) -> Result<Self, ClientError> {
        Self::with_urls(credentials, config, BilibiliUrls::default())
    }

    /// Creates a client against custom origins.
    ///
    /// # Errors
    ///
    /// See [`BilibiliClient::new`].
    pub fn with_urls(
        credentials: Credentials,
        config: &SessionConfig,
        urls: BilibiliUrls,
    ) -> Result<Self, ClientError> {
        let space_url = credentials.require_text(Self::ID, "url")?.to_string();
        let uid = parse_space_uid(&space_url)?;
        Ok(Self {
            space_url,
            uid,
            urls,
            warmup_pause: DEFAULT_WARMUP_PAUSE,
            session: Session::new(Self::ID, credentials.account, config)?,
        })
    }

    /// Overrides the pause after each warm-up page.
    #[must_use]
    pub fn with_warmup_pause(mut self, pause: Duration) -> Self {
        self.warmup_pause = pause;
        self
    }

    /// Registry factory.
    ///
    /// # Errors
    ///
    /// See [`BilibiliClient::new`].
    pub fn create(
        credentials: Credentials,
        config: &SessionConfig,
    ) -> Result<Box<dyn Client>, ClientError> {
        Ok(Box::new(Self::new(credentials, config)?))
    }

    /// Space owner id.
    #[must_use]
    pub fn uid(&self) -> i64 {
        self.uid
    }

    fn api(&self) -> &str {
        self.urls.api.trim_end_matches('/')
    }

    async fn warm_up(&self, headers: &[(&str, &str)]) -> Result<(), ClientError> {
        let pages = [
            format!("{}/", self.urls.www.trim_end_matches('/')),
            format!("{}/{}/dynamic", self.urls.space.trim_end_matches('/'), self.uid),
        ];
        for page in &pages {
            let status = self.session.get_page(page, headers).await?.status;
            debug!(page, status = status.as_u16(), "warm-up page visited");
            tokio::time::sleep(self.warmup_pause).await;
        }
        Ok(())
    }

    async fn fetch_salt(&self, headers: &[(&str, &str)]) -> Result<String, ClientError> {
        let nav_url = format!("{}/x/web-interface/nav", self.api());
        let page = self.session.get_page(&nav_url, headers).await?.ensure_success()?;
        let keys = WbiKeys::from_nav_body(&page.body)?;
        debug!(img_key = %keys.img_key, sub_key = %keys.sub_key, "wbi keys fetched");
        Ok(keys.salt())
    }
}

#[async_trait]
impl Client for BilibiliClient {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn session(&self) -> &Session {
        &self.session
    }

    #[instrument(skip(self), fields(client = Self::ID, uid = self.uid))]
    async fn list(&self) -> Result<Vec<ListingEntry>, ClientError> {
        let referer = self.space_url.trim_end_matches('/');
        let origin = self.urls.space.trim_end_matches('/');
        let headers = [("Referer", referer), ("Origin", origin)];

        self.warm_up(&headers).await?;
        let salt = self.fetch_salt(&headers).await?;

        let payload = feed_payload(self.uid, local_timezone_offset(), &random_scroll_features());
        let query = sign(&payload, &salt).to_query_string();
        debug!(query = %query, "signed feed query");

        let feed_url = format!("{}/x/polymer/web-dynamic/v1/feed/space?{query}", self.api());
        let feed: FeedResponse = self.session.get_json(&feed_url, &headers).await?;
        parse_feed(feed)
    }

    async fn detail(&self, _url: &str) -> Result<DocumentResult, ClientError> {
        Err(ClientError::unsupported(Self::ID, "detail"))
    }
}

fn parse_space_uid(url: &str) -> Result<i64, ClientError> {
    SPACE_URL_RE
        .captures(url)
        .and_then(|captures| captures.get(1))
        .and_then(|uid| uid.as_str().parse().ok())
        .ok_or_else(|| {
            ClientError::invalid_credentials(
                BilibiliClient::ID,
                format!("cannot support url '{url}'"),
                "pass --extra '{\"url\": \"https://space.bilibili.com/<uid>/dynamic\"}'",
            )
        })
}

/// Minutes west of UTC, matching the browser's `getTimezoneOffset()`.
fn local_timezone_offset() -> i64 {
    let east_secs = i64::from(Local::now().offset().local_minus_utc());
    (-east_secs).div_euclid(60)
}

/// Base64 with the last two characters cut, as the site's fingerprint script does.
fn truncated_base64(value: &str) -> String {
    let mut encoded = STANDARD.encode(value.as_bytes());
    encoded.truncate(encoded.len().saturating_sub(2));
    encoded
}

fn random_scroll_features() -> String {
    let mut rng = rand::thread_rng();
    scroll_features(rng.gen_range(0..114), rng.gen_range(0..514))
}

/// The `dm_img_inter` JSON for an unscrolled window of the default size.
fn scroll_features(wh_random: i64, of_random: i64) -> String {
    let (scroll_top, scroll_left) = (0_i64, 0_i64);
    let wh = [
        2 * WINDOW_WIDTH + 2 * WINDOW_HEIGHT + 3 * wh_random,
        4 * WINDOW_WIDTH - WINDOW_HEIGHT + wh_random,
        wh_random,
    ];
    let of = [
        3 * scroll_top + 2 * scroll_left + of_random,
        4 * scroll_top - 4 * scroll_left + 2 * of_random,
        of_random,
    ];
    format!(
        r#"{{"ds":[],"wh":[{},{},{}],"of":[{},{},{}]}}"#,
        wh[0], wh[1], wh[2], of[0], of[1], of[2]
    )
}

fn feed_payload(uid: i64, timezone_offset: i64, scroll_features: &str) -> Params {
    let device = format!(r#"{{"platform":"web","device":"pc","spmid":"{SPMID}"}}"#);
    Params::new()
        .with("offset", "")
        .with("host_mid", uid)
        .with("timezone_offset", timezone_offset)
        .with("platform", "web")
        .with("features", FEATURES)
        .with("web_location", SPMID)
        .with("dm_img_list", "[]")
        .with("dm_img_str", truncated_base64(WEBGL_VERSION))
        .with("dm_cover_img_str", truncated_base64(WEBGL_RENDERER))
        .with("dm_img_inter", scroll_features)
        .with("x-bili-device-req-json", device)
}

#[derive(Debug, Deserialize)]
struct FeedResponse {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<FeedData>,
}

#[derive(Debug, Deserialize)]
struct FeedData {
    #[serde(default)]
    items: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct FeedItem {
    modules: Modules,
}

#[derive(Debug, Deserialize)]
struct Modules {
    module_author: ModuleAuthor,
    module_dynamic: ModuleDynamic,
}

#[derive(Debug, Deserialize)]
struct ModuleAuthor {
    pub_time: String,
}

#[derive(Debug, Deserialize)]
struct ModuleDynamic {
    #[serde(default)]
    desc: Option<TextBlock>,
    #[serde(default)]
    major: Option<Major>,
}

#[derive(Debug, Deserialize)]
struct TextBlock {
    text: String,
}

#[derive(Debug, Deserialize)]
struct Major {
    #[serde(default)]
    opus: Option<Opus>,
    #[serde(default)]
    archive: Option<Archive>,
}

#[derive(Debug, Deserialize)]
struct Opus {
    summary: TextBlock,
    jump_url: String,
}

#[derive(Debug, Deserialize)]
struct Archive {
    title: String,
    #[serde(default)]
    jump_url: Option<String>,
}

fn parse_feed(feed: FeedResponse) -> Result<Vec<ListingEntry>, ClientError> {
    if feed.code != 0 {
        return Err(ClientError::parse(
            "bilibili feed",
            format!("server error: code {} {}", feed.code, feed.message.unwrap_or_default()),
        ));
    }
    let items = feed.data.map(|data| data.items).unwrap_or_default();
    Ok(collect_rows(items, "bilibili feed item", feed_entry))
}

fn feed_entry(item: Value) -> Result<ListingEntry, ClientError> {
    let item: FeedItem = serde_json::from_value(item)
        .map_err(|e| ClientError::parse("bilibili feed item", e.to_string()))?;
    let dynamic = item.modules.module_dynamic;

    let (text, link) = match dynamic.major {
        None => {
            let desc = dynamic
                .desc
                .ok_or_else(|| ClientError::parse("bilibili feed item", "no desc and no major"))?;
            (desc.text, FALLBACK_LINK.to_string())
        }
        Some(Major { opus: Some(opus), .. }) => (opus.summary.text, opus.jump_url),
        Some(Major { archive: Some(archive), .. }) => (
            archive.title,
            archive.jump_url.unwrap_or_else(|| FALLBACK_LINK.to_string()),
        ),
        Some(_) => {
            return Err(ClientError::parse("bilibili feed item", "unsupported major type"));
        }
    };

    Ok(ListingEntry {
        title: clean_title(&text),
        url: absolute_link(&link),
        date: item.modules.module_author.pub_time,
    })
}

fn absolute_link(link: &str) -> String {
    if link.starts_with("//") {
        format!("https:{link}")
    } else {
        link.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::client::ExtraValue;

    #[test]
    fn test_parse_space_uid() {
        assert_eq!(parse_space_uid("https://space.bilibili.com/1234/dynamic").unwrap(), 1234);
        assert_eq!(parse_space_uid("https://space.bilibili.com/1234/dynamic/").unwrap(), 1234);
        for url in [
            "https://space.bilibili.com/1234",
            "http://space.bilibili.com/1234/dynamic",
            "https://space.bilibili.com/abc/dynamic",
        ] {
            assert!(parse_space_uid(url).is_err(), "{url} should be rejected");
        }
    }

    #[test]
    fn test_missing_url_extra_is_rejected() {
        let err = BilibiliClient::new(Credentials::new("me", ""), &SessionConfig::default())
            .unwrap_err();
        assert!(err.to_string().contains("require 'url' key in extra"), "got: {err}");
    }

    #[test]
    fn test_new_reads_uid_from_extra() {
        let credentials = Credentials::new("me", "").with_extra(
            "url",
            ExtraValue::Text("https://space.bilibili.com/42/dynamic".to_string()),
        );
        let client = BilibiliClient::new(credentials, &SessionConfig::default()).unwrap();
        assert_eq!(client.uid(), 42);
        assert_eq!(client.id(), "bili");
    }

    #[test]
    fn test_truncated_base64_fingerprints() {
        assert_eq!(
            truncated_base64(WEBGL_VERSION),
            "V2ViR0wgMS4wIChPcGVuR0wgRVMgMi4wIENocm9taXVtKQ"
        );
        assert!(truncated_base64(WEBGL_RENDERER).starts_with("QU5HTEUgKEFNRCwgQU1E"));
    }

    #[test]
    fn test_scroll_features_layout() {
        assert_eq!(scroll_features(0, 0), r#"{"ds":[],"wh":[1978,501,0],"of":[0,0,0]}"#);
        assert_eq!(scroll_features(10, 20), r#"{"ds":[],"wh":[2008,511,10],"of":[20,40,20]}"#);
    }

    #[test]
    fn test_feed_payload_field_order() {
        let payload = feed_payload(42, -480, "{}");
        let keys: Vec<&str> = payload.keys().collect();
        assert_eq!(
            keys,
            vec![
                "offset",
                "host_mid",
                "timezone_offset",
                "platform",
                "features",
                "web_location",
                "dm_img_list",
                "dm_img_str",
                "dm_cover_img_str",
                "dm_img_inter",
                "x-bili-device-req-json",
            ]
        );
        assert_eq!(payload.get("host_mid"), Some(&42_i64.into()));
        assert_eq!(
            payload.get("x-bili-device-req-json"),
            Some(&r#"{"platform":"web","device":"pc","spmid":"333.1387"}"#.into())
        );
    }

    fn feed(items: Value) -> FeedResponse {
        serde_json::from_value(json!({"code": 0, "data": {"items": items}})).unwrap()
    }

    #[test]
    fn test_parse_feed_item_kinds() {
        let items = json!([
            {"modules": {
                "module_author": {"pub_time": "2024-05-01"},
                "module_dynamic": {"desc": {"text": "纯文字动态\u{200b}"}, "major": null}
            }},
            {"modules": {
                "module_author": {"pub_time": "2024-05-02"},
                "module_dynamic": {"major": {"opus": {
                    "summary": {"text": "图文动态"},
                    "jump_url": "//www.bilibili.com/opus/1"
                }}}
            }},
            {"modules": {
                "module_author": {"pub_time": "2024-05-03"},
                "module_dynamic": {"major": {"archive": {
                    "title": "投稿视频",
                    "jump_url": "//www.bilibili.com/video/BV1"
                }}}
            }}
        ]);
        let entries = parse_feed(feed(items)).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].title, "纯文字动态");
        assert_eq!(entries[0].url, "https://www.bilibili.com");
        assert_eq!(entries[1].url, "https://www.bilibili.com/opus/1");
        assert_eq!(entries[2].title, "投稿视频");
        assert_eq!(entries[2].url, "https://www.bilibili.com/video/BV1");
        assert_eq!(entries[2].date, "2024-05-03");
    }

    #[test]
    fn test_parse_feed_skips_malformed_items() {
        let items = json!([
            {"modules": {}},
            {"modules": {
                "module_author": {"pub_time": "2024-05-01"},
                "module_dynamic": {"desc": {"text": "ok"}}
            }}
        ]);
        let entries = parse_feed(feed(items)).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title, "ok");
    }

    #[test]
    fn test_parse_feed_nonzero_code_is_error() {
        let response: FeedResponse =
            serde_json::from_value(json!({"code": -352, "message": "风控校验失败"})).unwrap();
        let err = parse_feed(response).unwrap_err();
        assert!(err.to_string().contains("-352"));
    }

    #[test]
    fn test_absolute_link() {
        assert_eq!(absolute_link("//a.com/x"), "https://a.com/x");
        assert_eq!(absolute_link("https://a.com/x"), "https://a.com/x");
    }
}
