//! Live contract test for WBI signing against the real Bilibili API.
//!
//! Ignored by default; run with `cargo test -- --ignored` on a networked host.

use catcher_core::client::{BilibiliClient, Client, Credentials, ExtraValue};
use catcher_core::session::SessionConfig;
use catcher_core::signing::WbiKeys;
use tempfile::TempDir;

#[tokio::test]
#[ignore = "requires network access to api.bilibili.com"]
async fn test_live_nav_publishes_wbi_keys() {
    let body = reqwest::get("https://api.bilibili.com/x/web-interface/nav")
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let keys = WbiKeys::from_nav_body(&body).unwrap();
    assert_eq!(keys.img_key.len(), 32);
    assert_eq!(keys.sub_key.len(), 32);
    assert_eq!(keys.salt().len(), 32);
}

#[tokio::test]
#[ignore = "requires network access to bilibili.com"]
async fn test_live_feed_accepts_signed_query() {
    let dir = TempDir::new().unwrap();
    let credentials = Credentials::new("contract", "").with_extra(
        "url",
        ExtraValue::Text("https://space.bilibili.com/2/dynamic".to_string()),
    );
    let client = BilibiliClient::new(
        credentials,
        &SessionConfig::default().with_cookie_dir(dir.path()),
    )
    .unwrap();
    let entries = client.list().await.unwrap();
    assert!(!entries.is_empty(), "signed feed request returned no items");
}
