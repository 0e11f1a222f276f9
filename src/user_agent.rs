//! Browser identity shared by every session HTTP client.
//!
//! The portals behind the site clients serve reduced or blocked pages to
//! non-browser agents, so all traffic presents as desktop Chrome.

/// Desktop Chrome User-Agent sent on every request.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// `Accept-Language` sent on every request.
pub const ACCEPT_LANGUAGE: &str = "zh-CN,zh;q=0.9";

/// `sec-ch-ua` client hints matching [`BROWSER_USER_AGENT`].
pub(crate) const CLIENT_HINTS: &str =
    r#""Google Chrome";v="131", "Chromium";v="131", "Not_A Brand";v="24""#;

/// Returns the User-Agent override from `CATCHER_USER_AGENT`, or the browser default.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    std::env::var("CATCHER_USER_AGENT")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| BROWSER_USER_AGENT.to_string())
}
