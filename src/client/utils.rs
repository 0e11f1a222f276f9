//! Shared helpers used by site adapters.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Selector};
use tracing::warn;
use url::Url;

use super::{ClientError, ListingEntry};

/// Title used when a row carries none.
pub const UNKNOWN_TITLE: &str = "未知标题";

/// Compiles a regex at static init; panics on invalid pattern.
pub fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

/// Compiles a CSS selector at static init; panics on invalid selector.
pub fn compile_static_selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid static selector '{css}': {e}"))
}

/// Control, zero-width and bidi-override characters removed from titles.
static TITLE_NOISE_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r"[\x00-\x09\x0b-\x0c\x0e-\x1f\x7f-\x9f\u{200b}-\u{200f}\u{202a}-\u{202e}]")
});

static ANCHOR: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("a"));

/// Strips invisible characters from a title; blank titles become [`UNKNOWN_TITLE`].
#[must_use]
pub fn clean_title(raw: &str) -> String {
    let cleaned = TITLE_NOISE_RE.replace_all(raw, "");
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        UNKNOWN_TITLE.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Resolves a possibly relative URL string against a base URL.
///
/// Returns the value as-is if it already starts with `http://` or `https://`;
/// normalizes `//...` to `https:...`; otherwise joins with `base_url`.
#[must_use]
pub fn absolutize_url(value: &str, base_url: &Url) -> Option<String> {
    let value = value.trim();
    if value.starts_with("http://") || value.starts_with("https://") {
        return Some(value.to_string());
    }
    if value.starts_with("//") {
        return Some(format!("https:{value}"));
    }
    base_url.join(value).ok().map(|url| url.to_string())
}

/// Concatenated, trimmed text of an element.
#[must_use]
pub fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Text of the element's first direct text node, trimmed.
#[must_use]
pub fn own_text(element: ElementRef<'_>) -> Option<String> {
    element
        .children()
        .filter_map(|child| child.value().as_text())
        .map(|text| text.trim().to_string())
        .find(|text| !text.is_empty())
}

/// Runs `extract` over every row, logging and skipping rows that fail.
pub fn collect_rows<R, T>(
    rows: impl IntoIterator<Item = R>,
    context: &str,
    mut extract: impl FnMut(R) -> Result<T, ClientError>,
) -> Vec<T> {
    let mut entries = Vec::new();
    for (index, row) in rows.into_iter().enumerate() {
        match extract(row) {
            Ok(entry) => entries.push(entry),
            Err(error) => warn!(context, index, error = %error, "skipping malformed row"),
        }
    }
    entries
}

/// Extracts a news-list row: a link (title attribute or text) plus a date element.
///
/// # Errors
///
/// Returns [`ClientError::Parse`] when the row has no link or the link no `href`.
pub fn extract_news_row(
    row: ElementRef<'_>,
    base_url: &Url,
    date_selector: &Selector,
) -> Result<ListingEntry, ClientError> {
    let anchor = row
        .select(&ANCHOR)
        .next()
        .ok_or_else(|| ClientError::parse("listing row", "row has no link"))?;
    let href = anchor
        .value()
        .attr("href")
        .ok_or_else(|| ClientError::parse("listing row", "link has no href"))?;
    let url = absolutize_url(href, base_url)
        .ok_or_else(|| ClientError::parse("listing row", format!("unusable href '{href}'")))?;

    let title = anchor
        .value()
        .attr("title")
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .map(str::to_string)
        .or_else(|| own_text(anchor))
        .unwrap_or_else(|| UNKNOWN_TITLE.to_string());

    let date = row
        .select(date_selector)
        .next()
        .map(element_text)
        .unwrap_or_default();

    Ok(ListingEntry { title, url, date })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use scraper::Html;

    use super::*;

    #[test]
    fn test_clean_title_strips_invisible_characters() {
        assert_eq!(clean_title("\u{200b}通知\u{202e}\t公告\n"), "通知公告");
    }

    #[test]
    fn test_clean_title_blank_is_unknown() {
        assert_eq!(clean_title(" \u{200b} "), UNKNOWN_TITLE);
    }

    #[test]
    fn test_absolutize_url_variants() {
        let base = Url::parse("http://my.bupt.edu.cn/").unwrap();
        assert_eq!(
            absolutize_url("info/1154/1.htm", &base).as_deref(),
            Some("http://my.bupt.edu.cn/info/1154/1.htm")
        );
        assert_eq!(
            absolutize_url("//www.bilibili.com/opus/1", &base).as_deref(),
            Some("https://www.bilibili.com/opus/1")
        );
        assert_eq!(
            absolutize_url("https://e.com/a", &base).as_deref(),
            Some("https://e.com/a")
        );
    }

    #[test]
    fn test_collect_rows_skips_failures_in_order() {
        let rows = vec![Ok(1), Err(ClientError::parse("row", "bad")), Ok(3)];
        let collected = collect_rows(rows, "test", |row| row);
        assert_eq!(collected, vec![1, 3]);
    }

    #[test]
    fn test_extract_news_row_prefers_title_attribute() {
        let html = Html::parse_fragment(
            r#"<ul><li><a href="info/1.htm" title="完整标题">截断...</a><span>2024-05-01</span></li></ul>"#,
        );
        let li = compile_static_selector("li");
        let span = compile_static_selector("span");
        let row = html.select(&li).next().unwrap();
        let base = Url::parse("http://my.bupt.edu.cn/").unwrap();

        let entry = extract_news_row(row, &base, &span).unwrap();
        assert_eq!(entry.title, "完整标题");
        assert_eq!(entry.url, "http://my.bupt.edu.cn/info/1.htm");
        assert_eq!(entry.date, "2024-05-01");
    }

    #[test]
    fn test_extract_news_row_without_link_is_error() {
        let html = Html::parse_fragment("<ul><li><span>2024-05-01</span></li></ul>");
        let li = compile_static_selector("li");
        let span = compile_static_selector("span");
        let row = html.select(&li).next().unwrap();
        let base = Url::parse("http://my.bupt.edu.cn/").unwrap();

        assert!(extract_news_row(row, &base, &span).is_err());
    }
}
