//! Cleans scraped HTML fragments into safe, compact markup.
//!
//! Script-like elements and comments are dropped, attributes are reduced to
//! an allow-list, root-relative links are made absolute and whitespace between
//! tags is collapsed. The output is re-serialized from the parsed tree, so
//! unbalanced input comes back balanced.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Node};

use crate::client::utils::compile_static_regex;

/// Returned when a fragment is empty or nothing survives cleaning.
pub const PLACEHOLDER_HTML: &str = "<p>内容解析失败</p>";

/// Elements removed together with their content.
const DROPPED_ELEMENTS: &[&str] = &[
    "script", "style", "link", "meta", "noscript", "iframe", "object", "embed", "frame",
    "frameset", "applet", "base", "form", "input", "button", "select", "textarea",
];

/// Attributes kept on surviving elements, in output order.
const ALLOWED_ATTRIBUTES: &[&str] = &["src", "href", "title", "width", "height"];

const VOID_ELEMENTS: &[&str] = &[
    "area", "br", "col", "hr", "img", "source", "track", "wbr",
];

static INTER_TAG_WHITESPACE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r">\s+<"));

/// Sanitizes an HTML fragment, resolving root-relative links against `base_url`.
#[must_use]
pub fn sanitize(fragment: &str, base_url: &str) -> String {
    if fragment.trim().is_empty() {
        return PLACEHOLDER_HTML.to_string();
    }
    let document = Html::parse_fragment(fragment);
    let mut out = String::with_capacity(fragment.len());
    write_children(document.root_element(), base_url, &mut out);
    finish(&out)
}

/// Sanitizes an element selected from a parsed page, including the element itself.
#[must_use]
pub fn sanitize_element(element: ElementRef<'_>, base_url: &str) -> String {
    let mut out = String::new();
    write_element(element, base_url, &mut out);
    finish(&out)
}

fn finish(raw: &str) -> String {
    let flattened = raw
        .replace("\\r\\n", "")
        .replace("\\n", "")
        .replace(['\r', '\n'], "");
    let compact = INTER_TAG_WHITESPACE.replace_all(&flattened, "><");
    let trimmed = compact.trim();
    if trimmed.is_empty() {
        PLACEHOLDER_HTML.to_string()
    } else {
        trimmed.to_string()
    }
}

fn write_children(element: ElementRef<'_>, base_url: &str, out: &mut String) {
    for child in element.children() {
        if let Some(child_element) = ElementRef::wrap(child) {
            write_element(child_element, base_url, out);
        } else if let Node::Text(text) = child.value() {
            escape_into(text, false, out);
        }
    }
}

fn write_element(element: ElementRef<'_>, base_url: &str, out: &mut String) {
    let name = element.value().name();
    if DROPPED_ELEMENTS.contains(&name) {
        return;
    }

    out.push('<');
    out.push_str(name);
    let mut kept: Vec<(usize, &str, &str)> = element
        .value()
        .attrs()
        .filter_map(|(attribute, value)| {
            let rank = ALLOWED_ATTRIBUTES.iter().position(|a| *a == attribute)?;
            Some((rank, attribute, value))
        })
        .collect();
    kept.sort_by_key(|(rank, _, _)| *rank);

    for (_, attribute, value) in kept {
        let value = if matches!(attribute, "src" | "href") {
            if is_script_url(value) {
                continue;
            }
            absolutize_root_relative(value, base_url)
        } else {
            value.to_string()
        };
        out.push(' ');
        out.push_str(attribute);
        out.push_str("=\"");
        escape_into(&value, true, out);
        out.push('"');
    }
    out.push('>');

    if VOID_ELEMENTS.contains(&name) {
        return;
    }
    write_children(element, base_url, out);
    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

fn is_script_url(value: &str) -> bool {
    let compact: String = value
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect::<String>()
        .to_ascii_lowercase();
    compact.starts_with("javascript:") || compact.starts_with("vbscript:")
}

fn absolutize_root_relative(value: &str, base_url: &str) -> String {
    if value.starts_with('/') && !value.starts_with("//") {
        format!("{}{value}", base_url.trim_end_matches('/'))
    } else {
        value.to_string()
    }
}

fn escape_into(text: &str, attribute: bool, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            other => out.push(other),
        }
    }
}
