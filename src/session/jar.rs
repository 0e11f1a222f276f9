//! In-memory cookie jar shared by every HTTP client of one session.
//!
//! Unlike `reqwest::cookie::Jar`, this jar can be enumerated, which is what
//! lets a session be flushed to the [`CookieStore`](super::CookieStore).
//! `Set-Cookie` headers are parsed with the `cookie` crate and each cookie
//! keeps its domain, path, secure flag and expiry, so a cookie is only sent
//! where the server scoped it. The persisted form is the flat
//! [`CookieRecord`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

use cookie::Cookie;
use reqwest::header::HeaderValue;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;
use url::Url;

/// Serializable snapshot of a session's cookies (name → value).
///
/// Values are redacted in `Debug` output.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CookieRecord(BTreeMap<String, String>);

impl CookieRecord {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a cookie.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    /// Returns the value of a cookie.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Returns the number of cookies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true when the record holds no cookies.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates cookie names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl FromIterator<(String, String)> for CookieRecord {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Debug for CookieRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.0.keys().map(|name| (name, "[REDACTED]")))
            .finish()
    }
}

/// A cookie with the scope the server gave it.
#[derive(Clone)]
struct ScopedCookie {
    name: String,
    value: String,
    domain: String,
    host_only: bool,
    path: String,
    secure: bool,
    expires: Option<OffsetDateTime>,
}

impl ScopedCookie {
    fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires.is_some_and(|at| at <= now)
    }

    fn same_slot(&self, other: &Self) -> bool {
        self.name == other.name && self.domain == other.domain && self.path == other.path
    }

    fn matches(&self, url: &Url, now: OffsetDateTime) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        let domain_ok = if self.host_only {
            host == self.domain
        } else {
            domain_matches(&host, &self.domain)
        };
        domain_ok
            && path_matches(url.path(), &self.path)
            && (!self.secure || url.scheme() == "https")
            && !self.is_expired(now)
    }
}

/// Thread-safe cookie jar implementing `reqwest::cookie::CookieStore`.
#[derive(Default)]
pub struct SessionJar {
    cookies: RwLock<Vec<ScopedCookie>>,
}

impl SessionJar {
    /// Creates an empty jar.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges a persisted record into the jar as host-only cookies of `scope`.
    ///
    /// Same-named cookies already scoped to that host are replaced.
    pub fn extend(&self, record: &CookieRecord, scope: &Url) {
        let Some(host) = scope.host_str() else {
            return;
        };
        let host = host.to_ascii_lowercase();
        let mut guard = self.cookies.write().unwrap_or_else(PoisonError::into_inner);
        for (name, value) in &record.0 {
            let restored = ScopedCookie {
                name: name.clone(),
                value: value.clone(),
                domain: host.clone(),
                host_only: true,
                path: "/".to_string(),
                secure: scope.scheme() == "https",
                expires: None,
            };
            guard.retain(|existing| !existing.same_slot(&restored));
            guard.push(restored);
        }
    }

    /// Takes a snapshot of every live cookie regardless of scope.
    #[must_use]
    pub fn snapshot(&self) -> CookieRecord {
        let now = OffsetDateTime::now_utc();
        let guard = self.cookies.read().unwrap_or_else(PoisonError::into_inner);
        guard
            .iter()
            .filter(|cookie| !cookie.is_expired(now))
            .map(|cookie| (cookie.name.clone(), cookie.value.clone()))
            .collect()
    }

    /// Takes a snapshot of the cookies that would be sent to `url`.
    #[must_use]
    pub fn snapshot_for(&self, url: &Url) -> CookieRecord {
        let now = OffsetDateTime::now_utc();
        let guard = self.cookies.read().unwrap_or_else(PoisonError::into_inner);
        guard
            .iter()
            .filter(|cookie| cookie.matches(url, now))
            .map(|cookie| (cookie.name.clone(), cookie.value.clone()))
            .collect()
    }

    /// Returns the number of cookies in the jar.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cookies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true when the jar is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for SessionJar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionJar")
            .field("cookie_count", &self.len())
            .finish()
    }
}

impl reqwest::cookie::CookieStore for SessionJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        let Some(host) = url.host_str() else {
            return;
        };
        let host = host.to_ascii_lowercase();
        let now = OffsetDateTime::now_utc();
        let mut guard = self.cookies.write().unwrap_or_else(PoisonError::into_inner);
        for header in cookie_headers {
            let Ok(raw) = header.to_str() else {
                continue;
            };
            let Ok(parsed) = Cookie::parse(raw) else {
                continue;
            };
            let Some(cookie) = scope_cookie(&parsed, &host, url, now) else {
                debug!(name = %parsed.name(), host = %host, "cookie rejected for foreign domain");
                continue;
            };

            guard.retain(|existing| !existing.same_slot(&cookie));
            if cookie.is_expired(now) {
                debug!(name = %cookie.name, host = %host, "cookie expired by server");
            } else {
                debug!(name = %cookie.name, host = %host, "cookie set by server");
                guard.push(cookie);
            }
        }
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        let now = OffsetDateTime::now_utc();
        let guard = self.cookies.read().unwrap_or_else(PoisonError::into_inner);
        let header = guard
            .iter()
            .filter(|cookie| cookie.matches(url, now))
            .map(|cookie| format!("{}={}", cookie.name, cookie.value))
            .collect::<Vec<_>>()
            .join("; ");
        if header.is_empty() {
            return None;
        }
        HeaderValue::from_str(&header).ok()
    }
}

/// Resolves the scope of a parsed `Set-Cookie` received from `host`.
///
/// Returns `None` when the `Domain` attribute does not cover `host`.
/// `Max-Age` wins over `Expires`.
fn scope_cookie(
    parsed: &Cookie<'_>,
    host: &str,
    url: &Url,
    now: OffsetDateTime,
) -> Option<ScopedCookie> {
    let (domain, host_only) = match parsed.domain() {
        Some(domain) if !domain.trim_start_matches('.').is_empty() => {
            let domain = domain.trim_start_matches('.').to_ascii_lowercase();
            if !domain_matches(host, &domain) {
                return None;
            }
            (domain, false)
        }
        _ => (host.to_string(), true),
    };

    let path = parsed
        .path()
        .filter(|path| path.starts_with('/'))
        .map_or_else(|| default_path(url), str::to_string);

    let expires = match parsed.max_age() {
        Some(age) => Some(now.saturating_add(age)),
        None => parsed.expires_datetime(),
    };

    Some(ScopedCookie {
        name: parsed.name().to_string(),
        value: parsed.value().to_string(),
        domain,
        host_only,
        path,
        secure: parsed.secure().unwrap_or(false),
        expires,
    })
}

/// `host` equals `domain` or is a subdomain of it.
fn domain_matches(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    if request_path == cookie_path {
        return true;
    }
    request_path.starts_with(cookie_path)
        && (cookie_path.ends_with('/')
            || request_path[cookie_path.len()..].starts_with('/'))
}

/// Directory of the request path, used when `Path` is absent.
fn default_path(url: &Url) -> String {
    match url.path().rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(index) => url.path()[..index].to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use reqwest::cookie::CookieStore as _;

    use super::*;

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    fn set(jar: &SessionJar, from: &str, headers: &[&str]) {
        let values: Vec<HeaderValue> = headers
            .iter()
            .map(|h| HeaderValue::from_str(h).unwrap())
            .collect();
        jar.set_cookies(&mut values.iter(), &url(from));
    }

    fn sent(jar: &SessionJar, to: &str) -> Option<String> {
        jar.cookies(&url(to))
            .map(|header| header.to_str().unwrap().to_string())
    }

    #[test]
    fn test_set_cookies_stores_name_value() {
        let jar = SessionJar::new();
        set(
            &jar,
            "http://my.example.edu/",
            &["JSESSIONID=abc123; Path=/; HttpOnly", "route=r1"],
        );
        let snapshot = jar.snapshot();
        assert_eq!(snapshot.get("JSESSIONID"), Some("abc123"));
        assert_eq!(snapshot.get("route"), Some("r1"));
        assert_eq!(jar.len(), 2);
    }

    #[test]
    fn test_max_age_zero_removes_cookie() {
        let jar = SessionJar::new();
        set(&jar, "http://my.example.edu/", &["sid=1"]);
        set(&jar, "http://my.example.edu/", &["sid=; Max-Age=0; Path=/"]);
        assert!(jar.is_empty());
    }

    #[test]
    fn test_past_expires_removes_cookie() {
        let jar = SessionJar::new();
        set(&jar, "http://my.example.edu/", &["sid=1; Path=/"]);
        set(
            &jar,
            "http://my.example.edu/",
            &["sid=deleted; Path=/; Expires=Thu, 01 Jan 1970 00:00:00 GMT"],
        );
        assert!(jar.is_empty());
        assert_eq!(jar.snapshot().get("sid"), None);
    }

    #[test]
    fn test_future_expires_keeps_cookie() {
        let jar = SessionJar::new();
        set(
            &jar,
            "http://my.example.edu/",
            &["sid=1; Expires=Fri, 01 Jan 2100 00:00:00 GMT"],
        );
        assert_eq!(sent(&jar, "http://my.example.edu/"), Some("sid=1".to_string()));
    }

    #[test]
    fn test_secure_path_scoped_cookie_stays_on_its_host() {
        let jar = SessionJar::new();
        set(
            &jar,
            "https://auth.example.edu/authserver/login",
            &["CASTGC=TGT-secret; Path=/authserver; Secure"],
        );

        assert_eq!(sent(&jar, "http://files.attacker.example/a.pdf"), None);
        assert_eq!(sent(&jar, "http://auth.example.edu/authserver/login"), None);
        assert_eq!(sent(&jar, "https://auth.example.edu/portal"), None);
        assert_eq!(
            sent(&jar, "https://auth.example.edu/authserver/login"),
            Some("CASTGC=TGT-secret".to_string())
        );
    }

    #[test]
    fn test_domain_cookie_reaches_subdomains_only() {
        let jar = SessionJar::new();
        set(
            &jar,
            "https://auth.example.edu/",
            &["shared=1; Domain=.example.edu; Path=/"],
        );
        assert_eq!(sent(&jar, "http://my.example.edu/list"), Some("shared=1".to_string()));
        assert_eq!(sent(&jar, "http://notexample.edu/"), None);
    }

    #[test]
    fn test_foreign_domain_attribute_is_rejected() {
        let jar = SessionJar::new();
        set(&jar, "http://my.example.edu/", &["evil=1; Domain=other.org"]);
        assert!(jar.is_empty());
    }

    #[test]
    fn test_default_path_is_request_directory() {
        let jar = SessionJar::new();
        set(&jar, "http://my.example.edu/system/login.jsp", &["sid=1"]);
        assert_eq!(
            sent(&jar, "http://my.example.edu/system/index.jsp"),
            Some("sid=1".to_string())
        );
        assert_eq!(sent(&jar, "http://my.example.edu/list.jsp"), None);
    }

    #[test]
    fn test_restored_record_is_scoped_to_host() {
        let jar = SessionJar::new();
        let mut record = CookieRecord::new();
        record.insert("b", "2");
        record.insert("a", "1");
        jar.extend(&record, &url("http://my.example.edu/"));

        assert_eq!(sent(&jar, "http://my.example.edu/list"), Some("a=1; b=2".to_string()));
        assert_eq!(sent(&jar, "http://elsewhere.example/"), None);
    }

    #[test]
    fn test_snapshot_for_filters_by_scope() {
        let jar = SessionJar::new();
        set(
            &jar,
            "https://auth.example.edu/authserver/login",
            &["CASTGC=TGT-1; Path=/authserver; Secure"],
        );
        set(&jar, "http://my.example.edu/", &["JSESSIONID=portal-1; Path=/"]);

        let portal = jar.snapshot_for(&url("http://my.example.edu/"));
        assert_eq!(portal.get("JSESSIONID"), Some("portal-1"));
        assert_eq!(portal.get("CASTGC"), None);
        assert_eq!(jar.snapshot().len(), 2);
    }

    #[test]
    fn test_empty_jar_sends_no_header() {
        let jar = SessionJar::new();
        assert!(sent(&jar, "http://my.example.edu/").is_none());
    }

    #[test]
    fn test_invalid_set_cookie_is_ignored() {
        let jar = SessionJar::new();
        set(
            &jar,
            "http://my.example.edu/",
            &["no-equals-sign", "=value-without-name"],
        );
        assert!(jar.is_empty());
    }

    #[test]
    fn test_record_debug_redacts_values() {
        let mut record = CookieRecord::new();
        record.insert("token", "very-secret");
        let debug = format!("{record:?}");
        assert!(debug.contains("token"));
        assert!(!debug.contains("very-secret"));
    }
}
