//! WBI request signing for the Bilibili web API.
//!
//! The API rejects dynamic-feed requests unless the query carries `w_rid`, an
//! MD5 over the canonicalized parameters followed by a salt, and `wts`, the
//! unix timestamp the signature was computed at. The salt ("mixin key") is a
//! fixed permutation of two keys the `nav` endpoint publishes as image URLs.
//!
//! Signing is pure: [`sign_at`] returns a new parameter list and never touches
//! the caller's.

use std::fmt;

use chrono::Utc;
use md5::{Digest, Md5};
use serde::Deserialize;

use crate::client::ClientError;

/// Permutation applied to `img_key + sub_key` to derive the salt.
pub const WBI_PERMUTATION: [usize; 64] = [
    46, 47, 18, 2, 53, 8, 23, 32, 15, 50, 10, 31, 58, 3, 45, 35, 27, 43, 5, 49, 33, 9, 42, 19, 29,
    28, 14, 39, 12, 38, 41, 13, 37, 48, 7, 16, 24, 55, 40, 61, 26, 17, 0, 1, 60, 51, 30, 4, 22, 25,
    54, 21, 56, 59, 6, 63, 57, 62, 11, 36, 20, 34, 44, 52,
];

/// Length of the derived salt.
pub const MIXIN_KEY_LEN: usize = 32;

/// Query field carrying the signature.
pub const SIGNATURE_FIELD: &str = "w_rid";

/// Query field carrying the signing timestamp.
pub const TIMESTAMP_FIELD: &str = "wts";

/// Characters the server strips from text values before verifying.
const STRIPPED_CHARS: [char; 5] = ['!', '\'', '(', ')', '*'];

/// A query parameter value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    /// Text value; `!'()*` are removed before signing.
    Text(String),
    /// Integer value, rendered in decimal.
    Int(i64),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(value) => f.write_str(value),
            Self::Int(value) => write!(f, "{value}"),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl ParamValue {
    /// Value as sent on the wire, before percent-encoding.
    fn wire_text(&self) -> String {
        match self {
            Self::Text(value) => value.chars().filter(|c| !STRIPPED_CHARS.contains(c)).collect(),
            Self::Int(value) => value.to_string(),
        }
    }
}

/// Ordered list of query parameters with unique keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, ParamValue)>);

impl Params {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key`, keeping its position if it already exists.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(existing, _)| *existing == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    /// Builder form of [`Params::insert`].
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Removes `key`, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<ParamValue> {
        let index = self.0.iter().position(|(existing, _)| existing == key)?;
        Some(self.0.remove(index).1)
    }

    /// Returns the value of `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.0
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value)
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(key, _)| key.as_str())
    }

    /// Number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when there are no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Renders the list as a query string in insertion order.
    #[must_use]
    pub fn to_query_string(&self) -> String {
        join_pairs(self.0.iter().map(|(key, value)| (key.as_str(), value)))
    }
}

fn join_pairs<'a>(pairs: impl Iterator<Item = (&'a str, &'a ParamValue)>) -> String {
    pairs
        .map(|(key, value)| {
            format!(
                "{}={}",
                urlencoding::encode(key),
                urlencoding::encode(&value.wire_text())
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Derives the salt from the concatenated image and sub keys.
#[must_use]
pub fn mixin_key(raw: &str) -> String {
    let chars: Vec<char> = raw.chars().collect();
    WBI_PERMUTATION
        .iter()
        .filter_map(|&index| chars.get(index))
        .take(MIXIN_KEY_LEN)
        .collect()
}

/// Extracts a key from a published image URL: the stem of its last segment.
#[must_use]
pub fn key_from_url(url: &str) -> Option<&str> {
    let file = url.rsplit('/').next()?;
    let stem = file.split('.').next()?;
    (!stem.is_empty()).then_some(stem)
}

/// Canonical form the signature is computed over: keys sorted, values
/// stripped and percent-encoded.
#[must_use]
pub fn canonical_string(params: &Params) -> String {
    let mut sorted: Vec<&(String, ParamValue)> = params.0.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    join_pairs(sorted.into_iter().map(|(key, value)| (key.as_str(), value)))
}

/// Signs `params` at an explicit timestamp.
///
/// The result is `params` (any caller `wts` dropped) followed by `w_rid` and
/// `wts`.
#[must_use]
pub fn sign_at(params: &Params, salt: &str, wts: i64) -> Params {
    let mut working = params.clone();
    working.insert(TIMESTAMP_FIELD, wts);
    let canonical = canonical_string(&working);
    let digest = format!("{:x}", Md5::digest(format!("{canonical}{salt}").as_bytes()));

    let mut signed = params.clone();
    signed.remove(TIMESTAMP_FIELD);
    signed.remove(SIGNATURE_FIELD);
    signed.insert(SIGNATURE_FIELD, digest);
    signed.insert(TIMESTAMP_FIELD, wts);
    signed
}

/// Signs `params` at the current time.
#[must_use]
pub fn sign(params: &Params, salt: &str) -> Params {
    sign_at(params, salt, Utc::now().timestamp())
}

/// The two keys published by the `nav` endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WbiKeys {
    /// Stem of `wbi_img.img_url`.
    pub img_key: String,
    /// Stem of `wbi_img.sub_url`.
    pub sub_key: String,
}

#[derive(Deserialize)]
struct NavResponse {
    data: NavData,
}

#[derive(Deserialize)]
struct NavData {
    wbi_img: WbiImg,
}

#[derive(Deserialize)]
struct WbiImg {
    img_url: String,
    sub_url: String,
}

impl WbiKeys {
    /// Reads the keys from a `nav` response body.
    ///
    /// The endpoint answers with a non-zero `code` for anonymous visitors but
    /// still publishes the keys, so `code` is not checked.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Parse`] when `data.wbi_img` is missing or a URL
    /// has no usable file stem.
    pub fn from_nav_body(body: &str) -> Result<Self, ClientError> {
        let nav: NavResponse = serde_json::from_str(body)
            .map_err(|e| ClientError::parse("nav response", e.to_string()))?;
        let key = |url: &str| {
            key_from_url(url)
                .map(str::to_string)
                .ok_or_else(|| ClientError::parse("nav response", format!("no key in '{url}'")))
        };
        Ok(Self {
            img_key: key(&nav.data.wbi_img.img_url)?,
            sub_key: key(&nav.data.wbi_img.sub_url)?,
        })
    }

    /// The salt derived from both keys.
    #[must_use]
    pub fn salt(&self) -> String {
        mixin_key(&format!("{}{}", self.img_key, self.sub_key))
    }
}
