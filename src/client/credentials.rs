//! Account credentials and the adapter-specific extra field bag.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::ClientError;

/// A single adapter-specific extra value.
///
/// Only scalar JSON values are accepted; nested objects, arrays and `null`
/// are rejected when the bag is parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtraValue {
    /// Boolean flag.
    Bool(bool),
    /// Numeric value (integers are kept exact up to `f64` precision).
    Number(f64),
    /// Text value.
    Text(String),
}

impl ExtraValue {
    /// Returns the text payload, if this is a text value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for ExtraValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Number(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

/// Login credentials owned by a single client instance.
///
/// The secret is redacted in `Debug` output and never persisted.
#[derive(Clone)]
pub struct Credentials {
    /// Account identifier (student id, user name, ...).
    pub account: String,
    secret: String,
    /// Adapter-specific extra fields merged from caller input.
    pub extra: BTreeMap<String, ExtraValue>,
}

impl Credentials {
    /// Creates credentials with an empty extra field bag.
    #[must_use]
    pub fn new(account: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            secret: secret.into(),
            extra: BTreeMap::new(),
        }
    }

    /// Adds or replaces one extra field.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: ExtraValue) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Merges a JSON object of extra fields into the bag.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidCredentials`] when `raw` is not a JSON
    /// object or one of its values is not a string, number or boolean.
    pub fn merge_extra_json(&mut self, raw: &str) -> Result<(), ClientError> {
        let parsed: serde_json::Value = serde_json::from_str(raw).map_err(|e| {
            ClientError::invalid_credentials(
                "extra",
                format!("extra is not valid JSON: {e}"),
                "Pass extra fields as a JSON object, e.g. {\"url\": \"...\"}",
            )
        })?;
        let serde_json::Value::Object(map) = parsed else {
            return Err(ClientError::invalid_credentials(
                "extra",
                "extra must be a JSON object",
                "Pass extra fields as a JSON object, e.g. {\"url\": \"...\"}",
            ));
        };

        let mut merged = BTreeMap::new();
        for (key, value) in map {
            let value = match value {
                serde_json::Value::Bool(flag) => ExtraValue::Bool(flag),
                serde_json::Value::Number(number) => {
                    ExtraValue::Number(number.as_f64().unwrap_or_default())
                }
                serde_json::Value::String(text) => ExtraValue::Text(text),
                other => {
                    return Err(ClientError::invalid_credentials(
                        "extra",
                        format!("extra field '{key}' has unsupported value {other}"),
                        "Extra fields must be strings, numbers or booleans",
                    ));
                }
            };
            merged.insert(key, value);
        }
        self.extra.extend(merged);
        Ok(())
    }

    /// Returns the secret.
    ///
    /// Avoid logging the return value.
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Returns a required text extra field for `client`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidCredentials`] when the field is absent or not text.
    pub fn require_text(&self, client: &str, key: &str) -> Result<&str, ClientError> {
        match self.extra.get(key) {
            Some(ExtraValue::Text(value)) if !value.trim().is_empty() => Ok(value.as_str()),
            Some(other) => Err(ClientError::invalid_credentials(
                client,
                format!("extra field '{key}' must be a non-empty string, got {other}"),
                format!("Provide --extra '{{\"{key}\": \"...\"}}'"),
            )),
            None => Err(ClientError::invalid_credentials(
                client,
                format!("require '{key}' key in extra"),
                format!("Provide --extra '{{\"{key}\": \"...\"}}'"),
            )),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("account", &self.account)
            .field("secret", &"[REDACTED]")
            .field("extra", &self.extra)
            .finish()
    }
}
