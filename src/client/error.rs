//! Error types for client registry and site adapter operations.
//!
//! This module defines structured errors for registry lookups, login
//! handshakes, page fetches and markup extraction, following the
//! What/Why/Fix pattern used across the project.

use thiserror::Error;

/// Errors that can occur while resolving or running a site client.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Client identifier does not match the required naming pattern
    #[error(
        "invalid client identifier '{identifier}': expected lowercase letters, digits or '_' and no leading digit\n  Suggestion: Rename the client to match [a-z_][a-z0-9_]*"
    )]
    InvalidIdentifier {
        /// The rejected identifier
        identifier: String,
    },

    /// Client identifier is already registered
    #[error(
        "client identifier '{identifier}' is already registered\n  Suggestion: Give each client a unique identifier"
    )]
    DuplicateIdentifier {
        /// The identifier that collided
        identifier: String,
    },

    /// No client registered under the requested identifier
    #[error("unsupported client '{identifier}'\n  Suggestion: Use one of: {available}")]
    UnknownClient {
        /// The identifier that was requested
        identifier: String,
        /// Comma-separated list of registered identifiers
        available: String,
    },

    /// Login handshake failed
    #[error("[AUTH] authentication failed for '{client}': {reason}\n  Suggestion: {suggestion}")]
    Authentication {
        /// The client whose login failed
        client: String,
        /// Why the login failed
        reason: String,
        /// How to fix the issue
        suggestion: String,
    },

    /// Network-level failure while fetching a page or API response
    #[error("request to {url} failed: {reason}")]
    Transport {
        /// The URL that failed
        url: String,
        /// Why the request failed
        reason: String,
    },

    /// Expected markup or JSON shape was absent
    #[error("failed to parse {context}: {reason}")]
    Parse {
        /// What was being parsed (e.g. "listing row", "nav response")
        context: String,
        /// Why parsing failed
        reason: String,
    },

    /// Adapter-specific credential fields are missing or malformed
    #[error("invalid credentials for '{client}': {reason}\n  Suggestion: {suggestion}")]
    InvalidCredentials {
        /// The client rejecting the credentials
        client: String,
        /// Why the credentials were rejected
        reason: String,
        /// How to fix the issue
        suggestion: String,
    },

    /// The client does not offer the requested operation
    #[error("client '{client}' does not support the '{operation}' action")]
    Unsupported {
        /// The client that was asked
        client: String,
        /// The unsupported operation
        operation: String,
    },
}

impl ClientError {
    /// Creates an `InvalidIdentifier` error.
    #[must_use]
    pub fn invalid_identifier(identifier: &str) -> Self {
        Self::InvalidIdentifier {
            identifier: identifier.to_string(),
        }
    }

    /// Creates a `DuplicateIdentifier` error.
    #[must_use]
    pub fn duplicate_identifier(identifier: &str) -> Self {
        Self::DuplicateIdentifier {
            identifier: identifier.to_string(),
        }
    }

    /// Creates an `UnknownClient` error listing the identifiers that are available.
    #[must_use]
    pub fn unknown_client(identifier: &str, available: &[&str]) -> Self {
        Self::UnknownClient {
            identifier: identifier.to_string(),
            available: available.join(", "),
        }
    }

    /// Creates an `Authentication` error.
    #[must_use]
    pub fn authentication(client: &str, reason: impl Into<String>) -> Self {
        Self::Authentication {
            client: client.to_string(),
            reason: reason.into(),
            suggestion: "Check the account credentials; stored cookies are replaced on the next successful login".to_string(),
        }
    }

    /// Creates a `Transport` error from any displayable cause.
    #[must_use]
    pub fn transport(url: &str, reason: impl std::fmt::Display) -> Self {
        Self::Transport {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Creates a `Parse` error.
    #[must_use]
    pub fn parse(context: &str, reason: impl Into<String>) -> Self {
        Self::Parse {
            context: context.to_string(),
            reason: reason.into(),
        }
    }

    /// Creates an `InvalidCredentials` error.
    #[must_use]
    pub fn invalid_credentials(
        client: &str,
        reason: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::InvalidCredentials {
            client: client.to_string(),
            reason: reason.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates an `Unsupported` error.
    #[must_use]
    pub fn unsupported(client: &str, operation: &str) -> Self {
        Self::Unsupported {
            client: client.to_string(),
            operation: operation.to_string(),
        }
    }

    /// Returns true for errors raised by the login handshake.
    #[must_use]
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }
}
