//! Client registry mapping identifiers to adapter factories.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::utils::compile_static_regex;
use super::{Client, ClientError, Credentials};
use crate::session::SessionConfig;

/// Builds one adapter instance for a set of credentials.
pub type ClientFactory = fn(Credentials, &SessionConfig) -> Result<Box<dyn Client>, ClientError>;

static IDENTIFIER_RE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"^[a-z_][a-z0-9_]*$"));

/// Registry of site clients keyed by identifier.
///
/// Identifiers are unique and never overwritten; a populated registry is
/// only read from afterwards.
#[derive(Default, Clone)]
pub struct ClientRegistry {
    factories: BTreeMap<String, ClientFactory>,
}

impl ClientRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` under `identifier`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidIdentifier`] when the identifier does not
    /// match `[a-z_][a-z0-9_]*`, and [`ClientError::DuplicateIdentifier`] when it
    /// is already taken.
    pub fn register(&mut self, identifier: &str, factory: ClientFactory) -> Result<(), ClientError> {
        if !IDENTIFIER_RE.is_match(identifier) {
            return Err(ClientError::invalid_identifier(identifier));
        }
        if self.factories.contains_key(identifier) {
            return Err(ClientError::duplicate_identifier(identifier));
        }
        debug!(identifier, "registered client");
        self.factories.insert(identifier.to_string(), factory);
        Ok(())
    }

    /// Looks up the factory for `identifier`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::UnknownClient`] listing the registered identifiers.
    pub fn resolve(&self, identifier: &str) -> Result<ClientFactory, ClientError> {
        self.factories
            .get(identifier)
            .copied()
            .ok_or_else(|| ClientError::unknown_client(identifier, &self.identifiers()))
    }

    /// Resolves `identifier` and builds a client.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::UnknownClient`] for unregistered identifiers and
    /// whatever the factory reports for bad credentials.
    pub fn create(
        &self,
        identifier: &str,
        credentials: Credentials,
        config: &SessionConfig,
    ) -> Result<Box<dyn Client>, ClientError> {
        let factory = self.resolve(identifier)?;
        factory(credentials, config)
    }

    /// Registered identifiers in sorted order.
    #[must_use]
    pub fn identifiers(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Returns true when `identifier` is registered.
    #[must_use]
    pub fn contains(&self, identifier: &str) -> bool {
        self.factories.contains_key(identifier)
    }

    /// Number of registered clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Returns true when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("identifiers", &self.identifiers())
            .finish()
    }
}
