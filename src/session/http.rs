//! Construction of the reqwest clients owned by a session.
//!
//! Every client shares the session jar and presents the same browser identity.
//! Building a client can panic while reading platform proxy settings; that
//! panic is caught and the build retried with proxies taken from the
//! environment only.

use std::panic::{AssertUnwindSafe, catch_unwind, set_hook, take_hook};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use reqwest::header::{ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use reqwest::redirect::Policy;
use reqwest::{Client, ClientBuilder, Proxy};
use tracing::warn;

use super::SessionJar;
use crate::client::ClientError;
use crate::download::constants::CONNECT_TIMEOUT_SECS;
use crate::user_agent;

/// Shape of one session client.
#[derive(Debug, Clone)]
pub(crate) struct ClientSpec<'a> {
    pub name: &'static str,
    pub user_agent: &'a str,
    pub timeout: Duration,
    pub follow_redirects: bool,
}

static CLIENT_BUILD_PANIC_HOOK_LOCK: Mutex<()> = Mutex::new(());

/// Builds one client bound to `jar`.
pub(crate) fn build_http_client(
    jar: &Arc<SessionJar>,
    spec: &ClientSpec<'_>,
) -> Result<Client, ClientError> {
    match try_build_client(jar, spec, false) {
        Ok(client) => Ok(client),
        Err(BuildClientFailure::Panic) => {
            warn!(
                client = spec.name,
                "HTTP client builder panicked while loading system proxy settings; retrying with env-proxy fallback"
            );
            try_build_client(jar, spec, true).map_err(|failure| match failure {
                BuildClientFailure::Build(error) => build_error(spec.name, error),
                BuildClientFailure::Panic => ClientError::transport(
                    spec.name,
                    "HTTP client builder panicked while applying env-proxy fallback",
                ),
            })
        }
        Err(BuildClientFailure::Build(error)) => Err(build_error(spec.name, error)),
    }
}

fn build_error(name: &str, error: reqwest::Error) -> ClientError {
    ClientError::transport(name, format!("failed to build HTTP client: {error}"))
}

enum BuildClientFailure {
    Panic,
    Build(reqwest::Error),
}

fn try_build_client(
    jar: &Arc<SessionJar>,
    spec: &ClientSpec<'_>,
    disable_system_proxy_lookup: bool,
) -> Result<Client, BuildClientFailure> {
    let jar = Arc::clone(jar);
    catch_unwind_silent(AssertUnwindSafe(move || {
        let mut builder = base_client_builder(jar, spec);
        if disable_system_proxy_lookup {
            builder = apply_env_proxy_fallback(builder.no_proxy());
        }
        builder.build().map_err(BuildClientFailure::Build)
    }))
    .map_err(|_| BuildClientFailure::Panic)?
}

fn catch_unwind_silent<F, T>(operation: F) -> Result<T, Box<dyn std::any::Any + Send + 'static>>
where
    F: FnOnce() -> T + std::panic::UnwindSafe,
{
    let _panic_hook_guard = CLIENT_BUILD_PANIC_HOOK_LOCK
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    let previous_hook = take_hook();
    set_hook(Box::new(|_| {}));
    let outcome = catch_unwind(operation);
    set_hook(previous_hook);
    outcome
}

fn base_client_builder(jar: Arc<SessionJar>, spec: &ClientSpec<'_>) -> ClientBuilder {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static(user_agent::ACCEPT_LANGUAGE),
    );
    headers.insert(
        "sec-ch-ua",
        HeaderValue::from_static(user_agent::CLIENT_HINTS),
    );

    let redirect = if spec.follow_redirects {
        Policy::limited(10)
    } else {
        Policy::none()
    };

    Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS).min(spec.timeout))
        .timeout(spec.timeout)
        .gzip(true)
        .user_agent(spec.user_agent)
        .default_headers(headers)
        .redirect(redirect)
        .cookie_provider(jar)
}

fn apply_env_proxy_fallback(mut builder: ClientBuilder) -> ClientBuilder {
    if let Some(proxy) = env_proxy_for_scheme("https")
        && let Ok(resolved) = Proxy::https(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    if let Some(proxy) = env_proxy_for_scheme("http")
        && let Ok(resolved) = Proxy::http(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    builder
}

fn env_proxy_for_scheme(scheme: &str) -> Option<String> {
    match scheme {
        "https" => find_first_proxy_var(&["HTTPS_PROXY", "https_proxy", "ALL_PROXY", "all_proxy"]),
        "http" => find_first_proxy_var(&["HTTP_PROXY", "http_proxy", "ALL_PROXY", "all_proxy"]),
        _ => None,
    }
}

fn find_first_proxy_var(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        std::env::var(name)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}
