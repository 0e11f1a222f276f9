//! CLI entry point for the catcher tool.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use catcher_core::client::{Client, Credentials, build_default_client_registry};
use catcher_core::download::DownloadRequest;
use catcher_core::session::SessionConfig;
use clap::Parser;
use serde::Serialize;
use tracing::{debug, info};

mod cli;
mod config;

use cli::{Action, Args};
use config::FileConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();
    let file_config = config::load_default_file_config()?;

    // Priority: RUST_LOG env var > quiet flag > verbose flag > config > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => file_config
                .verbosity
                .map_or("info", |verbosity| verbosity.filter_directive()),
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(client = %args.client, action = ?args.action, "CLI arguments parsed");

    let session_config = session_config(&args, &file_config);
    let registry = build_default_client_registry()?;

    let mut credentials = Credentials::new(&args.username, &args.password);
    if let Some(extra) = &args.extra {
        credentials.merge_extra_json(extra)?;
    }
    let client = registry.create(&args.client, credentials, &session_config)?;
    info!(client = client.id(), "client ready");

    let output = run_action(client.as_ref(), &args).await?;
    println!("{output}");
    Ok(())
}

/// Merges CLI flags over file config over built-in defaults.
fn session_config(args: &Args, file_config: &FileConfig) -> SessionConfig {
    let mut config = SessionConfig::default();
    if let Some(cookie_dir) = args.cookie_dir.as_ref().or(file_config.cookie_dir.as_ref()) {
        config.cookie_dir.clone_from(cookie_dir);
    }
    if let Some(secs) = file_config.page_timeout_secs {
        config.page_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = file_config.download_timeout_secs {
        config.download_timeout = Duration::from_secs(secs);
    }
    config
}

async fn run_action(client: &dyn Client, args: &Args) -> Result<String> {
    match args.action {
        Action::List => to_json(&client.list().await?),
        Action::Detail => {
            let url = require_flag(args.url.as_deref(), "--url", args.action)?;
            to_json(&client.detail(url).await?)
        }
        Action::Download => {
            let url = require_flag(args.url.as_deref(), "--url", args.action)?;
            let destination = args
                .save_path
                .as_ref()
                .ok_or_else(|| missing_flag("--save-path", args.action))?;
            let mut request = DownloadRequest::new(url, destination);
            if let Some(referer) = &args.referer {
                request = request.with_referer(referer);
            }
            if let Some(max_size) = args.max_size {
                request = request.with_max_size_mb(max_size);
            }
            to_json(&client.download(&request).await?)
        }
    }
}

fn require_flag<'a>(value: Option<&'a str>, flag: &str, action: Action) -> Result<&'a str> {
    value.ok_or_else(|| missing_flag(flag, action))
}

fn missing_flag(flag: &str, action: Action) -> anyhow::Error {
    anyhow!("{flag} is required for --action {}", action.as_str())
}

fn to_json(value: &impl Serialize) -> Result<String> {
    serde_json::to_string(value).context("Failed to serialize result")
}
