//! Streams an HTTP body to disk under a size cap.

use std::path::Path;

use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::{CONTENT_LENGTH, REFERER};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::DownloadRequest;
use super::error::DownloadError;

/// Downloads `request.url` to `request.destination`, reporting only success.
///
/// Failures of any kind are logged and turned into `false`; the destination
/// never holds a partial body afterwards.
#[instrument(skip(client, request), fields(url = %request.url, dest = %request.destination.display()))]
pub async fn download_file(client: &Client, request: &DownloadRequest) -> bool {
    match stream_download(client, request).await {
        Ok(bytes) => {
            info!(bytes, "download complete");
            true
        }
        Err(error) if error.is_size_limit() => {
            warn!(error = %error, "download aborted by size limit");
            false
        }
        Err(error) => {
            warn!(error = %error, "download failed");
            false
        }
    }
}

/// Downloads `request.url` to `request.destination`, returning bytes written.
///
/// # Errors
///
/// Returns [`DownloadError`] for invalid URLs, transport failures, non-success
/// statuses, filesystem errors and bodies over the size cap. The destination
/// file is removed on every error raised after it was created.
pub async fn stream_download(
    client: &Client,
    request: &DownloadRequest,
) -> Result<u64, DownloadError> {
    let url = request.url.as_str();
    Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;

    let mut builder = client.get(url);
    if let Some(referer) = request.referer.as_deref() {
        builder = builder.header(REFERER, referer);
    }
    let response = builder
        .send()
        .await
        .map_err(|e| DownloadError::network(url, e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::http_status(url, status.as_u16()));
    }

    let limit = request.limit_bytes();
    let declared = declared_length(&response);
    if let (Some(limit), Some(declared)) = (limit, declared)
        && declared > limit
    {
        return Err(DownloadError::declared_too_large(url, limit, declared));
    }
    debug!(?declared, ?limit, "response accepted, streaming body");

    let path = request.destination.as_path();
    let mut file = File::create(path)
        .await
        .map_err(|e| DownloadError::io(path, e))?;

    let result = stream_to_file(&mut file, response, url, path, limit).await;
    drop(file);
    if result.is_err() {
        debug!(path = %path.display(), "removing partial file after error");
        if let Err(error) = tokio::fs::remove_file(path).await {
            warn!(path = %path.display(), error = %error, "failed to remove partial file");
        }
    }
    result
}

fn declared_length(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
}

/// Streams response body to file, returning bytes written.
///
/// A chunk that would push the total past `limit` is never written.
async fn stream_to_file(
    file: &mut File,
    response: reqwest::Response,
    url: &str,
    file_path: &Path,
    limit: Option<u64>,
) -> Result<u64, DownloadError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| DownloadError::network(url, e))?;
        let received = bytes_written + chunk.len() as u64;
        if let Some(limit) = limit
            && received > limit
        {
            return Err(DownloadError::received_too_large(url, limit, received));
        }

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(file_path, e))?;
        bytes_written = received;
    }

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(file_path, e))?;

    Ok(bytes_written)
}
