//! Integration tests for size-bounded downloads through a session.

use catcher_core::download::{DownloadError, DownloadRequest, stream_download};
use catcher_core::session::{Session, SessionConfig};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, ResponseTemplate};

mod support;
use support::socket_guard::{should_skip_socket_bound_test, start_mock_server_or_skip};

const MEGABYTE: usize = 1024 * 1024;

fn anonymous_session(cookie_dir: &TempDir) -> Session {
    let config = SessionConfig::default().with_cookie_dir(cookie_dir.path());
    Session::new("test", "anonymous", &config).unwrap()
}

/// Serves one response without `Content-Length`, streaming `total` bytes.
async fn spawn_unsized_body_server(total: usize) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        let mut request = [0_u8; 4096];
        let _ = socket.read(&mut request).await;
        let head = "HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nConnection: close\r\n\r\n";
        if socket.write_all(head.as_bytes()).await.is_err() {
            return;
        }
        let chunk = vec![b'x'; 64 * 1024];
        let mut sent = 0;
        while sent < total {
            // The client hangs up once it passes its limit.
            if socket.write_all(&chunk).await.is_err() {
                return;
            }
            sent += chunk.len();
        }
        let _ = socket.shutdown().await;
    });
    format!("http://{addr}/stream.bin")
}

/// Declares `declared` bytes but sends only `sent` before closing the socket.
async fn spawn_truncated_body_server(declared: usize, sent: usize) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        let mut request = [0_u8; 4096];
        let _ = socket.read(&mut request).await;
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/pdf\r\nContent-Length: {declared}\r\n\r\n"
        );
        if socket.write_all(head.as_bytes()).await.is_err() {
            return;
        }
        let _ = socket.write_all(&vec![b'x'; sent]).await;
        let _ = socket.flush().await;
        let _ = socket.shutdown().await;
    });
    format!("http://{addr}/cut.pdf")
}

#[tokio::test]
async fn test_stream_download_reports_bytes_written() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let dir = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .and(path("/notice.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PDF content here"))
        .mount(&server)
        .await;

    let destination = dir.path().join("notice.pdf");
    let request = DownloadRequest::new(format!("{}/notice.pdf", server.uri()), &destination);

    let bytes = stream_download(&reqwest::Client::new(), &request).await.unwrap();
    assert_eq!(bytes, 16);
    assert_eq!(std::fs::read(&destination).unwrap(), b"PDF content here");
}

#[tokio::test]
async fn test_download_writes_complete_file_with_referer() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let dir = TempDir::new().unwrap();
    let body = b"%PDF-1.7 attachment body".to_vec();
    Mock::given(method("GET"))
        .and(path("/files/notice.pdf"))
        .and(header("referer", "http://portal.example/info/1.htm"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let session = anonymous_session(&dir);
    let destination = dir.path().join("notice.pdf");
    let request = DownloadRequest::new(format!("{}/files/notice.pdf", server.uri()), &destination)
        .with_referer("http://portal.example/info/1.htm")
        .with_max_size_mb(1);

    assert!(session.download(&request).await);
    assert_eq!(std::fs::read(&destination).unwrap(), body);
}

#[tokio::test]
async fn test_declared_length_over_limit_creates_no_file() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let dir = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .and(path("/big.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0_u8; 2 * MEGABYTE]))
        .mount(&server)
        .await;

    let session = anonymous_session(&dir);
    let destination = dir.path().join("big.zip");
    let request =
        DownloadRequest::new(format!("{}/big.zip", server.uri()), &destination).with_max_size_mb(1);

    assert!(!session.download(&request).await);
    assert!(!destination.exists());

    let error = stream_download(&reqwest::Client::new(), &request).await.unwrap_err();
    assert!(
        matches!(error, DownloadError::SizeLimitExceeded { declared: true, .. }),
        "got: {error}"
    );
    assert!(!destination.exists());
}

#[tokio::test]
async fn test_connection_closed_mid_body_removes_partial_file() {
    if should_skip_socket_bound_test() {
        return;
    }
    let dir = TempDir::new().unwrap();
    let destination = dir.path().join("cut.pdf");

    let url = spawn_truncated_body_server(MEGABYTE, 64 * 1024).await;
    let session = anonymous_session(&dir);
    let request = DownloadRequest::new(url, &destination);
    assert!(!session.download(&request).await);
    assert!(!destination.exists());

    let url = spawn_truncated_body_server(MEGABYTE, 64 * 1024).await;
    let request = DownloadRequest::new(url, &destination);
    let error = stream_download(&reqwest::Client::new(), &request).await.unwrap_err();
    assert!(matches!(error, DownloadError::Network { .. }), "got: {error}");
    assert!(!destination.exists());
}

#[tokio::test]
async fn test_undeclared_length_over_limit_removes_partial_file() {
    if should_skip_socket_bound_test() {
        return;
    }
    let dir = TempDir::new().unwrap();
    let url = spawn_unsized_body_server(3 * MEGABYTE).await;
    let destination = dir.path().join("stream.bin");
    let request = DownloadRequest::new(url, &destination).with_max_size_mb(1);

    let client = reqwest::Client::new();
    let error = stream_download(&client, &request).await.unwrap_err();
    assert!(
        matches!(error, DownloadError::SizeLimitExceeded { declared: false, .. }),
        "got: {error}"
    );
    assert!(!destination.exists());
}

#[tokio::test]
async fn test_undeclared_length_within_limit_succeeds() {
    if should_skip_socket_bound_test() {
        return;
    }
    let dir = TempDir::new().unwrap();
    let url = spawn_unsized_body_server(256 * 1024).await;
    let destination = dir.path().join("stream.bin");
    let request = DownloadRequest::new(url, &destination).with_max_size_mb(1);

    let session = anonymous_session(&dir);
    assert!(session.download(&request).await);
    assert_eq!(std::fs::metadata(&destination).unwrap().len(), 256 * 1024);
}

#[tokio::test]
async fn test_server_error_reports_failure_without_file() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let dir = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .and(path("/gone.pdf"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let session = anonymous_session(&dir);
    let destination = dir.path().join("gone.pdf");
    let request = DownloadRequest::new(format!("{}/gone.pdf", server.uri()), &destination);

    assert!(!session.download(&request).await);
    let entries: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "pdf"))
        .collect();
    assert!(entries.is_empty(), "no files expected, found: {entries:?}");
}
