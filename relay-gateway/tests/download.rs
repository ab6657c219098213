//! Size limits and cleanup of the downloader.

mod common;

use common::http_client;
use relay_gateway::web::{DownloadError, Downloader};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn serve(body: Vec<u8>) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/cat.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "image/png; charset=binary")
                .set_body_bytes(body),
        )
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn small_files_are_fetched() {
    let server = serve(vec![7; 64]).await;
    let downloader = Downloader::new(http_client(0), 1024);

    let file = downloader
        .fetch_bytes(&format!("{}/files/cat.png", server.uri()))
        .await
        .unwrap();
    assert_eq!(file.file_name, "cat.png");
    assert_eq!(file.content_type.as_deref(), Some("image/png"));
    assert_eq!(file.bytes.len(), 64);
}

#[tokio::test]
async fn oversized_files_are_refused() {
    let server = serve(vec![7; 4096]).await;
    let downloader = Downloader::new(http_client(0), 1024);

    let err = downloader
        .fetch_bytes(&format!("{}/files/cat.png", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, DownloadError::TooLarge { limit: 1024 }));
}

#[tokio::test]
async fn oversized_downloads_leave_no_file() {
    let server = serve(vec![7; 4096]).await;
    let downloader = Downloader::new(http_client(0), 1024);
    let dir = tempfile::tempdir().unwrap();

    let err = downloader
        .download_to(&format!("{}/files/cat.png", server.uri()), dir.path(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, DownloadError::TooLarge { .. }));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn downloads_land_in_the_directory() {
    let server = serve(vec![1, 2, 3]).await;
    let downloader = Downloader::new(http_client(0), 1024);
    let dir = tempfile::tempdir().unwrap();

    let saved = downloader
        .download_to(
            &format!("{}/files/cat.png", server.uri()),
            dir.path(),
            Some("../renamed.png"),
        )
        .await
        .unwrap();
    assert_eq!(saved, dir.path().join("renamed.png"));
    assert_eq!(std::fs::read(saved).unwrap(), vec![1, 2, 3]);
}

#[tokio::test]
async fn non_http_urls_are_rejected() {
    let downloader = Downloader::new(http_client(0), 1024);
    let err = downloader.fetch_bytes("file:///etc/passwd").await.unwrap_err();
    assert!(matches!(err, DownloadError::InvalidUrl(_)));
}
