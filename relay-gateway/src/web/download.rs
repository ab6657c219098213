use std::path::{Path, PathBuf};

use reqwest::header::CONTENT_TYPE;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::fetch::HttpClient;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP {0}")]
    Status(u16),
    #[error("file is larger than {limit} bytes")]
    TooLarge { limit: u64 },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A file held in memory.
#[derive(Debug, Clone)]
pub struct Downloaded {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Downloads files over HTTP, refusing anything above `max_bytes`.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: HttpClient,
    max_bytes: u64,
}

impl Downloader {
    pub fn new(client: HttpClient, max_bytes: u64) -> Self {
        Self { client, max_bytes }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    async fn open(&self, url: &str) -> Result<reqwest::Response, DownloadError> {
        let parsed = reqwest::Url::parse(url).map_err(|_| DownloadError::InvalidUrl(url.into()))?;
        match parsed.scheme() {
            "http" | "https" => {}
            _ => return Err(DownloadError::InvalidUrl(url.into())),
        }

        let response = self.client.raw().get(parsed).send().await?;
        if !response.status().is_success() {
            return Err(DownloadError::Status(response.status().as_u16()));
        }
        if let Some(len) = response.content_length()
            && len > self.max_bytes
        {
            return Err(DownloadError::TooLarge {
                limit: self.max_bytes,
            });
        }
        Ok(response)
    }

    /// Download `url` into memory.
    pub async fn fetch_bytes(&self, url: &str) -> Result<Downloaded, DownloadError> {
        let mut response = self.open(url).await?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or(value).trim().to_string());

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if (bytes.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(DownloadError::TooLarge {
                    limit: self.max_bytes,
                });
            }
            bytes.extend_from_slice(&chunk);
        }

        debug!(url, size = bytes.len(), "Downloaded into memory");
        Ok(Downloaded {
            file_name: file_name_from_url(url),
            content_type,
            bytes,
        })
    }

    /// Stream `url` to a file in `dir`. The partial file is removed on failure.
    pub async fn download_to(
        &self,
        url: &str,
        dir: &Path,
        file_name: Option<&str>,
    ) -> Result<PathBuf, DownloadError> {
        let response = self.open(url).await?;
        let name = match file_name {
            Some(name) => sanitize_file_name(name),
            None => file_name_from_url(url),
        };
        let path = dir.join(name);

        match self.stream_to(response, &path).await {
            Ok(size) => {
                debug!(url, path = %path.display(), size, "Downloaded to disk");
                Ok(path)
            }
            Err(err) => {
                if let Err(remove_err) = tokio::fs::remove_file(&path).await
                    && remove_err.kind() != std::io::ErrorKind::NotFound
                {
                    warn!(path = %path.display(), error = %remove_err, "Failed to remove partial download");
                }
                Err(err)
            }
        }
    }

    async fn stream_to(
        &self,
        mut response: reqwest::Response,
        path: &Path,
    ) -> Result<u64, DownloadError> {
        let mut file = tokio::fs::File::create(path).await?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            written += chunk.len() as u64;
            if written > self.max_bytes {
                return Err(DownloadError::TooLarge {
                    limit: self.max_bytes,
                });
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(written)
    }
}

/// Last path segment of `url`, reduced to `[A-Za-z0-9._-]`.
pub fn file_name_from_url(url: &str) -> String {
    let segment = url::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .unwrap_or_default();
    sanitize_file_name(&segment)
}

fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "download".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_uses_last_segment() {
        assert_eq!(
            file_name_from_url("https://cdn.discordapp.com/attachments/1/2/cat.png?ex=abc"),
            "cat.png"
        );
    }

    #[test]
    fn file_name_is_sanitized() {
        assert_eq!(
            file_name_from_url("https://example.com/my%20file (1).gif"),
            "my20file201.gif"
        );
        assert_eq!(file_name_from_url("https://example.com/..%2F..%2Fetc"), "2F..2Fetc");
    }

    #[test]
    fn file_name_defaults() {
        assert_eq!(file_name_from_url("https://example.com/"), "download");
        assert_eq!(file_name_from_url("not a url"), "download");
        assert_eq!(sanitize_file_name("..."), "download");
    }
}
