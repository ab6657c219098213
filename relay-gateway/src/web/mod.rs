//! Outbound HTTP: a retrying request builder and a size-capped downloader.

pub mod download;
pub mod fetch;

pub use download::{DownloadError, Downloaded, Downloader, file_name_from_url};
pub use fetch::{FetchError, HttpClient, HttpResponse, RequestBuilder};
