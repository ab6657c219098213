//! Tenor v2 GIF search.

use std::collections::HashMap;

use serde::Deserialize;

use super::{ProviderError, ProviderResult};
use crate::web::HttpClient;

pub const API_BASE: &str = "https://tenor.googleapis.com/v2";

const RANDOM_POOL: u8 = 20;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct MediaFormat {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TenorGif {
    pub id: String,
    #[serde(default)]
    pub content_description: String,
    #[serde(default)]
    pub itemurl: String,
    #[serde(default)]
    pub media_formats: HashMap<String, MediaFormat>,
}

impl TenorGif {
    /// Best embeddable URL: full GIF, then the smaller renditions.
    pub fn gif_url(&self) -> Option<&str> {
        ["gif", "mediumgif", "tinygif"]
            .iter()
            .find_map(|format| self.media_formats.get(*format))
            .map(|media| media.url.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<TenorGif>,
}

#[derive(Debug, Clone)]
pub struct TenorClient {
    http: HttpClient,
    api_key: String,
    base: String,
}

impl TenorClient {
    pub fn new(http: HttpClient, api_key: &str) -> Self {
        Self::with_base_url(http, api_key, API_BASE)
    }

    pub fn with_base_url(http: HttpClient, api_key: &str, base: &str) -> Self {
        Self {
            http,
            api_key: api_key.to_string(),
            base: base.trim_end_matches('/').to_string(),
        }
    }

    async fn fetch(&self, query: &str, limit: u8, random: bool) -> ProviderResult<Vec<TenorGif>> {
        let mut request = self
            .http
            .get(format!("{}/search", self.base))
            .query("q", query)
            .query("key", &self.api_key)
            .query("limit", limit.clamp(1, 50))
            .query("media_filter", "gif,tinygif")
            .query("contentfilter", "medium");
        if random {
            request = request.query("random", "true").no_cache();
        }
        let response: SearchResponse = request.send_json().await?;
        Ok(response.results)
    }

    pub async fn search(&self, query: &str, limit: u8) -> ProviderResult<Vec<TenorGif>> {
        self.fetch(query, limit, false).await
    }

    pub async fn random(&self, query: &str) -> ProviderResult<TenorGif> {
        self.fetch(query, RANDOM_POOL, true)
            .await?
            .into_iter()
            .find(|gif| gif.gif_url().is_some())
            .ok_or_else(|| ProviderError::NotFound(format!("GIFs for '{query}'")))
    }
}
