//! Google Custom Search JSON API.

use serde::Deserialize;

use super::ProviderResult;
use crate::web::HttpClient;

pub const API_BASE: &str = "https://www.googleapis.com/customsearch/v1";

/// Custom Search returns at most ten results per request.
pub const MAX_RESULTS: u8 = 10;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SearchImage {
    #[serde(default)]
    pub context_link: Option<String>,
    #[serde(default)]
    pub thumbnail_link: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub title: String,
    pub link: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub display_link: String,
    #[serde(default)]
    pub image: Option<SearchImage>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchResult>,
}

#[derive(Debug, Clone)]
pub struct GoogleSearchClient {
    http: HttpClient,
    api_key: String,
    engine_id: String,
    base: String,
}

impl GoogleSearchClient {
    pub fn new(http: HttpClient, api_key: &str, engine_id: &str) -> Self {
        Self::with_base_url(http, api_key, engine_id, API_BASE)
    }

    pub fn with_base_url(http: HttpClient, api_key: &str, engine_id: &str, base: &str) -> Self {
        Self {
            http,
            api_key: api_key.to_string(),
            engine_id: engine_id.to_string(),
            base: base.to_string(),
        }
    }

    async fn query(
        &self,
        query: &str,
        num: u8,
        safe: bool,
        images: bool,
    ) -> ProviderResult<Vec<SearchResult>> {
        let mut request = self
            .http
            .get(&self.base)
            .query("key", &self.api_key)
            .query("cx", &self.engine_id)
            .query("q", query)
            .query("num", num.clamp(1, MAX_RESULTS))
            .query("safe", if safe { "active" } else { "off" });
        if images {
            request = request.query("searchType", "image");
        }
        let response: SearchResponse = request.send_json().await?;
        Ok(response.items)
    }

    /// Web results. An empty list means nothing matched.
    pub async fn search(
        &self,
        query: &str,
        num: u8,
        safe: bool,
    ) -> ProviderResult<Vec<SearchResult>> {
        self.query(query, num, safe, false).await
    }

    /// Image results; `link` is the image itself.
    pub async fn image_search(
        &self,
        query: &str,
        num: u8,
        safe: bool,
    ) -> ProviderResult<Vec<SearchResult>> {
        self.query(query, num, safe, true).await
    }
}
