//! ModerateContent image rating.

use serde::Deserialize;

use super::{ProviderError, ProviderResult};
use crate::web::HttpClient;

pub const API_BASE: &str = "https://api.moderatecontent.com/moderate/";

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq)]
pub struct Predictions {
    #[serde(default)]
    pub everyone: f64,
    #[serde(default)]
    pub teen: f64,
    #[serde(default)]
    pub adult: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rating {
    /// 1 = everyone, 2 = teen, 3 = adult.
    pub rating_index: u8,
    pub rating_letter: String,
    pub predictions: Predictions,
}

impl Rating {
    pub fn is_adult(&self) -> bool {
        self.rating_index >= 3
    }
}

#[derive(Debug, Deserialize)]
struct RateResponse {
    #[serde(default)]
    error_code: i64,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    rating_index: u8,
    #[serde(default)]
    rating_letter: String,
    #[serde(default)]
    predictions: Predictions,
}

#[derive(Debug, Clone)]
pub struct ModerateContentClient {
    http: HttpClient,
    api_key: String,
    base: String,
}

impl ModerateContentClient {
    pub fn new(http: HttpClient, api_key: &str) -> Self {
        Self::with_base_url(http, api_key, API_BASE)
    }

    pub fn with_base_url(http: HttpClient, api_key: &str, base: &str) -> Self {
        Self {
            http,
            api_key: api_key.to_string(),
            base: base.to_string(),
        }
    }

    pub async fn rate_image(&self, url: &str) -> ProviderResult<Rating> {
        let response: RateResponse = self
            .http
            .get(&self.base)
            .query("key", &self.api_key)
            .query("url", url)
            .send_json()
            .await?;

        if response.error_code != 0 {
            return Err(ProviderError::Unexpected(response.error.unwrap_or_else(
                || format!("ModerateContent error code {}", response.error_code),
            )));
        }
        Ok(Rating {
            rating_index: response.rating_index,
            rating_letter: response.rating_letter,
            predictions: response.predictions,
        })
    }
}
