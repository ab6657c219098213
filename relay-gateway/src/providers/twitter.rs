//! Twitter API v2 with an app bearer token.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{ProviderError, ProviderResult};
use crate::web::HttpClient;

pub const API_BASE: &str = "https://api.twitter.com/2";

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TwitterUser {
    pub id: String,
    pub name: String,
    pub username: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub profile_image_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Tweet {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Tweet {
    pub fn url(&self, username: &str) -> String {
        format!("https://twitter.com/{username}/status/{}", self.id)
    }
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    detail: String,
}

/// v2 answers lookups for missing users with 200 and an `errors` array.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<ApiError>,
}

#[derive(Debug, Clone)]
pub struct TwitterClient {
    http: HttpClient,
    bearer_token: String,
    base: String,
}

impl TwitterClient {
    pub fn new(http: HttpClient, bearer_token: &str) -> Self {
        Self::with_base_url(http, bearer_token, API_BASE)
    }

    pub fn with_base_url(http: HttpClient, bearer_token: &str, base: &str) -> Self {
        Self {
            http,
            bearer_token: bearer_token.to_string(),
            base: base.trim_end_matches('/').to_string(),
        }
    }

    pub async fn user_by_username(&self, username: &str) -> ProviderResult<TwitterUser> {
        let username = username.trim().trim_start_matches('@');
        let envelope: Envelope<TwitterUser> = self
            .http
            .get(format!("{}/users/by/username/{username}", self.base))
            .bearer(&self.bearer_token)
            .query("user.fields", "description,profile_image_url")
            .send_json()
            .await
            .map_err(|err| ProviderError::from_fetch(err, format!("@{username}")))?;

        envelope.data.ok_or_else(|| {
            let detail = envelope
                .errors
                .first()
                .map(|e| e.detail.clone())
                .unwrap_or_default();
            ProviderError::NotFound(format!("@{username} {detail}").trim().to_string())
        })
    }

    /// Newest tweets first. `max` is clamped to the API's 5-100 range.
    pub async fn recent_tweets(&self, user_id: &str, max: u8) -> ProviderResult<Vec<Tweet>> {
        let envelope: Envelope<Vec<Tweet>> = self
            .http
            .get(format!("{}/users/{user_id}/tweets", self.base))
            .bearer(&self.bearer_token)
            .query("max_results", max.clamp(5, 100))
            .query("tweet.fields", "created_at")
            .send_json()
            .await
            .map_err(|err| ProviderError::from_fetch(err, format!("Twitter user {user_id}")))?;
        Ok(envelope.data.unwrap_or_default())
    }
}
