//! Twitch Helix client using an app access token.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{ProviderError, ProviderResult};
use crate::web::HttpClient;

pub const API_BASE: &str = "https://api.twitch.tv/helix";
pub const AUTH_BASE: &str = "https://id.twitch.tv/oauth2";

/// Refresh this long before the token actually expires.
const EXPIRY_MARGIN_SECS: i64 = 60;
/// Helix caps `login` filters per request.
const MAX_LOGINS: usize = 100;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TwitchUser {
    pub id: String,
    pub login: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub profile_image_url: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TwitchStream {
    pub id: String,
    pub user_id: String,
    pub user_login: String,
    pub user_name: String,
    #[serde(default)]
    pub game_name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub viewer_count: u64,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub thumbnail_url: String,
}

impl TwitchStream {
    pub fn url(&self) -> String {
        format!("https://twitch.tv/{}", self.user_login)
    }

    /// Thumbnail at a concrete size.
    pub fn thumbnail(&self, width: u32, height: u32) -> String {
        self.thumbnail_url
            .replace("{width}", &width.to_string())
            .replace("{height}", &height.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct DataList<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct AppToken {
    value: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TwitchClient {
    http: HttpClient,
    client_id: String,
    client_secret: String,
    api_base: String,
    auth_base: String,
    token: Arc<RwLock<Option<AppToken>>>,
}

impl TwitchClient {
    pub fn new(http: HttpClient, client_id: &str, client_secret: &str) -> Self {
        Self::with_base_urls(http, client_id, client_secret, API_BASE, AUTH_BASE)
    }

    pub fn with_base_urls(
        http: HttpClient,
        client_id: &str,
        client_secret: &str,
        api_base: &str,
        auth_base: &str,
    ) -> Self {
        Self {
            http,
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
            auth_base: auth_base.trim_end_matches('/').to_string(),
            token: Arc::new(RwLock::new(None)),
        }
    }

    async fn access_token(&self, force_refresh: bool) -> ProviderResult<String> {
        if !force_refresh
            && let Some(token) = self.token.read().await.as_ref()
            && token.expires_at > Utc::now()
        {
            return Ok(token.value.clone());
        }

        let mut guard = self.token.write().await;
        // Another task may have refreshed while we waited.
        if !force_refresh
            && let Some(token) = guard.as_ref()
            && token.expires_at > Utc::now()
        {
            return Ok(token.value.clone());
        }

        let response: TokenResponse = self
            .http
            .post(format!("{}/token", self.auth_base))
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send_json()
            .await?;

        let lifetime = (response.expires_in - EXPIRY_MARGIN_SECS).max(0);
        info!(expires_in = response.expires_in, "Fetched Twitch app token");
        let token = AppToken {
            value: response.access_token,
            expires_at: Utc::now() + Duration::seconds(lifetime),
        };
        let value = token.value.clone();
        *guard = Some(token);
        Ok(value)
    }

    /// GET a Helix endpoint, refreshing the token once on 401.
    async fn helix<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> ProviderResult<Vec<T>> {
        let mut refreshed = false;
        loop {
            let token = self.access_token(refreshed).await?;
            let mut request = self
                .http
                .get(format!("{}/{path}", self.api_base))
                .header("Client-Id", self.client_id.as_str())
                .bearer(&token)
                .no_cache();
            for (name, value) in query {
                request = request.query(*name, value);
            }

            match request.send_json::<DataList<T>>().await {
                Ok(list) => return Ok(list.data),
                Err(err) if err.status() == Some(401) && !refreshed => {
                    debug!("Twitch token rejected, refreshing");
                    refreshed = true;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn login_query(logins: &[String]) -> Vec<(&'static str, &str)> {
        logins
            .iter()
            .take(MAX_LOGINS)
            .map(|login| ("login", login.as_str()))
            .collect()
    }

    pub async fn users(&self, logins: &[String]) -> ProviderResult<Vec<TwitchUser>> {
        if logins.is_empty() {
            return Ok(Vec::new());
        }
        self.helix("users", &Self::login_query(logins)).await
    }

    /// Live streams among `logins`.
    pub async fn streams(&self, logins: &[String]) -> ProviderResult<Vec<TwitchStream>> {
        if logins.is_empty() {
            return Ok(Vec::new());
        }
        let query: Vec<(&str, &str)> = Self::login_query(logins)
            .into_iter()
            .map(|(_, login)| ("user_login", login))
            .collect();
        self.helix("streams", &query).await
    }

    pub async fn is_live(&self, login: &str) -> ProviderResult<Option<TwitchStream>> {
        let streams = self.streams(&[login.to_lowercase()]).await?;
        Ok(streams.into_iter().next())
    }

    pub async fn user(&self, login: &str) -> ProviderResult<TwitchUser> {
        self.users(&[login.to_lowercase()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::NotFound(format!("Twitch user {login}")))
    }
}
