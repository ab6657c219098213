//! Roblox public users, thumbnails and groups APIs.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use super::{ProviderError, ProviderResult};
use crate::web::HttpClient;

/// Base URLs of the Roblox API hosts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RobloxEndpoints {
    pub users: String,
    pub thumbnails: String,
    pub groups: String,
}

impl Default for RobloxEndpoints {
    fn default() -> Self {
        Self {
            users: "https://users.roblox.com".into(),
            thumbnails: "https://thumbnails.roblox.com".into(),
            groups: "https://groups.roblox.com".into(),
        }
    }
}

impl RobloxEndpoints {
    /// Every host served from one base, for tests.
    pub fn single(base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        Self {
            users: base.clone(),
            thumbnails: base.clone(),
            groups: base,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RobloxUser {
    pub id: u64,
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_banned: bool,
}

impl RobloxUser {
    pub fn profile_url(&self) -> String {
        format!("https://www.roblox.com/users/{}/profile", self.id)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RobloxGroup {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub member_count: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RobloxRole {
    pub name: String,
    #[serde(default)]
    pub rank: u32,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct GroupMembership {
    pub group: RobloxGroup,
    pub role: RobloxRole,
}

#[derive(Debug, Deserialize)]
struct DataList<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Thumbnail {
    state: String,
    image_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RobloxClient {
    http: HttpClient,
    endpoints: RobloxEndpoints,
}

impl RobloxClient {
    pub fn new(http: HttpClient) -> Self {
        Self::with_endpoints(http, RobloxEndpoints::default())
    }

    pub fn with_endpoints(http: HttpClient, endpoints: RobloxEndpoints) -> Self {
        Self { http, endpoints }
    }

    /// Resolve a username, then load the full profile.
    pub async fn user_by_username(&self, username: &str) -> ProviderResult<RobloxUser> {
        let found: DataList<RobloxUser> = self
            .http
            .post(format!("{}/v1/usernames/users", self.endpoints.users))
            .json(&json!({ "usernames": [username], "excludeBannedUsers": false }))?
            .send_json()
            .await?;
        let id = found
            .data
            .first()
            .map(|user| user.id)
            .ok_or_else(|| ProviderError::NotFound(format!("Roblox user {username}")))?;
        self.user(id).await
    }

    pub async fn user(&self, id: u64) -> ProviderResult<RobloxUser> {
        self.http
            .get(format!("{}/v1/users/{id}", self.endpoints.users))
            .send_json()
            .await
            .map_err(|err| ProviderError::from_fetch(err, format!("Roblox user {id}")))
    }

    /// Headshot image URL, `None` while Roblox is still rendering it.
    pub async fn avatar_headshot(&self, id: u64) -> ProviderResult<Option<String>> {
        let thumbnails: DataList<Thumbnail> = self
            .http
            .get(format!("{}/v1/users/avatar-headshot", self.endpoints.thumbnails))
            .query("userIds", id)
            .query("size", "420x420")
            .query("format", "Png")
            .send_json()
            .await?;
        Ok(thumbnails
            .data
            .into_iter()
            .find(|thumb| thumb.state == "Completed")
            .and_then(|thumb| thumb.image_url))
    }

    pub async fn groups(&self, id: u64) -> ProviderResult<Vec<GroupMembership>> {
        let groups: DataList<GroupMembership> = self
            .http
            .get(format!("{}/v2/users/{id}/groups/roles", self.endpoints.groups))
            .send_json()
            .await
            .map_err(|err| ProviderError::from_fetch(err, format!("Roblox user {id}")))?;
        Ok(groups.data)
    }
}
