//! Reddit public JSON listings.

use std::fmt;
use std::str::FromStr;

use rand::seq::SliceRandom;
use serde::Deserialize;

use super::{ProviderError, ProviderResult};
use crate::web::HttpClient;

pub const API_BASE: &str = "https://www.reddit.com";

/// Reddit returns at most this many posts per listing page.
const MAX_LISTING: u8 = 100;
const IMAGE_EXTENSIONS: [&str; 5] = [".jpg", ".jpeg", ".png", ".gif", ".webp"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedditSort {
    #[default]
    Hot,
    New,
    Top,
    Rising,
}

impl RedditSort {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hot => "hot",
            Self::New => "new",
            Self::Top => "top",
            Self::Rising => "rising",
        }
    }
}

impl fmt::Display for RedditSort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RedditSort {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hot" => Ok(Self::Hot),
            "new" => Ok(Self::New),
            "top" => Ok(Self::Top),
            "rising" => Ok(Self::Rising),
            other => Err(ProviderError::Unexpected(format!(
                "unknown reddit sort '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RedditPost {
    pub id: String,
    pub title: String,
    pub author: String,
    pub subreddit: String,
    pub permalink: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub over_18: bool,
    #[serde(default)]
    pub stickied: bool,
    #[serde(default)]
    pub post_hint: Option<String>,
    #[serde(default)]
    pub selftext: String,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub num_comments: u64,
    #[serde(default)]
    pub created_utc: f64,
}

impl RedditPost {
    pub fn link(&self) -> String {
        format!("https://www.reddit.com{}", self.permalink)
    }

    /// Direct image link, if the post is one.
    pub fn image_url(&self) -> Option<&str> {
        let lower = self.url.to_ascii_lowercase();
        let path = lower.split(['?', '#']).next().unwrap_or_default();
        let is_image = self.post_hint.as_deref() == Some("image")
            || IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext));
        is_image.then_some(self.url.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
struct Child {
    data: RedditPost,
}

/// Subreddit names are 2-21 characters of letters, digits and underscores.
pub fn is_valid_subreddit(name: &str) -> bool {
    (2..=21).contains(&name.len())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn normalize_subreddit(name: &str) -> ProviderResult<&str> {
    let name = name.trim();
    let name = name
        .strip_prefix("/r/")
        .or_else(|| name.strip_prefix("r/"))
        .unwrap_or(name);
    if is_valid_subreddit(name) {
        Ok(name)
    } else {
        Err(ProviderError::NotFound(format!("subreddit '{name}'")))
    }
}

#[derive(Debug, Clone)]
pub struct RedditClient {
    http: HttpClient,
    base: String,
}

impl RedditClient {
    pub fn new(http: HttpClient) -> Self {
        Self::with_base_url(http, API_BASE)
    }

    pub fn with_base_url(http: HttpClient, base: &str) -> Self {
        Self {
            http,
            base: base.trim_end_matches('/').to_string(),
        }
    }

    async fn listing(
        &self,
        subreddit: &str,
        sort: RedditSort,
        limit: u8,
        cached: bool,
    ) -> ProviderResult<Vec<RedditPost>> {
        let subreddit = normalize_subreddit(subreddit)?;
        let mut request = self
            .http
            .get(format!("{}/r/{subreddit}/{sort}.json", self.base))
            .query("limit", limit.clamp(1, MAX_LISTING))
            .query("raw_json", 1);
        if !cached {
            request = request.no_cache();
        }
        let listing: Listing = request
            .send_json()
            .await
            .map_err(|err| ProviderError::from_fetch(err, format!("r/{subreddit}")))?;

        Ok(listing
            .data
            .children
            .into_iter()
            .map(|child| child.data)
            .filter(|post| !post.stickied)
            .collect())
    }

    /// Current posts from a subreddit listing, pinned posts excluded.
    pub async fn posts(
        &self,
        subreddit: &str,
        sort: RedditSort,
        limit: u8,
    ) -> ProviderResult<Vec<RedditPost>> {
        self.listing(subreddit, sort, limit, false).await
    }

    /// A random image post from the subreddit's hot listing.
    pub async fn random_image(
        &self,
        subreddit: &str,
        allow_nsfw: bool,
    ) -> ProviderResult<RedditPost> {
        let posts = self
            .listing(subreddit, RedditSort::Hot, MAX_LISTING, true)
            .await?;
        let images: Vec<RedditPost> = posts
            .into_iter()
            .filter(|post| allow_nsfw || !post.over_18)
            .filter(|post| post.image_url().is_some())
            .collect();
        images
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(format!("images in r/{subreddit}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(url: &str, hint: Option<&str>) -> RedditPost {
        RedditPost {
            id: "abc".into(),
            title: "t".into(),
            author: "a".into(),
            subreddit: "rust".into(),
            permalink: "/r/rust/comments/abc/t/".into(),
            url: url.into(),
            over_18: false,
            stickied: false,
            post_hint: hint.map(str::to_string),
            selftext: String::new(),
            score: 0,
            num_comments: 0,
            created_utc: 0.0,
        }
    }

    #[test]
    fn image_detection() {
        assert!(post("https://i.redd.it/x.PNG", None).image_url().is_some());
        assert!(post("https://i.imgur.com/x.gif?x=1", None).image_url().is_some());
        assert!(post("https://example.com/page", Some("image")).image_url().is_some());
        assert!(post("https://example.com/page", Some("link")).image_url().is_none());
    }

    #[test]
    fn subreddit_names() {
        assert_eq!(normalize_subreddit("r/rust").unwrap(), "rust");
        assert_eq!(normalize_subreddit(" /r/rust_gamedev ").unwrap(), "rust_gamedev");
        assert!(normalize_subreddit("a").is_err());
        assert!(normalize_subreddit("../etc").is_err());
    }

    #[test]
    fn sort_parses() {
        assert_eq!("NEW".parse::<RedditSort>().unwrap(), RedditSort::New);
        assert!("best".parse::<RedditSort>().is_err());
        assert_eq!(RedditSort::Rising.to_string(), "rising");
    }

    #[test]
    fn permalink_becomes_link() {
        assert_eq!(
            post("", None).link(),
            "https://www.reddit.com/r/rust/comments/abc/t/"
        );
    }
}
