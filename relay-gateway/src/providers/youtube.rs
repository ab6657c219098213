//! Channel uploads from YouTube's public Atom feed.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use super::{ProviderError, ProviderResult};
use crate::web::HttpClient;

pub const FEED_BASE: &str = "https://www.youtube.com/feeds/videos.xml";

static ENTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<entry>(.*?)</entry>").expect("static regex"));
static VIDEO_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<yt:videoId>([^<]+)</yt:videoId>").expect("static regex"));
static TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<title>(.*?)</title>").expect("static regex"));
static AUTHOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<author>\s*<name>(.*?)</name>").expect("static regex")
});
static PUBLISHED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<published>([^<]+)</published>").expect("static regex"));
static THUMBNAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<media:thumbnail url="([^"]+)""#).expect("static regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YoutubeVideo {
    pub id: String,
    pub title: String,
    pub author: String,
    pub published: Option<DateTime<Utc>>,
    pub thumbnail_url: Option<String>,
}

impl YoutubeVideo {
    pub fn url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.id)
    }
}

fn capture(re: &Regex, haystack: &str) -> Option<String> {
    re.captures(haystack)
        .and_then(|caps| caps.get(1))
        .map(|m| unescape(m.as_str().trim()))
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Videos in feed order (newest first). Entries without an id are skipped.
pub fn parse_feed(xml: &str) -> Vec<YoutubeVideo> {
    ENTRY
        .captures_iter(xml)
        .filter_map(|caps| {
            let entry = caps.get(1)?.as_str();
            Some(YoutubeVideo {
                id: capture(&VIDEO_ID, entry)?,
                title: capture(&TITLE, entry).unwrap_or_default(),
                author: capture(&AUTHOR, entry).unwrap_or_default(),
                published: capture(&PUBLISHED, entry)
                    .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
                    .map(|at| at.with_timezone(&Utc)),
                thumbnail_url: capture(&THUMBNAIL, entry),
            })
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct YoutubeFeedClient {
    http: HttpClient,
    base: String,
}

impl YoutubeFeedClient {
    pub fn new(http: HttpClient) -> Self {
        Self::with_base_url(http, FEED_BASE)
    }

    pub fn with_base_url(http: HttpClient, base: &str) -> Self {
        Self {
            http,
            base: base.to_string(),
        }
    }

    pub async fn latest_videos(&self, channel_id: &str) -> ProviderResult<Vec<YoutubeVideo>> {
        let response = self
            .http
            .get(&self.base)
            .query("channel_id", channel_id)
            .no_cache()
            .send()
            .await?;
        let response = response
            .error_for_status()
            .map_err(|err| ProviderError::from_fetch(err, format!("YouTube channel {channel_id}")))?;

        let body = response.text();
        if !body.contains("<feed") {
            return Err(ProviderError::Unexpected(
                "YouTube response is not an Atom feed".into(),
            ));
        }
        Ok(parse_feed(&body))
    }
}
