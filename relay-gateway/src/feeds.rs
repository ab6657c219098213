//! Announces Twitch go-lives, new subreddit posts and YouTube uploads.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use relay_cache::{CacheResult, RedisStore};
use relay_core::{FeedSettings, RedditFeed, TwitchFeed, YoutubeFeed};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::discord::webhooks::{DispatchTarget, WebhookDispatcher, WebhookPayload};
use crate::providers::reddit::{RedditPost, RedditSort};
use crate::providers::twitch::TwitchStream;
use crate::providers::youtube::YoutubeVideo;
use crate::providers::{ProviderResult, Providers};

const TWITCH_COLOR: u32 = 0x91_46_FF;
const REDDIT_COLOR: u32 = 0xFF_45_00;
const YOUTUBE_COLOR: u32 = 0xFF_00_00;
const REDDIT_FETCH: u8 = 25;
const MAX_DESCRIPTION_CHARS: usize = 300;
const PRIMED_KEY: &str = "feeds:primed";
/// Ids remembered per feed; older ones are forgotten.
pub const SEEN_PER_FEED: usize = 500;

/// Most recently seen ids of one feed.
#[derive(Debug, Default)]
struct RecentIds {
    order: VecDeque<String>,
    ids: HashSet<String>,
}

impl RecentIds {
    fn insert(&mut self, id: &str, keep: usize) -> bool {
        if self.ids.contains(id) {
            if let Some(pos) = self.order.iter().position(|seen| seen == id)
                && let Some(refreshed) = self.order.remove(pos)
            {
                self.order.push_back(refreshed);
            }
            return false;
        }
        self.ids.insert(id.to_string());
        self.order.push_back(id.to_string());
        while self.order.len() > keep {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        true
    }
}

/// Item ids already announced, per feed.
pub enum SeenStore {
    Memory {
        seen: Mutex<HashMap<String, RecentIds>>,
        primed: Mutex<HashSet<String>>,
    },
    Redis(Arc<RedisStore>),
}

impl std::fmt::Debug for SeenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory { .. } => f.write_str("SeenStore::Memory"),
            Self::Redis(_) => f.write_str("SeenStore::Redis"),
        }
    }
}

impl SeenStore {
    pub fn memory() -> Self {
        Self::Memory {
            seen: Mutex::new(HashMap::new()),
            primed: Mutex::new(HashSet::new()),
        }
    }

    pub fn redis(store: Arc<RedisStore>) -> Self {
        Self::Redis(store)
    }

    /// Record `id`; true when it was not seen before.
    ///
    /// Only the latest [`SEEN_PER_FEED`] ids of a feed are kept.
    pub async fn insert(&self, feed: &str, id: &str) -> CacheResult<bool> {
        match self {
            Self::Memory { seen, .. } => Ok(seen
                .lock()
                .await
                .entry(feed.to_string())
                .or_default()
                .insert(id, SEEN_PER_FEED)),
            Self::Redis(store) => {
                store
                    .recent_add(&format!("feeds:recent:{feed}"), id, SEEN_PER_FEED)
                    .await
            }
        }
    }

    pub async fn is_primed(&self, feed: &str) -> CacheResult<bool> {
        match self {
            Self::Memory { primed, .. } => Ok(primed.lock().await.contains(feed)),
            Self::Redis(store) => store.set_contains(PRIMED_KEY, feed).await,
        }
    }

    pub async fn mark_primed(&self, feed: &str) -> CacheResult<()> {
        match self {
            Self::Memory { primed, .. } => {
                primed.lock().await.insert(feed.to_string());
                Ok(())
            }
            Self::Redis(store) => store.set_add(PRIMED_KEY, feed).await.map(|_| ()),
        }
    }
}

/// Something a feed may announce.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedItem {
    pub id: String,
    pub payload: WebhookPayload,
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

pub fn twitch_item(feed: &TwitchFeed, stream: &TwitchStream) -> FeedItem {
    let mut embed = json!({
        "title": stream.title,
        "url": stream.url(),
        "color": TWITCH_COLOR,
        "author": { "name": format!("{} is live on Twitch", stream.user_name) },
        "image": { "url": stream.thumbnail(640, 360) },
        "timestamp": stream.started_at.to_rfc3339(),
    });
    if !stream.game_name.is_empty() {
        embed["fields"] = json!([{ "name": "Playing", "value": stream.game_name, "inline": true }]);
    }
    let mut payload = WebhookPayload::default().with_embed(embed);
    payload.content = Some(
        feed.message
            .clone()
            .unwrap_or_else(|| format!("{} is now live! {}", stream.user_name, stream.url())),
    );
    FeedItem {
        // One announcement per broadcast.
        id: stream.id.clone(),
        payload,
    }
}

pub fn reddit_item(post: &RedditPost) -> FeedItem {
    let mut embed = json!({
        "title": truncate(&post.title, 256),
        "url": post.link(),
        "color": REDDIT_COLOR,
        "author": { "name": format!("New post in r/{}", post.subreddit) },
        "footer": { "text": format!("u/{}", post.author) },
    });
    if !post.selftext.is_empty() {
        embed["description"] = Value::String(truncate(&post.selftext, MAX_DESCRIPTION_CHARS));
    }
    if let Some(image) = post.image_url() {
        embed["image"] = json!({ "url": image });
    }
    FeedItem {
        id: post.id.clone(),
        payload: WebhookPayload::default().with_embed(embed),
    }
}

pub fn youtube_item(video: &YoutubeVideo) -> FeedItem {
    let mut embed = json!({
        "title": video.title,
        "url": video.url(),
        "color": YOUTUBE_COLOR,
        "author": { "name": format!("{} uploaded a new video", video.author) },
    });
    if let Some(thumbnail) = &video.thumbnail_url {
        embed["image"] = json!({ "url": thumbnail });
    }
    if let Some(published) = video.published {
        embed["timestamp"] = Value::String(published.to_rfc3339());
    }
    let mut payload = WebhookPayload::default().with_embed(embed);
    payload.content = Some(video.url());
    FeedItem {
        id: video.id.clone(),
        payload,
    }
}

/// Polls every configured feed and posts what is new.
#[derive(Debug)]
pub struct FeedWatcher {
    settings: FeedSettings,
    providers: Providers,
    dispatcher: WebhookDispatcher,
    seen: SeenStore,
}

impl FeedWatcher {
    pub fn new(
        settings: FeedSettings,
        providers: Providers,
        dispatcher: WebhookDispatcher,
        seen: SeenStore,
    ) -> Self {
        Self {
            settings,
            providers,
            dispatcher,
            seen,
        }
    }

    /// Announce unseen items, oldest first. The first poll of a feed only
    /// records what is already there.
    pub async fn process(&self, feed: &str, channel_id: u64, items: Vec<FeedItem>) -> usize {
        let primed = match self.seen.is_primed(feed).await {
            Ok(primed) => primed,
            Err(err) => {
                warn!(feed, error = %err, "Seen store unavailable, skipping feed");
                return 0;
            }
        };

        let mut announced = 0;
        for item in items.into_iter().rev() {
            match self.seen.insert(feed, &item.id).await {
                Ok(true) if primed => {
                    // Outcomes are logged by the dispatcher.
                    let _ = self
                        .dispatcher
                        .enqueue(DispatchTarget::new(channel_id, None), item.payload);
                    announced += 1;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(feed, error = %err, "Failed to record seen item");
                    return announced;
                }
            }
        }

        if !primed {
            if let Err(err) = self.seen.mark_primed(feed).await {
                warn!(feed, error = %err, "Failed to mark feed primed");
            }
            debug!(feed, "Feed primed");
        }
        announced
    }

    async fn poll_twitch(&self, feeds: &[TwitchFeed]) -> ProviderResult<usize> {
        let Some(twitch) = &self.providers.twitch else {
            return Ok(0);
        };
        let logins: Vec<String> = feeds.iter().map(|f| f.login.to_lowercase()).collect();
        let streams = twitch.streams(&logins).await?;

        let mut announced = 0;
        for feed in feeds {
            let login = feed.login.to_lowercase();
            let items: Vec<FeedItem> = streams
                .iter()
                .filter(|s| s.user_login.eq_ignore_ascii_case(&login))
                .map(|s| twitch_item(feed, s))
                .collect();
            announced += self
                .process(&format!("twitch:{login}"), feed.channel_id, items)
                .await;
        }
        Ok(announced)
    }

    async fn poll_reddit(&self, feed: &RedditFeed) -> ProviderResult<usize> {
        let sort = feed.sort.parse().unwrap_or(RedditSort::New);
        let posts = self
            .providers
            .reddit
            .posts(&feed.subreddit, sort, REDDIT_FETCH)
            .await?;
        let items = posts
            .iter()
            .filter(|post| feed.allow_nsfw || !post.over_18)
            .map(reddit_item)
            .collect();
        let key = format!("reddit:{}", feed.subreddit.to_lowercase());
        Ok(self.process(&key, feed.channel_id, items).await)
    }

    async fn poll_youtube(&self, feed: &YoutubeFeed) -> ProviderResult<usize> {
        let videos = self
            .providers
            .youtube
            .latest_videos(&feed.youtube_channel_id)
            .await?;
        let items = videos.iter().map(youtube_item).collect();
        let key = format!("youtube:{}", feed.youtube_channel_id);
        Ok(self.process(&key, feed.channel_id, items).await)
    }

    /// One pass over every feed; returns how many items were announced.
    pub async fn poll_once(&self) -> usize {
        let mut announced = 0;

        if !self.settings.twitch.is_empty() {
            match self.poll_twitch(&self.settings.twitch).await {
                Ok(count) => announced += count,
                Err(err) => warn!(error = %err, "Twitch feed poll failed"),
            }
        }
        for feed in &self.settings.reddit {
            match self.poll_reddit(feed).await {
                Ok(count) => announced += count,
                Err(err) => warn!(subreddit = %feed.subreddit, error = %err, "Reddit feed poll failed"),
            }
        }
        for feed in &self.settings.youtube {
            match self.poll_youtube(feed).await {
                Ok(count) => announced += count,
                Err(err) => warn!(channel = %feed.youtube_channel_id, error = %err, "YouTube feed poll failed"),
            }
        }

        if announced > 0 {
            info!(announced, "Feed poll announced new items");
        }
        announced
    }

    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let period = Duration::from_secs(self.settings.poll_seconds.max(1));
        info!(
            period_s = period.as_secs(),
            twitch = self.settings.twitch.len(),
            reddit = self.settings.reddit.len(),
            youtube = self.settings.youtube.len(),
            "Feed watcher started"
        );
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                self.poll_once().await;
            }
        })
    }
}
