//! Feed watcher: priming, dedupe and announcement through the dispatcher.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FakeTransport, http_client};
use relay_core::{FeedSettings, RedditFeed, WebhookSettings};
use relay_gateway::Providers;
use relay_gateway::discord::webhooks::{ChannelKind, WebhookDispatcher, WebhookPayload};
use relay_gateway::feeds::{FeedItem, FeedWatcher, SeenStore};
use relay_gateway::providers::{RedditClient, RobloxClient, YoutubeFeedClient};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CHANNEL: u64 = 10;

fn providers(base: &str) -> Providers {
    let http = http_client(0);
    Providers {
        reddit: RedditClient::with_base_url(http.clone(), base),
        youtube: YoutubeFeedClient::with_base_url(http.clone(), base),
        roblox: RobloxClient::new(http),
        twitch: None,
        google: None,
        twitter: None,
        tenor: None,
        moderation: None,
    }
}

fn watcher(transport: &Arc<FakeTransport>, base: &str, settings: FeedSettings) -> FeedWatcher {
    let dispatcher = WebhookDispatcher::new(
        transport.clone(),
        &WebhookSettings {
            batch_window_ms: 0,
            ..WebhookSettings::default()
        },
    );
    FeedWatcher::new(settings, providers(base), dispatcher, SeenStore::memory())
}

async fn wait_for_sends(transport: &FakeTransport, expected: usize) {
    for _ in 0..100 {
        if transport.executed().len() >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {expected} sends, got {}", transport.executed().len());
}

fn item(id: &str) -> FeedItem {
    FeedItem {
        id: id.to_string(),
        // Distinct identities keep the dispatcher from merging items.
        payload: WebhookPayload::text(format!("item {id}")).with_username(id),
    }
}

#[tokio::test]
async fn first_pass_only_primes() {
    let transport = Arc::new(FakeTransport::new().with_channel(CHANNEL, ChannelKind::Text));
    let watcher = watcher(&transport, "http://127.0.0.1:9", FeedSettings::default());

    assert_eq!(watcher.process("test", CHANNEL, vec![item("b"), item("a")]).await, 0);
    // Newest first, as listings come back.
    let announced = watcher
        .process("test", CHANNEL, vec![item("d"), item("c"), item("b"), item("a")])
        .await;
    assert_eq!(announced, 2);

    wait_for_sends(&transport, 2).await;
    assert_eq!(transport.contents(), vec!["item c", "item d"]);

    assert_eq!(watcher.process("test", CHANNEL, vec![item("d")]).await, 0);
}

fn listing(ids: &[&str]) -> serde_json::Value {
    let children: Vec<_> = ids
        .iter()
        .map(|id| {
            json!({ "kind": "t3", "data": {
                "id": id,
                "title": format!("post {id}"),
                "author": "someone",
                "subreddit": "rust",
                "permalink": format!("/r/rust/comments/{id}/"),
                "url": format!("https://www.reddit.com/r/rust/comments/{id}/"),
            }})
        })
        .collect();
    json!({ "kind": "Listing", "data": { "children": children } })
}

#[tokio::test]
async fn reddit_feed_announces_new_posts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/r/rust/new.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(&["b", "a"])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/r/rust/new.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(&["c", "b", "a"])))
        .mount(&server)
        .await;

    let settings = FeedSettings {
        reddit: vec![RedditFeed {
            subreddit: "rust".into(),
            channel_id: CHANNEL,
            sort: "new".into(),
            allow_nsfw: false,
        }],
        ..FeedSettings::default()
    };
    let transport = Arc::new(FakeTransport::new().with_channel(CHANNEL, ChannelKind::Text));
    let watcher = watcher(&transport, &server.uri(), settings);

    assert_eq!(watcher.poll_once().await, 0);
    assert_eq!(watcher.poll_once().await, 1);

    wait_for_sends(&transport, 1).await;
    let sent = transport.executed();
    assert_eq!(sent[0].payload.embeds[0]["title"], "post c");
    assert_eq!(
        sent[0].payload.embeds[0]["url"],
        "https://www.reddit.com/r/rust/comments/c/"
    );
}

#[tokio::test]
async fn failing_feed_does_not_stop_the_others() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/r/broken/new.json"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/r/rust/new.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(&["a"])))
        .mount(&server)
        .await;

    let feed = |subreddit: &str| RedditFeed {
        subreddit: subreddit.into(),
        channel_id: CHANNEL,
        sort: "new".into(),
        allow_nsfw: false,
    };
    let settings = FeedSettings {
        reddit: vec![feed("broken"), feed("rust")],
        ..FeedSettings::default()
    };
    let transport = Arc::new(FakeTransport::new().with_channel(CHANNEL, ChannelKind::Text));
    let watcher = watcher(&transport, &server.uri(), settings);

    assert_eq!(watcher.poll_once().await, 0);
    let requests = server.received_requests().await.unwrap_or_default();
    assert!(requests.iter().any(|r| r.url.path() == "/r/rust/new.json"));
}
