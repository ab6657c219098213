//! API clients against mocked upstreams.

mod common;

use common::http_client;
use relay_gateway::providers::reddit::RedditSort;
use relay_gateway::providers::roblox::RobloxEndpoints;
use relay_gateway::providers::{
    GoogleSearchClient, ModerateContentClient, ProviderError, RedditClient, RobloxClient,
    TenorClient, TwitchClient, TwitterClient, YoutubeFeedClient,
};
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn token(value: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "access_token": value,
        "expires_in": 3600,
        "token_type": "bearer"
    }))
}

fn twitch(server: &MockServer) -> TwitchClient {
    TwitchClient::with_base_urls(
        http_client(0),
        "client-id",
        "client-secret",
        &format!("{}/helix", server.uri()),
        &format!("{}/oauth2", server.uri()),
    )
}

#[tokio::test]
async fn twitch_token_is_reused() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .respond_with(token("t1"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/helix/users"))
        .and(header("Client-Id", "client-id"))
        .and(header("Authorization", "Bearer t1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "id": "1", "login": "someone", "display_name": "Someone" }]
        })))
        .mount(&server)
        .await;

    let client = twitch(&server);
    assert_eq!(client.user("Someone").await.unwrap().id, "1");
    assert_eq!(client.user("someone").await.unwrap().display_name, "Someone");
}

#[tokio::test]
async fn twitch_refreshes_a_rejected_token_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(token("stale"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(token("fresh"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/helix/streams"))
        .and(header("Authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/helix/streams"))
        .and(query_param("user_login", "someone"))
        .and(header("Authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{
                "id": "900",
                "user_id": "1",
                "user_login": "someone",
                "user_name": "Someone",
                "game_name": "Factorio",
                "title": "Building",
                "viewer_count": 12,
                "started_at": "2024-01-01T00:00:00Z",
                "thumbnail_url": "https://img/{width}x{height}.jpg"
            }]
        })))
        .mount(&server)
        .await;

    let stream = twitch(&server).is_live("Someone").await.unwrap().unwrap();
    assert_eq!(stream.id, "900");
    assert_eq!(stream.viewer_count, 12);
}

fn listing() -> serde_json::Value {
    let post = |id: &str, url: &str, nsfw: bool, stickied: bool| {
        json!({ "kind": "t3", "data": {
            "id": id,
            "title": format!("post {id}"),
            "author": "someone",
            "subreddit": "pics",
            "permalink": format!("/r/pics/comments/{id}/"),
            "url": url,
            "over_18": nsfw,
            "stickied": stickied,
            "score": 10,
        }})
    };
    json!({ "kind": "Listing", "data": { "children": [
        post("a", "https://i.redd.it/a.jpg", false, true),
        post("b", "https://example.com/article", false, false),
        post("c", "https://i.redd.it/c.jpg", true, false),
        post("d", "https://i.redd.it/d.png", false, false),
    ]}})
}

#[tokio::test]
async fn reddit_listing_skips_pinned_posts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/r/pics/new.json"))
        .and(query_param("limit", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing()))
        .mount(&server)
        .await;

    let client = RedditClient::with_base_url(http_client(0), &server.uri());
    let posts = client.posts("r/pics", RedditSort::New, 10).await.unwrap();
    let ids: Vec<_> = posts.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["b", "c", "d"]);
}

#[tokio::test]
async fn reddit_random_image_respects_nsfw() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/r/pics/hot.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing()))
        .mount(&server)
        .await;

    let client = RedditClient::with_base_url(http_client(0), &server.uri());
    for _ in 0..10 {
        let post = client.random_image("pics", false).await.unwrap();
        assert_eq!(post.id, "d");
    }
}

#[tokio::test]
async fn reddit_missing_subreddit_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = RedditClient::with_base_url(http_client(0), &server.uri());
    let err = client.posts("nothere", RedditSort::Hot, 5).await.unwrap_err();
    assert!(matches!(err, ProviderError::NotFound(_)));
}

#[tokio::test]
async fn youtube_feed_is_parsed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("channel_id", "UC123"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<feed xmlns:yt="http://www.youtube.com/xml/schemas/2015">
<entry><yt:videoId>v1</yt:videoId><title>First</title><author><name>Chan</name></author></entry>
</feed>"#,
        ))
        .mount(&server)
        .await;

    let client = YoutubeFeedClient::with_base_url(http_client(0), &server.uri());
    let videos = client.latest_videos("UC123").await.unwrap();
    assert_eq!(videos.len(), 1);
    assert_eq!(videos[0].title, "First");
    assert_eq!(videos[0].author, "Chan");
}

#[tokio::test]
async fn google_search_sends_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("key", "api-key"))
        .and(query_param("cx", "engine"))
        .and(query_param("q", "rust lang"))
        .and(query_param("safe", "active"))
        .and(query_param("searchType", "image"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{
                "title": "Ferris",
                "link": "https://img/ferris.png",
                "displayLink": "img",
                "image": { "contextLink": "https://rustacean.net" }
            }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let client = GoogleSearchClient::with_base_url(http_client(0), "api-key", "engine", &server.uri());
    let images = client.image_search("rust lang", 3, true).await.unwrap();
    assert_eq!(images[0].link, "https://img/ferris.png");
    assert_eq!(
        images[0].image.as_ref().and_then(|i| i.context_link.as_deref()),
        Some("https://rustacean.net")
    );

    // No `items` key means no results.
    assert!(client.search("nothing", 3, true).await.unwrap().is_empty());
}

#[tokio::test]
async fn twitter_missing_user_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/by/username/ghost"))
        .and(header("Authorization", "Bearer token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errors": [{ "detail": "Could not find user with username: [ghost]." }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/by/username/rustlang"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "id": "7", "name": "Rust", "username": "rustlang" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/7/tweets"))
        .and(query_param("max_results", "5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "id": "99", "text": "Rust 2.0?", "created_at": "2024-05-01T10:00:00Z" }]
        })))
        .mount(&server)
        .await;

    let client = TwitterClient::with_base_url(http_client(0), "token", &server.uri());
    let err = client.user_by_username("@ghost").await.unwrap_err();
    assert!(matches!(err, ProviderError::NotFound(_)));

    let user = client.user_by_username("rustlang").await.unwrap();
    let tweets = client.recent_tweets(&user.id, 1).await.unwrap();
    assert_eq!(tweets[0].url(&user.username), "https://twitter.com/rustlang/status/99");
}

#[tokio::test]
async fn tenor_random_picks_a_gif() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("q", "cats"))
        .and(query_param("random", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{
                "id": "1",
                "content_description": "cat",
                "media_formats": { "gif": { "url": "https://media/cat.gif" } }
            }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [] })))
        .mount(&server)
        .await;

    let client = TenorClient::with_base_url(http_client(0), "key", &server.uri());
    let gif = client.random("cats").await.unwrap();
    assert_eq!(gif.gif_url(), Some("https://media/cat.gif"));

    let err = client.random("nothing").await.unwrap_err();
    assert!(matches!(err, ProviderError::NotFound(_)));
}

#[tokio::test]
async fn moderation_rating_and_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("url", "https://img/adult.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error_code": 0,
            "rating_index": 3,
            "rating_letter": "a",
            "predictions": { "teen": 5.0, "everyone": 1.0, "adult": 94.0 }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error_code": 1001,
            "error": "Invalid key"
        })))
        .mount(&server)
        .await;

    let client = ModerateContentClient::with_base_url(http_client(0), "key", &server.uri());
    let rating = client.rate_image("https://img/adult.jpg").await.unwrap();
    assert!(rating.is_adult());
    assert_eq!(rating.rating_letter, "a");

    let err = client.rate_image("https://img/other.jpg").await.unwrap_err();
    assert!(matches!(err, ProviderError::Unexpected(message) if message == "Invalid key"));
}

#[tokio::test]
async fn roblox_lookup_resolves_username() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/usernames/users"))
        .and(body_string_contains("builderman"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "id": 156, "name": "builderman", "displayName": "builderman" }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/users/156"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 156,
            "name": "builderman",
            "displayName": "Builder",
            "description": "Hi",
            "created": "2006-02-27T21:06:40.3Z",
            "isBanned": false
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/users/avatar-headshot"))
        .and(query_param("userIds", "156"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "targetId": 156, "state": "Completed", "imageUrl": "https://tr.rbxcdn.com/x.png" }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/users/156/groups/roles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{
                "group": { "id": 1, "name": "Builders", "memberCount": 10 },
                "role": { "name": "Owner", "rank": 255 }
            }]
        })))
        .mount(&server)
        .await;

    let client = RobloxClient::with_endpoints(http_client(0), RobloxEndpoints::single(&server.uri()));
    let user = client.user_by_username("builderman").await.unwrap();
    assert_eq!(user.display_name, "Builder");
    assert!(user.created.is_some());
    assert_eq!(
        client.avatar_headshot(user.id).await.unwrap().as_deref(),
        Some("https://tr.rbxcdn.com/x.png")
    );
    let groups = client.groups(user.id).await.unwrap();
    assert_eq!(groups[0].role.rank, 255);
}

#[tokio::test]
async fn roblox_unknown_username_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
        .mount(&server)
        .await;

    let client = RobloxClient::with_endpoints(http_client(0), RobloxEndpoints::single(&server.uri()));
    let err = client.user_by_username("nobody").await.unwrap_err();
    assert!(matches!(err, ProviderError::NotFound(_)));
}
