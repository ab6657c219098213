//! Thin clients for the third-party APIs the bot talks to.
//!
//! Every client takes the shared [`HttpClient`] and a base URL that tests
//! point at a mock server.

pub mod google;
pub mod moderation;
pub mod reddit;
pub mod roblox;
pub mod tenor;
pub mod twitch;
pub mod twitter;
pub mod youtube;

use relay_core::Config;
use tracing::info;

use crate::web::{FetchError, HttpClient};

pub use google::GoogleSearchClient;
pub use moderation::ModerateContentClient;
pub use reddit::RedditClient;
pub use roblox::RobloxClient;
pub use tenor::TenorClient;
pub use twitch::TwitchClient;
pub use twitter::TwitterClient;
pub use youtube::YoutubeFeedClient;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{0} is not configured")]
    MissingCredentials(&'static str),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unexpected response: {0}")]
    Unexpected(String),
}

impl ProviderError {
    /// Map 404s to [`ProviderError::NotFound`].
    pub(crate) fn from_fetch(err: FetchError, what: impl Into<String>) -> Self {
        match err.status() {
            Some(404) => Self::NotFound(what.into()),
            _ => Self::Fetch(err),
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// The clients whose credentials are present.
#[derive(Debug, Clone)]
pub struct Providers {
    pub reddit: RedditClient,
    pub youtube: YoutubeFeedClient,
    pub roblox: RobloxClient,
    pub twitch: Option<TwitchClient>,
    pub google: Option<GoogleSearchClient>,
    pub twitter: Option<TwitterClient>,
    pub tenor: Option<TenorClient>,
    pub moderation: Option<ModerateContentClient>,
}

impl Providers {
    pub fn from_config(http: &HttpClient, config: &Config) -> Self {
        let secrets = &config.secrets;

        let twitch = match (&secrets.twitch_client_id, &secrets.twitch_client_secret) {
            (Some(id), Some(secret)) => Some(TwitchClient::new(http.clone(), id, secret)),
            _ => None,
        };
        let google = match (&secrets.google_api_key, &secrets.google_cse_id) {
            (Some(key), Some(cx)) => Some(GoogleSearchClient::new(http.clone(), key, cx)),
            _ => None,
        };

        let providers = Self {
            reddit: RedditClient::new(http.clone()),
            youtube: YoutubeFeedClient::new(http.clone()),
            roblox: RobloxClient::new(http.clone()),
            twitch,
            google,
            twitter: secrets
                .twitter_bearer_token
                .as_deref()
                .map(|token| TwitterClient::new(http.clone(), token)),
            tenor: secrets
                .tenor_api_key
                .as_deref()
                .map(|key| TenorClient::new(http.clone(), key)),
            moderation: secrets
                .moderatecontent_api_key
                .as_deref()
                .map(|key| ModerateContentClient::new(http.clone(), key)),
        };

        info!(
            twitch = providers.twitch.is_some(),
            google = providers.google.is_some(),
            twitter = providers.twitter.is_some(),
            tenor = providers.tenor.is_some(),
            moderation = providers.moderation.is_some(),
            "API clients initialized"
        );
        providers
    }
}
