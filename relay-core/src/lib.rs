//! relay-core: configuration and shared result types for the relay bot.

pub mod config;
pub mod outcome;

pub use config::{
    AutomodSettings, BridgeLink, BridgeSettings, Config, ConfigError, CronJobSettings,
    CronSettings, DiscordSettings, FeedSettings, HttpSettings, LoggingSettings, PurgerSettings,
    RedditFeed, RedisSettings, Secrets, SecretsError, Settings, SettingsError, TicketSettings,
    TwitchFeed, WebhookSettings, YoutubeFeed, load_dotenv,
};
pub use outcome::Outcome;
