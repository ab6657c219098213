//! Configuration management for relay.
//!
//! Secrets come from environment variables, everything else from a TOML
//! settings file.
//!
//! # Configuration Sources
//!
//! ## Secrets (Environment Variables)
//! - `DISCORD_BOT_TOKEN` - Discord bot token
//! - `TWITCH_CLIENT_ID` / `TWITCH_CLIENT_SECRET` - Twitch app credentials
//! - `GOOGLE_API_KEY` / `GOOGLE_CSE_ID` - Google Custom Search
//! - `TWITTER_BEARER_TOKEN` - Twitter v2 app-only token
//! - `TENOR_API_KEY` - Tenor GIF search
//! - `MODERATECONTENT_API_KEY` - ModerateContent image rating
//! - `REDIS_URL` - optional Redis store for feed state
//!
//! ## Settings (TOML File)
//! Located at `~/.config/relay/config.toml`:
//! ```toml
//! [discord]
//! enabled = true
//!
//! [webhooks]
//! name = "Relay"
//! batch_window_ms = 250
//!
//! [[bridge.links]]
//! from = 111111111111111111
//! to = 222222222222222222
//! bidirectional = true
//! ```

mod secrets;
mod settings;

pub use secrets::{Secrets, SecretsError};
pub use settings::{
    AutomodSettings, BridgeLink, BridgeSettings, CronJobSettings, CronSettings, DiscordSettings,
    FeedSettings, HttpSettings, LoggingSettings, PurgerSettings, RedditFeed, RedisSettings,
    Settings, SettingsError, TicketSettings, TwitchFeed, WebhookSettings, YoutubeFeed,
};

/// Combined configuration containing both secrets and settings.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Secrets loaded from environment variables
    pub secrets: Secrets,
    /// Settings loaded from TOML configuration file
    pub settings: Settings,
}

/// Errors that can occur when loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Secrets error: {0}")]
    Secrets(#[from] SecretsError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Discord is enabled but DISCORD_BOT_TOKEN is not set")]
    MissingDiscordToken,

    #[error("Bridge link {0} -> {0} points a channel at itself")]
    SelfBridge(u64),

    #[error("Twitch feeds are configured but TWITCH_CLIENT_ID/TWITCH_CLIENT_SECRET are missing")]
    MissingTwitchCredentials,
}

impl Config {
    /// Load configuration from all sources and validate it.
    pub fn load() -> Result<Self, ConfigError> {
        let secrets = Secrets::from_env()?;
        let settings = Settings::load()?;
        let config = Self { secrets, settings };
        config.validate()?;
        Ok(config)
    }

    /// Cross-check settings against the secrets that are available.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.settings.discord.enabled && self.secrets.discord_bot_token.is_none() {
            return Err(ConfigError::MissingDiscordToken);
        }

        if let Some(link) = self
            .settings
            .bridge
            .links
            .iter()
            .find(|link| link.from == link.to)
        {
            return Err(ConfigError::SelfBridge(link.from));
        }

        if !self.settings.feeds.twitch.is_empty() && !self.secrets.has_twitch() {
            return Err(ConfigError::MissingTwitchCredentials);
        }

        Ok(())
    }

    /// Get the Discord bot token (if configured).
    pub fn discord_bot_token(&self) -> Option<&str> {
        self.secrets.discord_bot_token.as_deref()
    }

    /// Check if Discord bot is enabled and has a token.
    pub fn discord_enabled(&self) -> bool {
        self.settings.discord.enabled && self.secrets.discord_bot_token.is_some()
    }

    /// Redis URL, if feed state should survive restarts.
    pub fn redis_url(&self) -> Option<&str> {
        self.secrets.redis_url.as_deref()
    }
}

/// Load .env file if it exists (for development convenience).
pub fn load_dotenv() {
    let _ = dotenvy::dotenv();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secrets_with_token() -> Secrets {
        Secrets {
            discord_bot_token: Some("token".to_string()),
            ..Secrets::default()
        }
    }

    #[test]
    fn test_discord_enabled() {
        let mut settings = Settings::default();
        settings.discord.enabled = false;
        let config = Config {
            secrets: secrets_with_token(),
            settings: settings.clone(),
        };
        assert!(!config.discord_enabled());

        settings.discord.enabled = true;
        let config = Config {
            secrets: secrets_with_token(),
            settings,
        };
        assert!(config.discord_enabled());
        assert_eq!(config.discord_bot_token(), Some("token"));
    }

    #[test]
    fn test_validate_requires_token_when_enabled() {
        let mut settings = Settings::default();
        settings.discord.enabled = true;
        let config = Config {
            secrets: Secrets::default(),
            settings,
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingDiscordToken)
        ));
    }

    #[test]
    fn test_validate_rejects_self_bridge() {
        let mut settings = Settings::default();
        settings.discord.enabled = false;
        settings.bridge.links.push(BridgeLink {
            from: 42,
            to: 42,
            bidirectional: false,
        });
        let config = Config {
            secrets: Secrets::default(),
            settings,
        };
        assert!(matches!(config.validate(), Err(ConfigError::SelfBridge(42))));
    }

    #[test]
    fn test_validate_twitch_feeds_need_credentials() {
        let mut settings = Settings::default();
        settings.discord.enabled = false;
        settings.feeds.twitch.push(TwitchFeed {
            login: "somestreamer".to_string(),
            channel_id: 1,
            message: None,
        });
        let config = Config {
            secrets: Secrets::default(),
            settings: settings.clone(),
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingTwitchCredentials)
        ));

        let config = Config {
            secrets: Secrets {
                twitch_client_id: Some("id".to_string()),
                twitch_client_secret: Some("secret".to_string()),
                ..Secrets::default()
            },
            settings,
        };
        assert!(config.validate().is_ok());
    }
}
