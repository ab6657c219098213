//! Settings configuration loaded from TOML files.
//!
//! Non-sensitive configuration lives in the XDG config directory
//! (`~/.config/relay/config.toml`). Discord ids are plain integers.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default TOML configuration file content
const DEFAULT_CONFIG_TOML: &str = r#"# relay configuration file
# Located at: ~/.config/relay/config.toml
#
# Secrets (tokens, API keys) are loaded from environment variables:
#   - DISCORD_BOT_TOKEN
#   - TWITCH_CLIENT_ID / TWITCH_CLIENT_SECRET
#   - GOOGLE_API_KEY / GOOGLE_CSE_ID
#   - TWITTER_BEARER_TOKEN
#   - TENOR_API_KEY
#   - MODERATECONTENT_API_KEY
#   - REDIS_URL (optional, persists feed state)

[discord]
enabled = true
command_cooldown_seconds = 3

[logging]
level = "info"

[http]
user_agent = "relay-bot/0.1"
timeout_seconds = 30
max_retries = 3
cache_ttl_seconds = 60

[webhooks]
name = "Relay"
# avatar_url = "https://example.com/avatar.png"
batch_window_ms = 250
denied_ttl_seconds = 600
disabled_guilds = []

[bridge]
show_guild = false
reupload_max_bytes = 8388608
# [[bridge.links]]
# from = 111111111111111111
# to = 222222222222222222
# bidirectional = true

[tickets]
enabled = false
name_prefix = "ticket"
# category_id = 333333333333333333
# staff_role_id = 444444444444444444
# log_channel_id = 555555555555555555

[automod]
enabled = true
notify_owner = true
notify_user_ids = []
dedupe_seconds = 10

[purger]
max_messages = 1000

[feeds]
poll_seconds = 300
# [[feeds.twitch]]
# login = "somestreamer"
# channel_id = 666666666666666666
#
# [[feeds.reddit]]
# subreddit = "rust"
# channel_id = 666666666666666666
# sort = "new"
#
# [[feeds.youtube]]
# youtube_channel_id = "UCaYhcUwRBNscFNUKTjgPFiA"
# channel_id = 666666666666666666

[cron]
check_seconds = 1
# [[cron.jobs]]
# name = "daily-reminder"
# schedule = "0 9 * * *"
# channel_id = 666666666666666666
# content = "Good morning!"

[redis]
key_prefix = "relay:"
"#;

/// Settings loaded from TOML configuration file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    /// Discord bot configuration
    #[serde(default)]
    pub discord: DiscordSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingSettings,

    /// Shared HTTP client configuration
    #[serde(default)]
    pub http: HttpSettings,

    /// Webhook dispatch queue configuration
    #[serde(default)]
    pub webhooks: WebhookSettings,

    /// Channel bridge configuration
    #[serde(default)]
    pub bridge: BridgeSettings,

    /// Support ticket configuration
    #[serde(default)]
    pub tickets: TicketSettings,

    /// AutoMod relay configuration
    #[serde(default)]
    pub automod: AutomodSettings,

    /// Bulk delete limits
    #[serde(default)]
    pub purger: PurgerSettings,

    /// Feed watchers (Twitch, Reddit, YouTube)
    #[serde(default)]
    pub feeds: FeedSettings,

    /// Scheduled message jobs
    #[serde(default)]
    pub cron: CronSettings,

    /// Redis key layout
    #[serde(default)]
    pub redis: RedisSettings,
}

/// Discord bot settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscordSettings {
    /// Whether the Discord bot is enabled
    #[serde(default)]
    pub enabled: bool,

    /// Per-user cooldown between slash commands
    #[serde(default = "default_command_cooldown_seconds")]
    pub command_cooldown_seconds: u64,
}

impl Default for DiscordSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            command_cooldown_seconds: default_command_cooldown_seconds(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingSettings {
    /// Log level (error, warn, info, debug, trace); `RUST_LOG` wins when set
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Shared HTTP client settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpSettings {
    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "default_http_timeout_seconds")]
    pub timeout_seconds: u64,

    /// How many times a rate-limited or dropped request is retried
    #[serde(default = "default_http_max_retries")]
    pub max_retries: u32,

    /// TTL of the GET response cache; 0 disables it
    #[serde(default = "default_http_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_seconds: default_http_timeout_seconds(),
            max_retries: default_http_max_retries(),
            cache_ttl_seconds: default_http_cache_ttl_seconds(),
        }
    }
}

/// Webhook dispatch settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebhookSettings {
    /// Name of the webhooks the bot creates and reuses
    #[serde(default = "default_webhook_name")]
    pub name: String,

    /// Avatar of created webhooks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,

    /// How long a worker waits for more messages before sending a batch
    #[serde(default = "default_batch_window_ms")]
    pub batch_window_ms: u64,

    /// How long a channel with missing permissions is skipped
    #[serde(default = "default_denied_ttl_seconds")]
    pub denied_ttl_seconds: u64,

    /// Guilds where webhook sends are disabled
    #[serde(default)]
    pub disabled_guilds: Vec<u64>,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            name: default_webhook_name(),
            avatar_url: None,
            batch_window_ms: default_batch_window_ms(),
            denied_ttl_seconds: default_denied_ttl_seconds(),
            disabled_guilds: Vec::new(),
        }
    }
}

/// Bridge settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BridgeSettings {
    /// Append the source guild name to bridged usernames
    #[serde(default)]
    pub show_guild: bool,

    /// Attachments up to this size are re-uploaded instead of linked
    #[serde(default = "default_reupload_max_bytes")]
    pub reupload_max_bytes: u64,

    /// Channel links
    #[serde(default)]
    pub links: Vec<BridgeLink>,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            show_guild: false,
            reupload_max_bytes: default_reupload_max_bytes(),
            links: Vec::new(),
        }
    }
}

/// A single bridge between two channels
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BridgeLink {
    pub from: u64,
    pub to: u64,
    #[serde(default)]
    pub bidirectional: bool,
}

/// Ticket settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TicketSettings {
    #[serde(default)]
    pub enabled: bool,

    /// Category new ticket channels are created under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<u64>,

    /// Role that can see and close every ticket
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staff_role_id: Option<u64>,

    /// Channel receiving transcripts of closed tickets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_channel_id: Option<u64>,

    /// Ticket channel name prefix
    #[serde(default = "default_ticket_prefix")]
    pub name_prefix: String,
}

impl Default for TicketSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            category_id: None,
            staff_role_id: None,
            log_channel_id: None,
            name_prefix: default_ticket_prefix(),
        }
    }
}

/// AutoMod relay settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AutomodSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// DM the guild owner when no explicit recipients are configured
    #[serde(default = "default_true")]
    pub notify_owner: bool,

    /// Users receiving AutoMod DMs
    #[serde(default)]
    pub notify_user_ids: Vec<u64>,

    /// Window in which repeated events for the same hit are dropped
    #[serde(default = "default_dedupe_seconds")]
    pub dedupe_seconds: u64,
}

impl Default for AutomodSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            notify_owner: true,
            notify_user_ids: Vec::new(),
            dedupe_seconds: default_dedupe_seconds(),
        }
    }
}

/// Purger settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PurgerSettings {
    /// Upper bound on messages scanned by a single purge
    #[serde(default = "default_purge_max_messages")]
    pub max_messages: u16,
}

impl Default for PurgerSettings {
    fn default() -> Self {
        Self {
            max_messages: default_purge_max_messages(),
        }
    }
}

/// Feed watcher settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedSettings {
    /// Seconds between polls
    #[serde(default = "default_poll_seconds")]
    pub poll_seconds: u64,

    #[serde(default)]
    pub twitch: Vec<TwitchFeed>,

    #[serde(default)]
    pub reddit: Vec<RedditFeed>,

    #[serde(default)]
    pub youtube: Vec<YoutubeFeed>,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            poll_seconds: default_poll_seconds(),
            twitch: Vec::new(),
            reddit: Vec::new(),
            youtube: Vec::new(),
        }
    }
}

impl FeedSettings {
    /// Whether any feed is configured at all.
    pub fn is_empty(&self) -> bool {
        self.twitch.is_empty() && self.reddit.is_empty() && self.youtube.is_empty()
    }
}

/// Twitch go-live announcement
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TwitchFeed {
    pub login: String,
    pub channel_id: u64,
    /// Optional text posted above the embed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Subreddit new-post announcement
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedditFeed {
    pub subreddit: String,
    pub channel_id: u64,
    #[serde(default = "default_reddit_sort")]
    pub sort: String,
    #[serde(default)]
    pub allow_nsfw: bool,
}

/// YouTube upload announcement
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct YoutubeFeed {
    pub youtube_channel_id: String,
    pub channel_id: u64,
}

/// Cron settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CronSettings {
    /// Seconds between scheduler ticks
    #[serde(default = "default_cron_check_seconds")]
    pub check_seconds: u64,

    #[serde(default)]
    pub jobs: Vec<CronJobSettings>,
}

impl Default for CronSettings {
    fn default() -> Self {
        Self {
            check_seconds: default_cron_check_seconds(),
            jobs: Vec::new(),
        }
    }
}

/// A scheduled message
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CronJobSettings {
    pub name: String,
    /// Cron expression (5 fields, or 6/7 with seconds)
    pub schedule: String,
    pub channel_id: u64,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// Redis settings (the URL itself is a secret)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisSettings {
    #[serde(default = "default_redis_prefix")]
    pub key_prefix: String,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            key_prefix: default_redis_prefix(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_command_cooldown_seconds() -> u64 {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_user_agent() -> String {
    format!("relay-bot/{}", env!("CARGO_PKG_VERSION"))
}

fn default_http_timeout_seconds() -> u64 {
    30
}

fn default_http_max_retries() -> u32 {
    3
}

fn default_http_cache_ttl_seconds() -> u64 {
    60
}

fn default_webhook_name() -> String {
    "Relay".to_string()
}

fn default_batch_window_ms() -> u64 {
    250
}

fn default_denied_ttl_seconds() -> u64 {
    600
}

fn default_reupload_max_bytes() -> u64 {
    8 * 1024 * 1024
}

fn default_ticket_prefix() -> String {
    "ticket".to_string()
}

fn default_dedupe_seconds() -> u64 {
    10
}

fn default_purge_max_messages() -> u16 {
    1000
}

fn default_poll_seconds() -> u64 {
    300
}

fn default_reddit_sort() -> String {
    "new".to_string()
}

fn default_cron_check_seconds() -> u64 {
    1
}

fn default_redis_prefix() -> String {
    "relay:".to_string()
}

/// Errors that can occur when loading settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config directory not found")]
    ConfigDirNotFound,
}

impl Settings {
    /// Load settings from the TOML configuration file.
    ///
    /// If the config file doesn't exist, creates it with default values.
    pub fn load() -> Result<Self, SettingsError> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            tracing::info!("Creating default configuration at {:?}", config_path);
            Self::create_default_config(&config_path)?;
        }

        let content = fs::read_to_string(&config_path)?;
        Self::from_toml(&content)
    }

    /// Parse settings from TOML content.
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let settings: Self = toml::from_str(content)?;
        Ok(settings)
    }

    /// Serialize settings to TOML content.
    pub fn to_toml(&self) -> Result<String, SettingsError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Get the configuration file path.
    ///
    /// `RELAY_CONFIG_DIR` overrides the XDG config directory.
    pub fn config_path() -> Result<PathBuf, SettingsError> {
        if let Ok(override_dir) = std::env::var("RELAY_CONFIG_DIR") {
            return Ok(PathBuf::from(override_dir).join("config.toml"));
        }

        let config_dir = dirs::config_dir()
            .ok_or(SettingsError::ConfigDirNotFound)?
            .join("relay");

        Ok(config_dir.join("config.toml"))
    }

    fn create_default_config(path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, DEFAULT_CONFIG_TOML)?;
        Ok(())
    }

    /// Save settings to a specific file path.
    pub fn save_to_path(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_toml()?)?;
        Ok(())
    }
}
