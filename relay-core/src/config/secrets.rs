//! Secrets configuration loaded from environment variables only.
//!
//! API keys and tokens never live in the settings file.

use std::env;

/// Secrets loaded exclusively from environment variables.
///
/// Every secret is optional: a feature whose credentials are missing is
/// simply not started.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    /// Discord bot token (env: DISCORD_BOT_TOKEN)
    pub discord_bot_token: Option<String>,

    /// Twitch application client id (env: TWITCH_CLIENT_ID)
    pub twitch_client_id: Option<String>,

    /// Twitch application client secret (env: TWITCH_CLIENT_SECRET)
    pub twitch_client_secret: Option<String>,

    /// Google API key (env: GOOGLE_API_KEY)
    pub google_api_key: Option<String>,

    /// Google programmable search engine id (env: GOOGLE_CSE_ID)
    pub google_cse_id: Option<String>,

    /// Twitter v2 bearer token (env: TWITTER_BEARER_TOKEN)
    pub twitter_bearer_token: Option<String>,

    /// Tenor API key (env: TENOR_API_KEY)
    pub tenor_api_key: Option<String>,

    /// ModerateContent API key (env: MODERATECONTENT_API_KEY)
    pub moderatecontent_api_key: Option<String>,

    /// Redis connection URL (env: REDIS_URL)
    pub redis_url: Option<String>,
}

/// Errors that can occur when loading secrets
#[derive(Debug, thiserror::Error)]
pub enum SecretsError {
    #[error("Secret {0} is set but empty")]
    EmptySecret(&'static str),
}

impl Secrets {
    /// Load secrets from environment variables.
    ///
    /// Loads a `.env` file first if one is present.
    pub fn from_env() -> Result<Self, SecretsError> {
        let _ = dotenvy::dotenv();

        Self::from_env_inner()
    }

    /// Internal method to load from environment without loading .env
    pub(crate) fn from_env_inner() -> Result<Self, SecretsError> {
        Ok(Self {
            discord_bot_token: read_var("DISCORD_BOT_TOKEN")?,
            twitch_client_id: read_var("TWITCH_CLIENT_ID")?,
            twitch_client_secret: read_var("TWITCH_CLIENT_SECRET")?,
            google_api_key: read_var("GOOGLE_API_KEY")?,
            google_cse_id: read_var("GOOGLE_CSE_ID")?,
            twitter_bearer_token: read_var("TWITTER_BEARER_TOKEN")?,
            tenor_api_key: read_var("TENOR_API_KEY")?,
            moderatecontent_api_key: read_var("MODERATECONTENT_API_KEY")?,
            redis_url: read_var("REDIS_URL")?,
        })
    }

    /// Both Twitch credentials are present.
    pub fn has_twitch(&self) -> bool {
        self.twitch_client_id.is_some() && self.twitch_client_secret.is_some()
    }

    /// Both Google Custom Search credentials are present.
    pub fn has_google(&self) -> bool {
        self.google_api_key.is_some() && self.google_cse_id.is_some()
    }

    /// Names of the integrations that have credentials configured.
    pub fn available_integrations(&self) -> Vec<&'static str> {
        let mut integrations = Vec::new();
        if self.discord_bot_token.is_some() {
            integrations.push("discord");
        }
        if self.has_twitch() {
            integrations.push("twitch");
        }
        if self.has_google() {
            integrations.push("google");
        }
        if self.twitter_bearer_token.is_some() {
            integrations.push("twitter");
        }
        if self.tenor_api_key.is_some() {
            integrations.push("tenor");
        }
        if self.moderatecontent_api_key.is_some() {
            integrations.push("moderatecontent");
        }
        if self.redis_url.is_some() {
            integrations.push("redis");
        }
        integrations
    }
}

fn read_var(name: &'static str) -> Result<Option<String>, SecretsError> {
    match env::var(name) {
        Ok(value) if value.trim().is_empty() => Err(SecretsError::EmptySecret(name)),
        Ok(value) => Ok(Some(value)),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Use a mutex to ensure tests that modify environment variables don't run concurrently
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const ALL_VARS: &[&str] = &[
        "DISCORD_BOT_TOKEN",
        "TWITCH_CLIENT_ID",
        "TWITCH_CLIENT_SECRET",
        "GOOGLE_API_KEY",
        "GOOGLE_CSE_ID",
        "TWITTER_BEARER_TOKEN",
        "TENOR_API_KEY",
        "MODERATECONTENT_API_KEY",
        "REDIS_URL",
    ];

    fn clear_env() {
        for name in ALL_VARS {
            unsafe {
                env::remove_var(name);
            }
        }
    }

    #[test]
    fn test_secrets_from_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var("DISCORD_BOT_TOKEN", "bot-token");
            env::set_var("TENOR_API_KEY", "tenor");
        }

        let secrets = Secrets::from_env_inner().unwrap();
        assert_eq!(secrets.discord_bot_token, Some("bot-token".to_string()));
        assert_eq!(secrets.tenor_api_key, Some("tenor".to_string()));
        assert!(secrets.twitch_client_id.is_none());
        assert_eq!(secrets.available_integrations(), vec!["discord", "tenor"]);
    }

    #[test]
    fn test_nothing_configured_is_fine() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();

        let secrets = Secrets::from_env_inner().unwrap();
        assert!(secrets.available_integrations().is_empty());
        assert!(!secrets.has_twitch());
    }

    #[test]
    fn test_empty_secret_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe { env::set_var("GOOGLE_API_KEY", "  ") }

        let err = Secrets::from_env_inner().unwrap_err();
        assert!(matches!(err, SecretsError::EmptySecret("GOOGLE_API_KEY")));
        clear_env();
    }

    #[test]
    fn test_twitch_needs_both_halves() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe { env::set_var("TWITCH_CLIENT_ID", "id") }

        let secrets = Secrets::from_env_inner().unwrap();
        assert!(!secrets.has_twitch());

        unsafe { env::set_var("TWITCH_CLIENT_SECRET", "secret") }
        let secrets = Secrets::from_env_inner().unwrap();
        assert!(secrets.has_twitch());
        clear_env();
    }
}
