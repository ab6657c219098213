//! Forwards AutoMod hits to moderators by DM.

use std::time::Duration;

use relay_cache::Cooldowns;
use relay_core::AutomodSettings;
use serenity::builder::{CreateEmbed, CreateEmbedFooter, CreateMessage};
use serenity::http::Http;
use serenity::model::guild::automod::ActionExecution;
use serenity::model::id::{GuildId, UserId};
use tracing::{debug, warn};

use super::send::WARNING_EMBED_COLOR;

/// Embed field values are capped at 1024 characters.
const MAX_FIELD_CHARS: usize = 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutomodAlert {
    pub guild_id: u64,
    pub rule_id: u64,
    pub trigger: String,
    pub user_id: u64,
    pub channel_id: Option<u64>,
    pub message_id: Option<u64>,
    pub alert_message_id: Option<u64>,
    pub content: String,
    pub matched_keyword: Option<String>,
}

impl AutomodAlert {
    pub fn from_execution(execution: &ActionExecution) -> Self {
        Self {
            guild_id: execution.guild_id.get(),
            rule_id: execution.rule_id.get(),
            trigger: format!("{:?}", execution.trigger_type),
            user_id: execution.user_id.get(),
            channel_id: execution.channel_id.map(|id| id.get()),
            message_id: execution.message_id.map(|id| id.get()),
            alert_message_id: execution.alert_system_message_id.map(|id| id.get()),
            content: execution.content.clone(),
            matched_keyword: execution.matched_keyword.clone(),
        }
    }

    /// One AutoMod hit fires an event per configured action; they share this key.
    pub fn dedupe_key(&self) -> String {
        let hit = self
            .message_id
            .or(self.alert_message_id)
            .map(|id| id.to_string())
            .unwrap_or_else(|| self.content.clone());
        format!("{}:{}:{hit}", self.guild_id, self.user_id)
    }

    pub fn embed(&self, guild_name: Option<&str>) -> CreateEmbed {
        let title = match guild_name {
            Some(name) => format!("AutoMod alert in {name}"),
            None => "AutoMod alert".to_string(),
        };
        let mut embed = CreateEmbed::new()
            .title(title)
            .color(WARNING_EMBED_COLOR)
            .field("User", format!("<@{}>", self.user_id), true)
            .field("Trigger", &self.trigger, true);
        if let Some(channel) = self.channel_id {
            embed = embed.field("Channel", format!("<#{channel}>"), true);
        }
        if let Some(keyword) = &self.matched_keyword {
            embed = embed.field("Keyword", format!("`{keyword}`"), true);
        }
        if !self.content.is_empty() {
            let content: String = self.content.chars().take(MAX_FIELD_CHARS).collect();
            embed = embed.field("Content", content, false);
        }
        if let (Some(channel), Some(message)) = (self.channel_id, self.alert_message_id) {
            embed = embed.url(format!(
                "https://discord.com/channels/{}/{channel}/{message}",
                self.guild_id
            ));
        }
        embed.footer(CreateEmbedFooter::new(format!("Rule {}", self.rule_id)))
    }
}

#[derive(Debug)]
pub struct AutomodRelay {
    settings: AutomodSettings,
    seen: Cooldowns<String>,
}

impl AutomodRelay {
    pub fn new(settings: AutomodSettings) -> Self {
        Self {
            settings,
            seen: Cooldowns::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    /// False for repeats of an alert already relayed within the window.
    pub fn should_notify(&self, alert: &AutomodAlert) -> bool {
        let window = Duration::from_secs(self.settings.dedupe_seconds);
        self.seen.try_acquire(alert.dedupe_key(), window).is_ok()
    }

    /// Forget alerts whose dedupe window has passed.
    pub fn prune(&self) -> usize {
        self.seen.prune()
    }

    /// Configured recipients, else the guild owner if allowed.
    pub fn recipients(&self, owner_id: Option<u64>) -> Vec<u64> {
        if !self.settings.notify_user_ids.is_empty() {
            return self.settings.notify_user_ids.clone();
        }
        match owner_id {
            Some(owner) if self.settings.notify_owner => vec![owner],
            _ => Vec::new(),
        }
    }

    /// DM the alert to every recipient. Returns how many DMs were delivered.
    pub async fn relay(&self, http: &Http, alert: &AutomodAlert) -> usize {
        if !self.settings.enabled || !self.should_notify(alert) {
            return 0;
        }

        let guild = GuildId::new(alert.guild_id);
        let needs_guild = self.settings.notify_user_ids.is_empty() && self.settings.notify_owner;
        let (guild_name, owner_id) = match guild.to_partial_guild(http).await {
            Ok(partial) => (Some(partial.name), Some(partial.owner_id.get())),
            Err(err) => {
                if needs_guild {
                    warn!(guild_id = alert.guild_id, error = %err, "Could not look up guild owner for AutoMod alert");
                }
                (None, None)
            }
        };

        let recipients = self.recipients(owner_id);
        let mut delivered = 0;
        for recipient in recipients {
            let message = CreateMessage::new().embed(alert.embed(guild_name.as_deref()));
            match UserId::new(recipient).direct_message(http, message).await {
                Ok(_) => delivered += 1,
                Err(err) => {
                    warn!(recipient, error = %err, "Failed to DM AutoMod alert");
                }
            }
        }
        debug!(guild_id = alert.guild_id, user_id = alert.user_id, delivered, "AutoMod alert relayed");
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(message_id: Option<u64>) -> AutomodAlert {
        AutomodAlert {
            guild_id: 1,
            rule_id: 2,
            trigger: "Keyword".into(),
            user_id: 3,
            channel_id: Some(4),
            message_id,
            alert_message_id: Some(9),
            content: "bad word".into(),
            matched_keyword: Some("bad".into()),
        }
    }

    fn relay(notify_user_ids: Vec<u64>, notify_owner: bool) -> AutomodRelay {
        AutomodRelay::new(AutomodSettings {
            notify_user_ids,
            notify_owner,
            ..AutomodSettings::default()
        })
    }

    #[test]
    fn repeated_events_are_dropped() {
        let relay = relay(vec![], true);
        assert!(relay.should_notify(&alert(Some(5))));
        assert!(!relay.should_notify(&alert(Some(5))));
        assert!(relay.should_notify(&alert(Some(6))));
    }

    #[test]
    fn prune_forgets_expired_alerts() {
        let relay = relay(vec![], true);
        assert!(relay.should_notify(&alert(Some(5))));
        assert_eq!(relay.prune(), 0);

        let instant = AutomodRelay::new(AutomodSettings {
            dedupe_seconds: 0,
            ..AutomodSettings::default()
        });
        assert!(instant.should_notify(&alert(Some(5))));
        assert_eq!(instant.prune(), 1);
    }

    #[test]
    fn dedupe_key_falls_back_to_alert_message() {
        assert_eq!(alert(Some(5)).dedupe_key(), "1:3:5");
        assert_eq!(alert(None).dedupe_key(), "1:3:9");
    }

    #[test]
    fn recipients_prefer_configured_users() {
        assert_eq!(relay(vec![7, 8], true).recipients(Some(1)), vec![7, 8]);
        assert_eq!(relay(vec![], true).recipients(Some(1)), vec![1]);
        assert!(relay(vec![], false).recipients(Some(1)).is_empty());
        assert!(relay(vec![], true).recipients(None).is_empty());
    }
}
