use std::sync::Arc;

use serenity::async_trait;
use serenity::model::application::{Command, Interaction};
use serenity::model::channel::{GuildChannel, Message};
use serenity::model::gateway::Ready;
use serenity::model::guild::automod::ActionExecution;
use serenity::prelude::*;
use tracing::{debug, error, info};

use super::automod::AutomodAlert;
use super::bridge::BridgedMessage;
use super::commands;
use crate::state::AppState;

/// Discord event handler
///
/// Owns no state of its own; everything lives in [`AppState`].
pub struct Bot {
    pub(super) state: Arc<AppState>,
}

impl Bot {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl EventHandler for Bot {
    /// Forward messages in bridged channels
    async fn message(&self, ctx: Context, msg: Message) {
        let bridge = &self.state.bridge;
        if bridge.targets(msg.channel_id.get()).is_empty() {
            return;
        }
        let Some(dispatcher) = self.state.dispatcher() else {
            return;
        };

        let guild_name = match msg.guild_id {
            Some(guild_id) if self.state.config.settings.bridge.show_guild => guild_id
                .to_partial_guild(&ctx.http)
                .await
                .map(|guild| guild.name)
                .ok(),
            _ => None,
        };
        let bridged = BridgedMessage::from_message(&msg, guild_name);
        let forwarded = bridge
            .forward(&bridged, dispatcher, Some(&self.state.downloader))
            .await;
        if forwarded > 0 {
            debug!(channel_id = %msg.channel_id, forwarded, "Bridged message");
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        self.handle_interaction(ctx, interaction).await;
    }

    /// Drop ticket records and webhook caches of deleted channels
    async fn channel_delete(
        &self,
        _ctx: Context,
        channel: GuildChannel,
        _messages: Option<Vec<Message>>,
    ) {
        let channel_id = channel.id.get();
        self.state.tickets.channel_deleted(channel_id).await;
        if let Some(dispatcher) = self.state.dispatcher() {
            dispatcher.invalidate(channel_id).await;
        }
    }

    async fn auto_moderation_action_execution(&self, ctx: Context, execution: ActionExecution) {
        if !self.state.automod.is_enabled() {
            return;
        }
        let alert = AutomodAlert::from_execution(&execution);
        self.state.automod.relay(&ctx.http, &alert).await;
    }

    /// Called when the bot is ready
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("Discord bot connected as {}", ready.user.name);

        if self.state.attach_discord(ctx.http.clone(), ready.user.id) {
            let commands = commands::definitions(self.state.config.settings.purger.max_messages);
            if let Err(e) = Command::set_global_commands(&ctx.http, commands).await {
                error!("Failed to register slash commands: {}", e);
            } else {
                info!("Slash commands registered");
            }
        }
    }
}
