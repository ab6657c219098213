//! Cross-channel message bridging through webhooks.

use std::collections::HashMap;

use relay_core::BridgeSettings;
use serde_json::Value;
use serenity::model::channel::Message;
use tracing::{debug, warn};

use super::webhooks::{
    DispatchTarget, WebhookDispatcher, WebhookPayload, payload::MAX_CONTENT_CHARS,
};
use crate::web::Downloader;

/// Discord caps webhook usernames at 80 characters.
const MAX_USERNAME_CHARS: usize = 80;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgedAttachment {
    pub url: String,
    pub filename: String,
    pub size: u64,
}

/// What the bridge needs from a Discord message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BridgedMessage {
    pub channel_id: u64,
    pub guild_id: Option<u64>,
    pub guild_name: Option<String>,
    pub author_name: String,
    pub author_avatar_url: Option<String>,
    pub author_bot: bool,
    pub from_webhook: bool,
    pub content: String,
    pub attachments: Vec<BridgedAttachment>,
    pub embeds: Vec<Value>,
}

impl BridgedMessage {
    pub fn from_message(message: &Message, guild_name: Option<String>) -> Self {
        let author_name = message
            .member
            .as_ref()
            .and_then(|member| member.nick.clone())
            .or_else(|| message.author.global_name.clone())
            .unwrap_or_else(|| message.author.name.clone());

        Self {
            channel_id: message.channel_id.get(),
            guild_id: message.guild_id.map(|id| id.get()),
            guild_name,
            author_name,
            author_avatar_url: Some(message.author.face()),
            author_bot: message.author.bot,
            from_webhook: message.webhook_id.is_some(),
            content: message.content.clone(),
            attachments: message
                .attachments
                .iter()
                .map(|attachment| BridgedAttachment {
                    url: attachment.url.clone(),
                    filename: attachment.filename.clone(),
                    size: u64::from(attachment.size),
                })
                .collect(),
            embeds: message
                .embeds
                .iter()
                .filter_map(|embed| serde_json::to_value(embed).ok())
                .collect(),
        }
    }
}

/// Channel links and the payload rules for forwarding between them.
#[derive(Debug, Clone)]
pub struct Bridge {
    routes: HashMap<u64, Vec<u64>>,
    show_guild: bool,
    reupload_max_bytes: u64,
}

impl Bridge {
    pub fn new(settings: &BridgeSettings) -> Self {
        let mut routes: HashMap<u64, Vec<u64>> = HashMap::new();
        let mut add = |from: u64, to: u64| {
            let targets = routes.entry(from).or_default();
            if from != to && !targets.contains(&to) {
                targets.push(to);
            }
        };
        for link in &settings.links {
            add(link.from, link.to);
            if link.bidirectional {
                add(link.to, link.from);
            }
        }

        Self {
            routes,
            show_guild: settings.show_guild,
            reupload_max_bytes: settings.reupload_max_bytes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Channels a message in `channel_id` is forwarded to.
    pub fn targets(&self, channel_id: u64) -> &[u64] {
        self.routes
            .get(&channel_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Webhook payload mirroring `message`, or `None` when it must not be
    /// bridged (bot and webhook authors, empty messages).
    pub fn build_payload(&self, message: &BridgedMessage) -> Option<WebhookPayload> {
        if message.author_bot || message.from_webhook {
            return None;
        }
        if message.content.trim().is_empty()
            && message.attachments.is_empty()
            && message.embeds.is_empty()
        {
            return None;
        }

        let mut username = message.author_name.clone();
        if self.show_guild
            && let Some(guild) = &message.guild_name
        {
            username = format!("{username} • {guild}");
        }
        let username: String = username.chars().take(MAX_USERNAME_CHARS).collect();

        let mut lines: Vec<&str> = Vec::new();
        if !message.content.is_empty() {
            lines.push(&message.content);
        }
        lines.extend(message.attachments.iter().map(|a| a.url.as_str()));
        let content: String = lines.join("\n").chars().take(MAX_CONTENT_CHARS).collect();

        let mut payload = WebhookPayload {
            content: (!content.is_empty()).then_some(content),
            username: Some(username),
            avatar_url: message.author_avatar_url.clone(),
            embeds: message.embeds.iter().take(10).cloned().collect(),
            ..WebhookPayload::default()
        };
        payload.suppress_mentions = true;
        Some(payload)
    }

    /// Re-upload small attachments and drop their links from the content.
    async fn reupload(
        &self,
        payload: &mut WebhookPayload,
        message: &BridgedMessage,
        downloader: &Downloader,
    ) {
        for attachment in &message.attachments {
            if attachment.size > self.reupload_max_bytes {
                continue;
            }
            match downloader.fetch_bytes(&attachment.url).await {
                Ok(file) => {
                    payload.files.push(super::webhooks::WebhookFile {
                        name: attachment.filename.clone(),
                        bytes: file.bytes,
                    });
                    if let Some(content) = payload.content.take() {
                        let kept: Vec<&str> =
                            content.lines().filter(|line| *line != attachment.url).collect();
                        let kept = kept.join("\n");
                        payload.content = (!kept.is_empty()).then_some(kept);
                    }
                }
                Err(err) => {
                    warn!(url = %attachment.url, error = %err, "Attachment re-upload failed, linking instead");
                }
            }
        }
    }

    /// Send `message` to every linked channel. Returns how many were queued.
    pub async fn forward(
        &self,
        message: &BridgedMessage,
        dispatcher: &WebhookDispatcher,
        downloader: Option<&Downloader>,
    ) -> usize {
        let targets = self.targets(message.channel_id);
        if targets.is_empty() {
            return 0;
        }
        let Some(mut payload) = self.build_payload(message) else {
            return 0;
        };
        if let Some(downloader) = downloader {
            self.reupload(&mut payload, message, downloader).await;
        }

        for &channel_id in targets {
            // Outcomes are logged by the dispatcher.
            let _ = dispatcher.enqueue(DispatchTarget::new(channel_id, None), payload.clone());
        }
        debug!(
            from = message.channel_id,
            targets = targets.len(),
            "Bridged message"
        );
        targets.len()
    }
}
