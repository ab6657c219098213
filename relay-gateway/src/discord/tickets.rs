//! Private support channels opened by members and closed with a transcript.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use relay_core::TicketSettings;
use serenity::builder::{
    CreateActionRow, CreateAttachment, CreateButton, CreateChannel, CreateEmbed, CreateMessage,
    GetMessages,
};
use serenity::http::{Http, HttpError};
use serenity::model::application::ButtonStyle;
use serenity::model::channel::{ChannelType, Message, PermissionOverwrite, PermissionOverwriteType};
use serenity::model::guild::Member;
use serenity::model::id::{ChannelId, GuildId, RoleId, UserId};
use serenity::model::permissions::Permissions;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::send::RELAY_EMBED_COLOR;

pub const CLOSE_BUTTON_ID: &str = "ticket:close";
const TRANSCRIPT_MESSAGES: u8 = 100;
const MAX_CHANNEL_NAME: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TicketError {
    #[error("tickets are disabled on this server")]
    Disabled,
    #[error("you already have an open ticket: <#{channel_id}>")]
    AlreadyOpen { channel_id: u64 },
    #[error("this channel is not a ticket")]
    NotATicket,
    #[error("only the ticket owner or staff can do that")]
    NotAllowed,
    #[error("Discord error: {0}")]
    Discord(String),
}

impl From<serenity::Error> for TicketError {
    fn from(err: serenity::Error) -> Self {
        Self::Discord(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketRecord {
    pub channel_id: u64,
    pub guild_id: u64,
    pub owner_id: u64,
    pub opened_at: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Open tickets keyed by channel.
#[derive(Debug, Default)]
pub struct TicketRegistry {
    tickets: RwLock<HashMap<u64, TicketRecord>>,
}

impl TicketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a ticket. Fails if the owner already has one in that guild.
    pub async fn open(&self, record: TicketRecord) -> Result<(), TicketError> {
        let mut tickets = self.tickets.write().await;
        if let Some(existing) = tickets
            .values()
            .find(|t| t.guild_id == record.guild_id && t.owner_id == record.owner_id)
        {
            return Err(TicketError::AlreadyOpen {
                channel_id: existing.channel_id,
            });
        }
        tickets.insert(record.channel_id, record);
        Ok(())
    }

    pub async fn get(&self, channel_id: u64) -> Option<TicketRecord> {
        self.tickets.read().await.get(&channel_id).cloned()
    }

    /// The open ticket of `owner_id` in `guild_id`.
    pub async fn by_owner(&self, guild_id: u64, owner_id: u64) -> Option<TicketRecord> {
        self.tickets
            .read()
            .await
            .values()
            .find(|t| t.guild_id == guild_id && t.owner_id == owner_id)
            .cloned()
    }

    pub async fn close(&self, channel_id: u64) -> Option<TicketRecord> {
        self.tickets.write().await.remove(&channel_id)
    }

    pub async fn len(&self) -> usize {
        self.tickets.read().await.len()
    }
}

/// Discord answered 404 for the channel.
fn is_unknown_channel(err: &serenity::Error) -> bool {
    matches!(
        err,
        serenity::Error::Http(HttpError::UnsuccessfulRequest(response))
            if response.status_code.as_u16() == 404
    )
}

/// `{prefix}-{username}` reduced to what Discord accepts in channel names.
pub fn channel_name(prefix: &str, username: &str) -> String {
    let raw = format!("{prefix}-{username}").to_lowercase();
    let mut name = String::with_capacity(raw.len());
    for c in raw.chars() {
        let c = if c.is_alphanumeric() || c == '_' { c } else { '-' };
        if c == '-' && (name.is_empty() || name.ends_with('-')) {
            continue;
        }
        name.push(c);
    }
    let name: String = name
        .trim_end_matches('-')
        .chars()
        .take(MAX_CHANNEL_NAME)
        .collect();
    if name.is_empty() {
        "ticket".to_string()
    } else {
        name
    }
}

/// Who is acting on a ticket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TicketActor {
    pub user_id: u64,
    pub role_ids: Vec<u64>,
    /// Holds MANAGE_CHANNELS in the guild.
    pub manage_channels: bool,
}

impl TicketActor {
    pub fn from_member(member: &Member) -> Self {
        Self {
            user_id: member.user.id.get(),
            role_ids: member.roles.iter().map(|r| r.get()).collect(),
            manage_channels: member
                .permissions
                .is_some_and(|p| p.manage_channels() || p.administrator()),
        }
    }

    fn is_staff(&self, staff_role_id: Option<u64>) -> bool {
        self.manage_channels || staff_role_id.is_some_and(|role| self.role_ids.contains(&role))
    }

    pub fn can_manage(&self, ticket: &TicketRecord, staff_role_id: Option<u64>) -> bool {
        ticket.owner_id == self.user_id || self.is_staff(staff_role_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptLine {
    pub at: DateTime<Utc>,
    pub author: String,
    pub content: String,
    pub attachments: Vec<String>,
}

impl From<&Message> for TranscriptLine {
    fn from(message: &Message) -> Self {
        let mut content = message.content.clone();
        if content.is_empty() && !message.embeds.is_empty() {
            content = message
                .embeds
                .iter()
                .filter_map(|e| e.title.clone().or_else(|| e.description.clone()))
                .collect::<Vec<_>>()
                .join(" | ");
        }
        Self {
            at: DateTime::from_timestamp(message.timestamp.unix_timestamp(), 0)
                .unwrap_or_default(),
            author: message.author.name.clone(),
            content,
            attachments: message.attachments.iter().map(|a| a.url.clone()).collect(),
        }
    }
}

/// Plain-text transcript, oldest message first.
pub fn render_transcript(ticket: &TicketRecord, lines: &[TranscriptLine]) -> String {
    let mut out = format!(
        "Ticket #{channel} opened by {owner} at {opened}\n",
        channel = ticket.channel_id,
        owner = ticket.owner_id,
        opened = ticket.opened_at.format("%Y-%m-%d %H:%M:%S UTC"),
    );
    if let Some(reason) = &ticket.reason {
        out.push_str(&format!("Reason: {reason}\n"));
    }
    out.push('\n');
    for line in lines {
        out.push_str(&format!(
            "[{}] {}: {}\n",
            line.at.format("%Y-%m-%d %H:%M:%S"),
            line.author,
            line.content
        ));
        for url in &line.attachments {
            out.push_str(&format!("    attachment: {url}\n"));
        }
    }
    out
}

fn member_access() -> Permissions {
    Permissions::VIEW_CHANNEL
        | Permissions::SEND_MESSAGES
        | Permissions::READ_MESSAGE_HISTORY
        | Permissions::ATTACH_FILES
}

fn member_overwrite(kind: PermissionOverwriteType) -> PermissionOverwrite {
    PermissionOverwrite {
        allow: member_access(),
        deny: Permissions::empty(),
        kind,
    }
}

/// Ticket lifecycle over the Discord API.
#[derive(Debug)]
pub struct Tickets {
    settings: TicketSettings,
    registry: TicketRegistry,
}

impl Tickets {
    pub fn new(settings: TicketSettings) -> Self {
        Self {
            settings,
            registry: TicketRegistry::new(),
        }
    }

    pub fn registry(&self) -> &TicketRegistry {
        &self.registry
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    pub async fn open(
        &self,
        http: &Http,
        guild_id: GuildId,
        bot_id: UserId,
        owner: UserId,
        owner_name: &str,
        reason: Option<String>,
    ) -> Result<ChannelId, TicketError> {
        if !self.settings.enabled {
            return Err(TicketError::Disabled);
        }
        if let Some(existing) = self.registry.by_owner(guild_id.get(), owner.get()).await {
            match ChannelId::new(existing.channel_id).to_channel(http).await {
                Err(err) if is_unknown_channel(&err) => {
                    self.channel_deleted(existing.channel_id).await;
                }
                _ => {
                    return Err(TicketError::AlreadyOpen {
                        channel_id: existing.channel_id,
                    });
                }
            }
        }

        let mut overwrites = vec![
            PermissionOverwrite {
                allow: Permissions::empty(),
                deny: Permissions::VIEW_CHANNEL,
                // @everyone shares the guild id.
                kind: PermissionOverwriteType::Role(RoleId::new(guild_id.get())),
            },
            member_overwrite(PermissionOverwriteType::Member(owner)),
            member_overwrite(PermissionOverwriteType::Member(bot_id)),
        ];
        if let Some(staff) = self.settings.staff_role_id {
            overwrites.push(member_overwrite(PermissionOverwriteType::Role(
                RoleId::new(staff),
            )));
        }

        let mut builder = CreateChannel::new(channel_name(&self.settings.name_prefix, owner_name))
            .kind(ChannelType::Text)
            .topic(format!("Support ticket for <@{owner}>"))
            .permissions(overwrites);
        if let Some(category) = self.settings.category_id {
            builder = builder.category(ChannelId::new(category));
        }
        let channel = guild_id.create_channel(http, builder).await?;

        let record = TicketRecord {
            channel_id: channel.id.get(),
            guild_id: guild_id.get(),
            owner_id: owner.get(),
            opened_at: Utc::now(),
            reason: reason.clone(),
        };
        if let Err(err) = self.registry.open(record).await {
            // Lost a race with a concurrent open.
            if let Err(delete_err) = channel.id.delete(http).await {
                warn!(channel_id = %channel.id, error = %delete_err, "Failed to remove duplicate ticket channel");
            }
            return Err(err);
        }

        let mut embed = CreateEmbed::new()
            .title("Support ticket")
            .description("Staff will be with you shortly. Press **Close** when you are done.")
            .color(RELAY_EMBED_COLOR);
        if let Some(reason) = &reason {
            embed = embed.field("Reason", reason, false);
        }
        let welcome = CreateMessage::new()
            .content(format!("<@{owner}>"))
            .embed(embed)
            .components(vec![CreateActionRow::Buttons(vec![
                CreateButton::new(CLOSE_BUTTON_ID)
                    .label("Close")
                    .style(ButtonStyle::Danger),
            ])]);
        if let Err(err) = channel.id.send_message(http, welcome).await {
            warn!(channel_id = %channel.id, error = %err, "Failed to post ticket welcome");
        }

        info!(guild_id = %guild_id, owner = %owner, channel_id = %channel.id, "Ticket opened");
        Ok(channel.id)
    }

    /// Forget the ticket of a channel deleted outside of [`Tickets::close`].
    pub async fn channel_deleted(&self, channel_id: u64) -> Option<TicketRecord> {
        let ticket = self.registry.close(channel_id).await?;
        info!(channel_id, owner = ticket.owner_id, "Ticket channel deleted, record released");
        Some(ticket)
    }

    async fn managed(
        &self,
        channel_id: ChannelId,
        actor: &TicketActor,
    ) -> Result<TicketRecord, TicketError> {
        let ticket = self
            .registry
            .get(channel_id.get())
            .await
            .ok_or(TicketError::NotATicket)?;
        if !actor.can_manage(&ticket, self.settings.staff_role_id) {
            return Err(TicketError::NotAllowed);
        }
        Ok(ticket)
    }

    /// Post the transcript to the log channel, then delete the ticket channel.
    pub async fn close(
        &self,
        http: &Http,
        channel_id: ChannelId,
        actor: &TicketActor,
    ) -> Result<TicketRecord, TicketError> {
        let ticket = self.managed(channel_id, actor).await?;

        if let Some(log_channel) = self.settings.log_channel_id
            && let Err(err) = self
                .post_transcript(http, &ticket, ChannelId::new(log_channel), actor)
                .await
        {
            warn!(channel_id = %channel_id, error = %err, "Failed to post ticket transcript");
        }

        match channel_id.delete(http).await {
            Ok(_) => {}
            Err(err) if is_unknown_channel(&err) => {
                debug!(channel_id = %channel_id, "Ticket channel already gone");
            }
            Err(err) => return Err(err.into()),
        }
        self.registry.close(channel_id.get()).await;
        info!(channel_id = %channel_id, closed_by = actor.user_id, "Ticket closed");
        Ok(ticket)
    }

    async fn post_transcript(
        &self,
        http: &Http,
        ticket: &TicketRecord,
        log_channel: ChannelId,
        actor: &TicketActor,
    ) -> Result<(), TicketError> {
        let mut messages = ChannelId::new(ticket.channel_id)
            .messages(http, GetMessages::new().limit(TRANSCRIPT_MESSAGES))
            .await?;
        messages.reverse();
        let lines: Vec<TranscriptLine> = messages.iter().map(TranscriptLine::from).collect();
        let transcript = render_transcript(ticket, &lines);

        let file = CreateAttachment::bytes(
            transcript.into_bytes(),
            format!("ticket-{}.txt", ticket.channel_id),
        );
        let message = CreateMessage::new()
            .content(format!(
                "Ticket of <@{}> closed by <@{}> ({} messages)",
                ticket.owner_id,
                actor.user_id,
                lines.len()
            ))
            .add_file(file);
        log_channel.send_message(http, message).await?;
        Ok(())
    }

    pub async fn add_member(
        &self,
        http: &Http,
        channel_id: ChannelId,
        actor: &TicketActor,
        user: UserId,
    ) -> Result<(), TicketError> {
        self.managed(channel_id, actor).await?;
        channel_id
            .create_permission(http, member_overwrite(PermissionOverwriteType::Member(user)))
            .await?;
        Ok(())
    }

    pub async fn remove_member(
        &self,
        http: &Http,
        channel_id: ChannelId,
        actor: &TicketActor,
        user: UserId,
    ) -> Result<(), TicketError> {
        let ticket = self.managed(channel_id, actor).await?;
        if ticket.owner_id == user.get() {
            return Err(TicketError::NotAllowed);
        }
        channel_id
            .delete_permission(http, PermissionOverwriteType::Member(user))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(channel_id: u64, owner_id: u64) -> TicketRecord {
        TicketRecord {
            channel_id,
            guild_id: 1,
            owner_id,
            opened_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            reason: None,
        }
    }

    #[tokio::test]
    async fn one_open_ticket_per_owner() {
        let registry = TicketRegistry::new();
        registry.open(record(10, 5)).await.unwrap();
        assert_eq!(
            registry.open(record(11, 5)).await,
            Err(TicketError::AlreadyOpen { channel_id: 10 })
        );
        registry.open(record(12, 6)).await.unwrap();
        assert_eq!(registry.len().await, 2);

        assert_eq!(registry.close(10).await.map(|t| t.owner_id), Some(5));
        registry.open(record(13, 5)).await.unwrap();
        assert_eq!(registry.by_owner(1, 5).await.map(|t| t.channel_id), Some(13));
    }

    #[tokio::test]
    async fn deleted_channel_releases_its_owner() {
        let tickets = Tickets::new(TicketSettings {
            enabled: true,
            ..TicketSettings::default()
        });
        tickets.registry().open(record(10, 5)).await.unwrap();

        assert!(tickets.channel_deleted(99).await.is_none());
        assert_eq!(tickets.channel_deleted(10).await.map(|t| t.owner_id), Some(5));
        assert!(tickets.registry().by_owner(1, 5).await.is_none());
        tickets.registry().open(record(11, 5)).await.unwrap();
    }

    #[test]
    fn channel_names_are_sanitized() {
        assert_eq!(channel_name("ticket", "Alice"), "ticket-alice");
        assert_eq!(channel_name("ticket", "Bob  the Builder!!"), "ticket-bob-the-builder");
        assert_eq!(channel_name("help", "__x__"), "help-__x__");
        assert_eq!(channel_name("", "!!!"), "ticket");
        assert!(channel_name("t", &"a".repeat(200)).len() <= 100);
    }

    #[test]
    fn owner_and_staff_can_manage() {
        let ticket = record(10, 5);
        let owner = TicketActor {
            user_id: 5,
            ..TicketActor::default()
        };
        let staff = TicketActor {
            user_id: 7,
            role_ids: vec![99],
            manage_channels: false,
        };
        let moderator = TicketActor {
            user_id: 8,
            role_ids: vec![],
            manage_channels: true,
        };
        let stranger = TicketActor {
            user_id: 9,
            ..TicketActor::default()
        };

        assert!(owner.can_manage(&ticket, Some(99)));
        assert!(staff.can_manage(&ticket, Some(99)));
        assert!(!staff.can_manage(&ticket, None));
        assert!(moderator.can_manage(&ticket, None));
        assert!(!stranger.can_manage(&ticket, Some(99)));
    }

    #[test]
    fn transcript_lists_messages() {
        let mut ticket = record(10, 5);
        ticket.reason = Some("refund".into());
        let at = DateTime::from_timestamp(1_700_000_100, 0).unwrap();
        let lines = vec![
            TranscriptLine {
                at,
                author: "alice".into(),
                content: "hello".into(),
                attachments: vec!["https://cdn/receipt.png".into()],
            },
            TranscriptLine {
                at,
                author: "staff".into(),
                content: "hi".into(),
                attachments: vec![],
            },
        ];
        let transcript = render_transcript(&ticket, &lines);
        assert!(transcript.starts_with("Ticket #10 opened by 5 at 2023-11-14 22:13:20 UTC\n"));
        assert!(transcript.contains("Reason: refund\n"));
        assert!(transcript.contains("[2023-11-14 22:15:00] alice: hello\n    attachment: https://cdn/receipt.png\n"));
        assert!(transcript.ends_with("staff: hi\n"));
    }
}
