//! Slash command definitions and the `interaction_create` handler.

use relay_core::Outcome;
use serenity::builder::{
    CreateCommand, CreateCommandOption, CreateEmbed, CreateEmbedFooter,
    CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse,
};
use serenity::model::application::{
    CommandDataOption, CommandDataOptionValue, CommandInteraction, CommandOptionType,
    ComponentInteraction, Interaction,
};
use serenity::model::id::UserId;
use serenity::model::permissions::Permissions;
use serenity::prelude::*;
use tracing::{debug, error, info, warn};

use super::bot::Bot;
use super::purger::{PurgeFilter, SerenityPurgeTarget, purge};
use super::send::RELAY_EMBED_COLOR;
use super::tickets::{CLOSE_BUTTON_ID, TicketActor};
use crate::providers::ProviderError;

const TWITCH_COLOR: u32 = 0x91_46_FF;
const REDDIT_COLOR: u32 = 0xFF_45_00;
const ROBLOX_COLOR: u32 = 0xE2_23_1A;
const TWITTER_COLOR: u32 = 0x1D_A1_F2;
const SEARCH_RESULTS: u8 = 3;

/// Every slash command the bot registers.
pub fn definitions(purge_max: u16) -> Vec<CreateCommand> {
    let required_user = |description: &str| {
        CreateCommandOption::new(CommandOptionType::User, "user", description).required(true)
    };

    vec![
        CreateCommand::new("purge")
            .description("Bulk delete recent messages in this channel")
            .default_member_permissions(Permissions::MANAGE_MESSAGES)
            .dm_permission(false)
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::Integer,
                    "limit",
                    "How many recent messages to scan",
                )
                .min_int_value(1)
                .max_int_value(u64::from(purge_max))
                .required(true),
            )
            .add_option(CreateCommandOption::new(
                CommandOptionType::User,
                "user",
                "Only delete messages from this user",
            ))
            .add_option(CreateCommandOption::new(
                CommandOptionType::Boolean,
                "bots",
                "Only delete messages from bots",
            ))
            .add_option(CreateCommandOption::new(
                CommandOptionType::String,
                "contains",
                "Only delete messages containing this text",
            ))
            .add_option(CreateCommandOption::new(
                CommandOptionType::Boolean,
                "pinned",
                "Include pinned messages",
            ))
            .add_option(CreateCommandOption::new(
                CommandOptionType::Boolean,
                "old",
                "Also delete messages older than 14 days, one by one",
            )),
        CreateCommand::new("ticket")
            .description("Support tickets")
            .dm_permission(false)
            .add_option(
                CreateCommandOption::new(CommandOptionType::SubCommand, "open", "Open a ticket")
                    .add_sub_option(CreateCommandOption::new(
                        CommandOptionType::String,
                        "reason",
                        "What do you need help with?",
                    )),
            )
            .add_option(CreateCommandOption::new(
                CommandOptionType::SubCommand,
                "close",
                "Close this ticket",
            ))
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::SubCommand,
                    "add",
                    "Give a member access to this ticket",
                )
                .add_sub_option(required_user("Member to add")),
            )
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::SubCommand,
                    "remove",
                    "Remove a member from this ticket",
                )
                .add_sub_option(required_user("Member to remove")),
            ),
        CreateCommand::new("gif")
            .description("Post a random GIF")
            .add_option(
                CreateCommandOption::new(CommandOptionType::String, "query", "Search terms")
                    .required(true),
            ),
        CreateCommand::new("google")
            .description("Search the web")
            .add_option(
                CreateCommandOption::new(CommandOptionType::String, "query", "Search terms")
                    .required(true),
            )
            .add_option(CreateCommandOption::new(
                CommandOptionType::Boolean,
                "image",
                "Search for an image instead",
            )),
        CreateCommand::new("reddit")
            .description("Random image from a subreddit")
            .add_option(
                CreateCommandOption::new(CommandOptionType::String, "subreddit", "e.g. aww")
                    .required(true),
            ),
        CreateCommand::new("roblox")
            .description("Look up a Roblox user")
            .add_option(
                CreateCommandOption::new(CommandOptionType::String, "username", "Roblox username")
                    .required(true),
            ),
        CreateCommand::new("twitch")
            .description("Look up a Twitch channel")
            .add_option(
                CreateCommandOption::new(CommandOptionType::String, "login", "Twitch login")
                    .required(true),
            ),
        CreateCommand::new("twitter")
            .description("Show a user's latest tweet")
            .add_option(
                CreateCommandOption::new(CommandOptionType::String, "username", "Twitter handle")
                    .required(true),
            ),
    ]
}

fn find<'a>(options: &'a [CommandDataOption], name: &str) -> Option<&'a CommandDataOptionValue> {
    options
        .iter()
        .find(|option| option.name == name)
        .map(|option| &option.value)
}

fn str_option<'a>(options: &'a [CommandDataOption], name: &str) -> Option<&'a str> {
    find(options, name).and_then(|value| value.as_str())
}

fn bool_option(options: &[CommandDataOption], name: &str) -> bool {
    find(options, name)
        .and_then(|value| value.as_bool())
        .unwrap_or(false)
}

fn user_option(options: &[CommandDataOption], name: &str) -> Option<UserId> {
    find(options, name).and_then(|value| value.as_user_id())
}

/// The chosen subcommand and its options.
fn subcommand(options: &[CommandDataOption]) -> Option<(&str, &[CommandDataOption])> {
    let option = options.first()?;
    match &option.value {
        CommandDataOptionValue::SubCommand(inner) => Some((option.name.as_str(), inner.as_slice())),
        _ => None,
    }
}

/// Whether a command's reply is visible to the whole channel.
fn is_public(name: &str) -> bool {
    matches!(
        name,
        "gif" | "google" | "reddit" | "roblox" | "twitch" | "twitter"
    )
}

/// What a command answers with.
enum Reply {
    Status(Outcome),
    Content(String),
    Embed(CreateEmbed),
}

impl Reply {
    fn fail(message: impl Into<String>) -> Self {
        Self::Status(Outcome::fail(message))
    }

    fn into_edit(self) -> EditInteractionResponse {
        match self {
            Self::Status(outcome) => EditInteractionResponse::new().content(outcome.render()),
            Self::Content(content) => EditInteractionResponse::new().content(content),
            Self::Embed(embed) => EditInteractionResponse::new().embed(embed),
        }
    }
}

impl From<ProviderError> for Reply {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotFound(what) => Self::fail(format!("Nothing found: {what}")),
            ProviderError::MissingCredentials(what) => {
                Self::fail(format!("{what} is not set up on this bot"))
            }
            other => {
                warn!(error = %other, "Provider request failed");
                Self::fail("The service did not answer, try again later")
            }
        }
    }
}

/// Extend `Bot` with the `interaction_create` handler.
impl Bot {
    pub(super) async fn handle_interaction(&self, ctx: Context, interaction: Interaction) {
        match interaction {
            Interaction::Command(command) => self.handle_command(&ctx, &command).await,
            Interaction::Component(component)
                if component.data.custom_id == CLOSE_BUTTON_ID =>
            {
                self.handle_close_button(&ctx, &component).await;
            }
            _ => {}
        }
    }

    async fn handle_command(&self, ctx: &Context, command: &CommandInteraction) {
        let name = command.data.name.as_str();
        debug!(command = name, user = %command.user.id, "Slash command");

        if let Err(remaining) = self
            .state
            .command_cooldowns
            .try_acquire(command.user.id.get(), self.state.command_cooldown())
        {
            let message = format!(
                "Slow down! Try again in {:.1}s",
                remaining.as_secs_f32()
            );
            let _ = command
                .create_response(
                    &ctx.http,
                    CreateInteractionResponse::Message(
                        CreateInteractionResponseMessage::new()
                            .content(Outcome::fail(message).render())
                            .ephemeral(true),
                    ),
                )
                .await;
            return;
        }

        let defer = CreateInteractionResponse::Defer(
            CreateInteractionResponseMessage::new().ephemeral(!is_public(name)),
        );
        if let Err(e) = command.create_response(&ctx.http, defer).await {
            error!("Failed to acknowledge /{}: {}", name, e);
            return;
        }

        let options = command.data.options.as_slice();
        let reply = match name {
            "purge" => self.purge(ctx, command, options).await,
            "ticket" => self.ticket(ctx, command, options).await,
            "gif" => self.gif(options).await,
            "google" => self.google(options).await,
            "reddit" => self.reddit(options).await,
            "roblox" => self.roblox(options).await,
            "twitch" => self.twitch(options).await,
            "twitter" => self.twitter(options).await,
            other => Reply::fail(format!("Unknown command /{other}")),
        };

        if let Err(e) = command.edit_response(&ctx.http, reply.into_edit()).await {
            // A closed ticket deletes the channel the reply lived in.
            debug!("Could not edit /{} reply: {}", name, e);
        }
    }

    async fn handle_close_button(&self, ctx: &Context, component: &ComponentInteraction) {
        let defer = CreateInteractionResponse::Defer(
            CreateInteractionResponseMessage::new().ephemeral(true),
        );
        if let Err(e) = component.create_response(&ctx.http, defer).await {
            error!("Failed to acknowledge ticket close: {}", e);
            return;
        }
        let Some(member) = component.member.as_ref() else {
            return;
        };
        let actor = TicketActor::from_member(member);
        if let Err(err) = self
            .state
            .tickets
            .close(&ctx.http, component.channel_id, &actor)
            .await
        {
            let _ = component
                .edit_response(
                    &ctx.http,
                    EditInteractionResponse::new().content(Outcome::fail(err.to_string()).render()),
                )
                .await;
        }
    }

    async fn purge(
        &self,
        ctx: &Context,
        command: &CommandInteraction,
        options: &[CommandDataOption],
    ) -> Reply {
        let allowed = command
            .member
            .as_ref()
            .and_then(|member| member.permissions)
            .is_some_and(|p| p.manage_messages() || p.administrator());
        if !allowed {
            return Reply::fail("You need the Manage Messages permission");
        }

        let limit = find(options, "limit")
            .and_then(|value| value.as_i64())
            .and_then(|limit| u16::try_from(limit).ok())
            .unwrap_or(0);
        let filter = PurgeFilter {
            author: user_option(options, "user").map(|id| id.get()),
            bots_only: bool_option(options, "bots"),
            contains: str_option(options, "contains").map(str::to_string),
            include_pinned: bool_option(options, "pinned"),
            delete_old: bool_option(options, "old"),
            ..PurgeFilter::new(limit)
        };
        if let Err(err) = filter.validate(self.state.config.settings.purger.max_messages) {
            return Reply::fail(err.to_string());
        }

        let target = SerenityPurgeTarget::new(ctx.http.clone());
        let result = purge(&target, command.channel_id.get(), &filter).await;
        info!(
            channel_id = %command.channel_id,
            user = %command.user.id,
            ok = result.is_ok(),
            "/purge"
        );
        Reply::Status(result.map(|report| report.summary()).into())
    }

    async fn ticket(
        &self,
        ctx: &Context,
        command: &CommandInteraction,
        options: &[CommandDataOption],
    ) -> Reply {
        let tickets = &self.state.tickets;
        let (Some(guild_id), Some(member)) = (command.guild_id, command.member.as_ref()) else {
            return Reply::fail("Tickets only work inside a server");
        };
        let Some((sub, sub_options)) = subcommand(options) else {
            return Reply::fail("Pick a ticket action");
        };
        let actor = TicketActor::from_member(member);

        let result = match sub {
            "open" => {
                let Some(bot_id) = self.state.discord().map(|d| d.bot_id) else {
                    return Reply::fail("The bot is still starting up");
                };
                tickets
                    .open(
                        &ctx.http,
                        guild_id,
                        bot_id,
                        command.user.id,
                        &command.user.name,
                        str_option(sub_options, "reason").map(str::to_string),
                    )
                    .await
                    .map(|channel| format!("Your ticket is open: <#{channel}>"))
            }
            "close" => tickets
                .close(&ctx.http, command.channel_id, &actor)
                .await
                .map(|_| "Ticket closed".to_string()),
            "add" | "remove" => {
                let Some(user) = user_option(sub_options, "user") else {
                    return Reply::fail("Pick a member");
                };
                if sub == "add" {
                    tickets
                        .add_member(&ctx.http, command.channel_id, &actor, user)
                        .await
                        .map(|_| format!("Added <@{user}> to this ticket"))
                } else {
                    tickets
                        .remove_member(&ctx.http, command.channel_id, &actor, user)
                        .await
                        .map(|_| format!("Removed <@{user}> from this ticket"))
                }
            }
            other => return Reply::fail(format!("Unknown ticket action {other}")),
        };
        Reply::Status(result.into())
    }

    /// False when a moderation client is configured and rates the image adult.
    async fn image_allowed(&self, url: &str) -> bool {
        let Some(moderation) = &self.state.providers.moderation else {
            return true;
        };
        match moderation.rate_image(url).await {
            Ok(rating) => !rating.is_adult(),
            Err(err) => {
                warn!(url, error = %err, "Image rating failed, allowing image");
                true
            }
        }
    }

    async fn gif(&self, options: &[CommandDataOption]) -> Reply {
        let Some(tenor) = &self.state.providers.tenor else {
            return ProviderError::MissingCredentials("Tenor").into();
        };
        let query = str_option(options, "query").unwrap_or_default();
        match tenor.random(query).await {
            Ok(gif) => match gif.gif_url() {
                Some(url) => Reply::Content(url.to_string()),
                None => Reply::fail("No GIF found"),
            },
            Err(err) => err.into(),
        }
    }

    async fn google(&self, options: &[CommandDataOption]) -> Reply {
        let Some(google) = &self.state.providers.google else {
            return ProviderError::MissingCredentials("Google search").into();
        };
        let query = str_option(options, "query").unwrap_or_default();

        if bool_option(options, "image") {
            let results = match google.image_search(query, SEARCH_RESULTS * 2, true).await {
                Ok(results) => results,
                Err(err) => return err.into(),
            };
            for result in results {
                if !self.image_allowed(&result.link).await {
                    continue;
                }
                let mut embed = CreateEmbed::new()
                    .title(result.title)
                    .image(result.link.clone())
                    .color(RELAY_EMBED_COLOR);
                if let Some(page) = result.image.and_then(|image| image.context_link) {
                    embed = embed.url(page);
                }
                return Reply::Embed(embed);
            }
            return Reply::fail(format!("No images found for '{query}'"));
        }

        match google.search(query, SEARCH_RESULTS, true).await {
            Ok(results) if results.is_empty() => Reply::fail(format!("No results for '{query}'")),
            Ok(results) => {
                let description = results
                    .iter()
                    .map(|r| format!("**[{}]({})**\n{}", r.title, r.link, r.snippet.trim()))
                    .collect::<Vec<_>>()
                    .join("\n\n");
                Reply::Embed(
                    CreateEmbed::new()
                        .title(format!("Results for {query}"))
                        .description(description)
                        .color(RELAY_EMBED_COLOR),
                )
            }
            Err(err) => err.into(),
        }
    }

    async fn reddit(&self, options: &[CommandDataOption]) -> Reply {
        let subreddit = str_option(options, "subreddit").unwrap_or_default();
        let post = match self.state.providers.reddit.random_image(subreddit, false).await {
            Ok(post) => post,
            Err(err) => return err.into(),
        };
        let Some(image) = post.image_url() else {
            return Reply::fail("No image found");
        };
        if !self.image_allowed(image).await {
            return Reply::fail("That image is not allowed here");
        }
        Reply::Embed(
            CreateEmbed::new()
                .title(post.title.chars().take(256).collect::<String>())
                .url(post.link())
                .image(image)
                .color(REDDIT_COLOR)
                .footer(CreateEmbedFooter::new(format!(
                    "r/{} • u/{} • {} points",
                    post.subreddit, post.author, post.score
                ))),
        )
    }

    async fn roblox(&self, options: &[CommandDataOption]) -> Reply {
        let roblox = &self.state.providers.roblox;
        let username = str_option(options, "username").unwrap_or_default();
        let user = match roblox.user_by_username(username).await {
            Ok(user) => user,
            Err(err) => return err.into(),
        };

        let mut embed = CreateEmbed::new()
            .title(format!("{} (@{})", user.display_name, user.name))
            .url(user.profile_url())
            .color(ROBLOX_COLOR);
        if !user.description.is_empty() {
            embed = embed.description(user.description.chars().take(1024).collect::<String>());
        }
        if let Some(created) = user.created {
            embed = embed.field("Joined", created.format("%Y-%m-%d").to_string(), true);
        }
        match roblox.groups(user.id).await {
            Ok(groups) => embed = embed.field("Groups", groups.len().to_string(), true),
            Err(err) => debug!(error = %err, "Roblox groups lookup failed"),
        }
        if let Ok(Some(headshot)) = roblox.avatar_headshot(user.id).await {
            embed = embed.thumbnail(headshot);
        }
        if user.is_banned {
            embed = embed.field("Status", "Banned", true);
        }
        Reply::Embed(embed)
    }

    async fn twitch(&self, options: &[CommandDataOption]) -> Reply {
        let Some(twitch) = &self.state.providers.twitch else {
            return ProviderError::MissingCredentials("Twitch").into();
        };
        let login = str_option(options, "login").unwrap_or_default();
        let user = match twitch.user(login).await {
            Ok(user) => user,
            Err(err) => return err.into(),
        };

        let mut embed = CreateEmbed::new()
            .title(user.display_name.clone())
            .url(format!("https://twitch.tv/{}", user.login))
            .color(TWITCH_COLOR);
        if !user.profile_image_url.is_empty() {
            embed = embed.thumbnail(user.profile_image_url.clone());
        }
        if !user.description.is_empty() {
            embed = embed.description(user.description.clone());
        }
        embed = match twitch.is_live(&user.login).await {
            Ok(Some(stream)) => embed
                .field("Status", "🔴 Live", true)
                .field("Viewers", stream.viewer_count.to_string(), true)
                .field("Playing", stream.game_name.clone(), true)
                .image(stream.thumbnail(640, 360)),
            Ok(None) => embed.field("Status", "Offline", true),
            Err(err) => {
                debug!(error = %err, "Twitch stream lookup failed");
                embed
            }
        };
        Reply::Embed(embed)
    }

    async fn twitter(&self, options: &[CommandDataOption]) -> Reply {
        let Some(twitter) = &self.state.providers.twitter else {
            return ProviderError::MissingCredentials("Twitter").into();
        };
        let username = str_option(options, "username").unwrap_or_default();
        let user = match twitter.user_by_username(username).await {
            Ok(user) => user,
            Err(err) => return err.into(),
        };
        let tweets = match twitter.recent_tweets(&user.id, 5).await {
            Ok(tweets) => tweets,
            Err(err) => return err.into(),
        };
        let Some(tweet) = tweets.first() else {
            return Reply::fail(format!("@{} has not tweeted recently", user.username));
        };

        let mut embed = CreateEmbed::new()
            .title(format!("{} (@{})", user.name, user.username))
            .url(tweet.url(&user.username))
            .description(tweet.text.clone())
            .color(TWITTER_COLOR);
        if let Some(avatar) = &user.profile_image_url {
            embed = embed.thumbnail(avatar.clone());
        }
        if let Some(at) = tweet.created_at {
            embed = embed.footer(CreateEmbedFooter::new(at.format("%Y-%m-%d %H:%M UTC").to_string()));
        }
        Reply::Embed(embed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_command_is_defined() {
        let commands = definitions(1000);
        assert_eq!(commands.len(), 8);
    }

    #[test]
    fn lookups_are_public_and_moderation_is_private() {
        assert!(is_public("gif"));
        assert!(is_public("twitch"));
        assert!(!is_public("purge"));
        assert!(!is_public("ticket"));
    }
}
