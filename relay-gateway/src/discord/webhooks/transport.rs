use std::sync::Arc;

use async_trait::async_trait;
use serenity::builder::CreateAttachment;
use serenity::http::{Http, HttpError};
use serenity::model::channel::{Channel, ChannelType};
use serenity::model::id::{ChannelId, WebhookId};
use serenity::model::webhook::Webhook;
use serde_json::json;
use tokio::sync::OnceCell;

use super::payload::WebhookPayload;

/// Discord JSON error code for "Unknown Webhook".
const UNKNOWN_WEBHOOK: isize = 10015;

/// A webhook the dispatcher can execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookHandle {
    pub id: u64,
    /// Absent for webhooks owned by other applications.
    pub token: Option<String>,
    pub channel_id: u64,
    pub name: Option<String>,
    pub owner_id: Option<u64>,
}

/// What a channel id refers to, as far as webhooks care.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Text or announcement channel: post directly.
    Text,
    /// Thread: post via the parent's webhook with `thread_id`.
    Thread { parent_id: u64 },
    /// Forum: every message starts a new post.
    Forum,
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: u64,
    pub guild_id: Option<u64>,
    pub kind: ChannelKind,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("missing permissions")]
    MissingPermissions,
    #[error("unknown webhook")]
    UnknownWebhook,
    #[error("not found")]
    NotFound,
    #[error("{0}")]
    Other(String),
}

impl From<serenity::Error> for TransportError {
    fn from(err: serenity::Error) -> Self {
        if let serenity::Error::Http(HttpError::UnsuccessfulRequest(response)) = &err {
            // Compare raw codes: serenity pins its own http crate version.
            match response.status_code.as_u16() {
                403 => return Self::MissingPermissions,
                404 if response.error.code == UNKNOWN_WEBHOOK => return Self::UnknownWebhook,
                404 => return Self::NotFound,
                _ => {}
            }
        }
        Self::Other(err.to_string())
    }
}

/// The Discord calls the webhook dispatcher needs.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    /// User id of the bot, used to recognise webhooks it created.
    async fn current_user_id(&self) -> Result<u64, TransportError>;

    async fn channel(&self, channel_id: u64) -> Result<ChannelInfo, TransportError>;

    async fn list_webhooks(&self, channel_id: u64) -> Result<Vec<WebhookHandle>, TransportError>;

    async fn create_webhook(
        &self,
        channel_id: u64,
        name: &str,
    ) -> Result<WebhookHandle, TransportError>;

    /// Post `payload`, returning the created message id.
    async fn execute(
        &self,
        webhook: &WebhookHandle,
        thread_id: Option<u64>,
        thread_name: Option<&str>,
        payload: &WebhookPayload,
    ) -> Result<Option<u64>, TransportError>;
}

/// [`WebhookTransport`] over serenity's REST client.
pub struct SerenityTransport {
    http: Arc<Http>,
    user_id: OnceCell<u64>,
}

impl SerenityTransport {
    pub fn new(http: Arc<Http>) -> Self {
        Self {
            http,
            user_id: OnceCell::new(),
        }
    }
}

fn handle_from(webhook: &Webhook) -> WebhookHandle {
    // The token is only exposed through the execute URL.
    let token = webhook
        .url()
        .ok()
        .and_then(|url| url.rsplit('/').next().map(str::to_string))
        .filter(|token| !token.is_empty());

    WebhookHandle {
        id: webhook.id.get(),
        token,
        channel_id: webhook.channel_id.map(|id| id.get()).unwrap_or_default(),
        name: webhook.name.clone(),
        owner_id: webhook.user.as_ref().map(|user| user.id.get()),
    }
}

#[async_trait]
impl WebhookTransport for SerenityTransport {
    async fn current_user_id(&self) -> Result<u64, TransportError> {
        self.user_id
            .get_or_try_init(|| async {
                let user = self.http.get_current_user().await?;
                Ok::<_, TransportError>(user.id.get())
            })
            .await
            .copied()
    }

    async fn channel(&self, channel_id: u64) -> Result<ChannelInfo, TransportError> {
        let channel = ChannelId::new(channel_id).to_channel(&self.http).await?;
        let Channel::Guild(channel) = channel else {
            return Ok(ChannelInfo {
                id: channel_id,
                guild_id: None,
                kind: ChannelKind::Unsupported,
            });
        };

        let kind = match channel.kind {
            ChannelType::Text | ChannelType::News => ChannelKind::Text,
            ChannelType::PublicThread | ChannelType::PrivateThread | ChannelType::NewsThread => {
                match channel.parent_id {
                    Some(parent) => ChannelKind::Thread {
                        parent_id: parent.get(),
                    },
                    None => ChannelKind::Unsupported,
                }
            }
            ChannelType::Forum => ChannelKind::Forum,
            _ => ChannelKind::Unsupported,
        };

        Ok(ChannelInfo {
            id: channel_id,
            guild_id: Some(channel.guild_id.get()),
            kind,
        })
    }

    async fn list_webhooks(&self, channel_id: u64) -> Result<Vec<WebhookHandle>, TransportError> {
        let webhooks = self
            .http
            .get_channel_webhooks(ChannelId::new(channel_id))
            .await?;
        Ok(webhooks.iter().map(handle_from).collect())
    }

    async fn create_webhook(
        &self,
        channel_id: u64,
        name: &str,
    ) -> Result<WebhookHandle, TransportError> {
        let body = json!({ "name": name });
        let webhook = self
            .http
            .create_webhook(ChannelId::new(channel_id), &body, None)
            .await?;
        Ok(handle_from(&webhook))
    }

    async fn execute(
        &self,
        webhook: &WebhookHandle,
        thread_id: Option<u64>,
        thread_name: Option<&str>,
        payload: &WebhookPayload,
    ) -> Result<Option<u64>, TransportError> {
        let token = webhook
            .token
            .as_deref()
            .ok_or_else(|| TransportError::Other("webhook has no token".to_string()))?;
        let files = payload
            .files
            .iter()
            .map(|file| CreateAttachment::bytes(file.bytes.clone(), file.name.clone()))
            .collect();
        let body = payload.to_json(thread_name);

        let message = self
            .http
            .execute_webhook(
                WebhookId::new(webhook.id),
                thread_id.map(ChannelId::new),
                token,
                true,
                files,
                &body,
            )
            .await?;
        Ok(message.map(|message| message.id.get()))
    }
}
