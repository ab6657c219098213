use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use relay_cache::TimedCache;
use relay_core::WebhookSettings;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::payload::WebhookPayload;
use super::transport::{ChannelKind, TransportError, WebhookHandle, WebhookTransport};

const CHANNEL_CACHE_TTL: Duration = Duration::from_secs(600);

/// Where a webhook message goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DispatchTarget {
    /// Text, thread or forum channel id.
    pub channel_id: u64,
    pub guild_id: Option<u64>,
}

impl DispatchTarget {
    pub fn new(channel_id: u64, guild_id: Option<u64>) -> Self {
        Self {
            channel_id,
            guild_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    GuildDisabled,
    MissingPermissions,
    UnsupportedChannel,
    EmptyPayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Posted; carries the message id when Discord returned one.
    Sent(Option<u64>),
    Skipped(SkipReason),
    Failed(String),
}

impl DispatchOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent(_))
    }
}

struct QueuedMessage {
    target: DispatchTarget,
    payload: WebhookPayload,
    reply: oneshot::Sender<DispatchOutcome>,
}

/// How messages for one target channel reach Discord.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Route {
    webhook_channel: u64,
    thread_id: Option<u64>,
    creates_post: bool,
}

/// Per-channel ordered webhook message queue.
///
/// Each target channel gets its own worker task while it has pending
/// messages, so ordering holds per channel and a slow channel never blocks
/// another. Cheap to clone.
#[derive(Clone)]
pub struct WebhookDispatcher {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for WebhookDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookDispatcher")
            .field("name", &self.inner.name)
            .field("pending", &self.pending())
            .finish()
    }
}

struct Inner {
    transport: Arc<dyn WebhookTransport>,
    name: String,
    avatar_url: Option<String>,
    batch_window: Duration,
    disabled_guilds: RwLock<HashSet<u64>>,
    queues: Mutex<HashMap<u64, VecDeque<QueuedMessage>>>,
    webhooks: tokio::sync::RwLock<HashMap<u64, WebhookHandle>>,
    creation_locks: Mutex<HashMap<u64, Arc<tokio::sync::Mutex<()>>>>,
    channels: TimedCache<u64, super::transport::ChannelInfo>,
    denied: TimedCache<u64, ()>,
}

impl WebhookDispatcher {
    pub fn new(transport: Arc<dyn WebhookTransport>, settings: &WebhookSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                name: settings.name.clone(),
                avatar_url: settings.avatar_url.clone(),
                batch_window: Duration::from_millis(settings.batch_window_ms),
                disabled_guilds: RwLock::new(settings.disabled_guilds.iter().copied().collect()),
                queues: Mutex::new(HashMap::new()),
                webhooks: tokio::sync::RwLock::new(HashMap::new()),
                creation_locks: Mutex::new(HashMap::new()),
                channels: TimedCache::new(CHANNEL_CACHE_TTL),
                denied: TimedCache::new(Duration::from_secs(settings.denied_ttl_seconds)),
            }),
        }
    }

    /// Queue `payload` for `target` and return immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn enqueue(
        &self,
        target: DispatchTarget,
        payload: WebhookPayload,
    ) -> oneshot::Receiver<DispatchOutcome> {
        let (reply, receiver) = oneshot::channel();

        if let Some(reason) = self.inner.precheck(&target, &payload) {
            debug!(channel_id = target.channel_id, ?reason, "Webhook message skipped");
            let _ = reply.send(DispatchOutcome::Skipped(reason));
            return receiver;
        }
        if payload.exceeds_limits() {
            warn!(channel_id = target.channel_id, "Webhook message over Discord limits");
            let _ = reply.send(DispatchOutcome::Failed(
                "payload exceeds Discord message limits".into(),
            ));
            return receiver;
        }

        let message = QueuedMessage {
            target,
            payload,
            reply,
        };
        let spawn_worker = {
            let mut queues = self.inner.queues.lock().unwrap_or_else(PoisonError::into_inner);
            match queues.get_mut(&target.channel_id) {
                Some(queue) => {
                    queue.push_back(message);
                    false
                }
                None => {
                    queues.insert(target.channel_id, VecDeque::from([message]));
                    true
                }
            }
        };

        if spawn_worker {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.run_worker(target.channel_id).await });
        }

        receiver
    }

    /// Queue `payload` and wait for the result.
    pub async fn send(&self, target: DispatchTarget, payload: WebhookPayload) -> DispatchOutcome {
        self.enqueue(target, payload)
            .await
            .unwrap_or_else(|_| DispatchOutcome::Failed("dispatcher dropped the message".into()))
    }

    pub fn disable_guild(&self, guild_id: u64) {
        self.inner
            .disabled_guilds
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(guild_id);
    }

    pub fn enable_guild(&self, guild_id: u64) {
        self.inner
            .disabled_guilds
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&guild_id);
    }

    pub fn is_guild_disabled(&self, guild_id: u64) -> bool {
        self.inner.guild_disabled(Some(guild_id))
    }

    /// Forget everything cached about `channel_id`.
    pub async fn invalidate(&self, channel_id: u64) {
        self.inner.webhooks.write().await.remove(&channel_id);
        self.inner.channels.remove(&channel_id).await;
        self.inner.denied.remove(&channel_id).await;
    }

    /// Drop expired channel lookups and idle creation locks.
    pub async fn prune(&self) -> usize {
        let mut removed = self.inner.channels.prune_expired().await;
        removed += self.inner.denied.prune_expired().await;

        let mut locks = self
            .inner
            .creation_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        removed + before - locks.len()
    }

    /// Number of messages waiting across all channels.
    pub fn pending(&self) -> usize {
        self.inner
            .queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(VecDeque::len)
            .sum()
    }
}

impl Inner {
    fn guild_disabled(&self, guild_id: Option<u64>) -> bool {
        guild_id.is_some_and(|id| {
            self.disabled_guilds
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(&id)
        })
    }

    fn precheck(&self, target: &DispatchTarget, payload: &WebhookPayload) -> Option<SkipReason> {
        if self.guild_disabled(target.guild_id) {
            Some(SkipReason::GuildDisabled)
        } else if payload.is_empty() {
            Some(SkipReason::EmptyPayload)
        } else {
            None
        }
    }

    async fn run_worker(self: Arc<Self>, channel_id: u64) {
        loop {
            if !self.batch_window.is_zero() {
                tokio::time::sleep(self.batch_window).await;
            }

            let batch: Vec<QueuedMessage> = {
                let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
                match queues.get_mut(&channel_id) {
                    Some(queue) if !queue.is_empty() => queue.drain(..).collect(),
                    _ => {
                        queues.remove(&channel_id);
                        return;
                    }
                }
            };

            self.deliver_batch(channel_id, batch).await;
        }
    }

    async fn deliver_batch(&self, channel_id: u64, batch: Vec<QueuedMessage>) {
        let (ready, skipped): (Vec<_>, Vec<_>) = batch
            .into_iter()
            .partition(|message| !self.guild_disabled(message.target.guild_id));
        for message in skipped {
            let _ = message
                .reply
                .send(DispatchOutcome::Skipped(SkipReason::GuildDisabled));
        }
        if ready.is_empty() {
            return;
        }

        let route = match self.route(channel_id).await {
            Ok(route) => route,
            Err(outcome) => {
                for message in ready {
                    let _ = message.reply.send(outcome.clone());
                }
                return;
            }
        };

        for (payload, replies) in group(ready, !route.creates_post) {
            let outcome = self.deliver(channel_id, route, &payload).await;
            for reply in replies {
                let _ = reply.send(outcome.clone());
            }
        }
    }

    /// Resolve where messages for `channel_id` are posted.
    async fn route(&self, channel_id: u64) -> Result<Route, DispatchOutcome> {
        if self.denied.contains(&channel_id).await {
            return Err(DispatchOutcome::Skipped(SkipReason::MissingPermissions));
        }

        let info = match self.channels.get(&channel_id).await {
            Some(info) => info,
            None => {
                let info = match self.transport.channel(channel_id).await {
                    Ok(info) => info,
                    Err(err) => return Err(self.transport_failure(channel_id, err).await),
                };
                self.channels.set(channel_id, info).await;
                info
            }
        };

        if self.guild_disabled(info.guild_id) {
            return Err(DispatchOutcome::Skipped(SkipReason::GuildDisabled));
        }

        match info.kind {
            ChannelKind::Text => Ok(Route {
                webhook_channel: channel_id,
                thread_id: None,
                creates_post: false,
            }),
            ChannelKind::Thread { parent_id } => Ok(Route {
                webhook_channel: parent_id,
                thread_id: Some(channel_id),
                creates_post: false,
            }),
            ChannelKind::Forum => Ok(Route {
                webhook_channel: channel_id,
                thread_id: None,
                creates_post: true,
            }),
            ChannelKind::Unsupported => {
                Err(DispatchOutcome::Skipped(SkipReason::UnsupportedChannel))
            }
        }
    }

    async fn deliver(&self, channel_id: u64, route: Route, payload: &WebhookPayload) -> DispatchOutcome {
        let mut payload = payload.clone();
        if payload.avatar_url.is_none() {
            payload.avatar_url = self.avatar_url.clone();
        }
        let thread_name = route.creates_post.then(|| payload.forum_thread_name());

        let mut retried = false;
        loop {
            let webhook = match self.resolve_webhook(route.webhook_channel).await {
                Ok(webhook) => webhook,
                Err(err) => return self.transport_failure(channel_id, err).await,
            };

            match self
                .transport
                .execute(&webhook, route.thread_id, thread_name.as_deref(), &payload)
                .await
            {
                Ok(message_id) => return DispatchOutcome::Sent(message_id),
                Err(TransportError::UnknownWebhook) if !retried => {
                    debug!(
                        channel_id = route.webhook_channel,
                        webhook_id = webhook.id,
                        "Cached webhook is gone, resolving again"
                    );
                    self.webhooks.write().await.remove(&route.webhook_channel);
                    retried = true;
                }
                Err(err) => return self.transport_failure(channel_id, err).await,
            }
        }
    }

    fn creation_lock(&self, channel_id: u64) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .creation_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(channel_id).or_default())
    }

    /// Cached webhook for `channel_id`, else reuse or create one.
    async fn resolve_webhook(&self, channel_id: u64) -> Result<WebhookHandle, TransportError> {
        if let Some(webhook) = self.webhooks.read().await.get(&channel_id) {
            return Ok(webhook.clone());
        }

        let lock = self.creation_lock(channel_id);
        let _guard = lock.lock().await;

        // Another task may have resolved it while we waited.
        if let Some(webhook) = self.webhooks.read().await.get(&channel_id) {
            return Ok(webhook.clone());
        }

        let bot_id = self.transport.current_user_id().await?;
        let existing = self
            .transport
            .list_webhooks(channel_id)
            .await?
            .into_iter()
            .find(|webhook| {
                webhook.owner_id == Some(bot_id)
                    && webhook.token.is_some()
                    && webhook.name.as_deref() == Some(self.name.as_str())
            });

        let webhook = match existing {
            Some(webhook) => webhook,
            None => {
                let webhook = self.transport.create_webhook(channel_id, &self.name).await?;
                debug!(channel_id, webhook_id = webhook.id, "Created webhook");
                webhook
            }
        };

        self.webhooks
            .write()
            .await
            .insert(channel_id, webhook.clone());
        Ok(webhook)
    }

    /// Map a transport error to an outcome, remembering denied channels.
    async fn transport_failure(&self, channel_id: u64, err: TransportError) -> DispatchOutcome {
        match err {
            TransportError::MissingPermissions => {
                warn!(channel_id, "Missing permissions to manage or use webhooks");
                self.denied.set(channel_id, ()).await;
                DispatchOutcome::Skipped(SkipReason::MissingPermissions)
            }
            err => {
                warn!(channel_id, error = %err, "Webhook delivery failed");
                DispatchOutcome::Failed(err.to_string())
            }
        }
    }
}

/// Fold consecutive mergeable payloads into single messages.
fn group(
    messages: Vec<QueuedMessage>,
    allow_merge: bool,
) -> Vec<(WebhookPayload, Vec<oneshot::Sender<DispatchOutcome>>)> {
    let mut groups: Vec<(WebhookPayload, Vec<oneshot::Sender<DispatchOutcome>>)> = Vec::new();
    for message in messages {
        if allow_merge
            && let Some((payload, replies)) = groups.last_mut()
            && payload.can_merge(&message.payload)
        {
            payload.merge(message.payload);
            replies.push(message.reply);
            continue;
        }
        groups.push((message.payload, vec![message.reply]));
    }
    groups
}
