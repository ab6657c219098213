use std::sync::{Arc, OnceLock};
use std::time::Duration;

use relay_cache::{Cooldowns, RedisStore};
use relay_core::Config;
use serenity::http::Http;
use serenity::model::id::UserId;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cron::{Scheduler, register_message_jobs};
use crate::discord::automod::AutomodRelay;
use crate::discord::bridge::Bridge;
use crate::discord::tickets::Tickets;
use crate::discord::webhooks::{SerenityTransport, WebhookDispatcher};
use crate::feeds::{FeedWatcher, SeenStore};
use crate::providers::Providers;
use crate::web::{Downloader, FetchError, HttpClient};

/// How often expired cache entries and cooldowns are dropped.
pub const PRUNE_PERIOD: Duration = Duration::from_secs(600);

/// Discord handles that only exist once the gateway session is ready.
#[derive(Debug)]
pub struct DiscordServices {
    pub http: Arc<Http>,
    pub bot_id: UserId,
    pub dispatcher: WebhookDispatcher,
}

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub http: HttpClient,
    pub downloader: Downloader,
    pub providers: Providers,
    pub bridge: Bridge,
    pub tickets: Tickets,
    pub automod: AutomodRelay,
    pub command_cooldowns: Cooldowns<u64>,
    pub scheduler: Scheduler,
    redis: Option<Arc<RedisStore>>,
    discord: OnceLock<DiscordServices>,
}

impl AppState {
    pub fn new(config: Config, redis: Option<Arc<RedisStore>>) -> Result<Self, FetchError> {
        let settings = &config.settings;
        let http = HttpClient::new(&settings.http)?;
        let downloader = Downloader::new(http.clone(), settings.bridge.reupload_max_bytes);
        let providers = Providers::from_config(&http, &config);

        Ok(Self {
            bridge: Bridge::new(&settings.bridge),
            tickets: Tickets::new(settings.tickets.clone()),
            automod: AutomodRelay::new(settings.automod.clone()),
            command_cooldowns: Cooldowns::new(),
            scheduler: Scheduler::new(),
            http,
            downloader,
            providers,
            redis,
            discord: OnceLock::new(),
            config,
        })
    }

    pub fn discord(&self) -> Option<&DiscordServices> {
        self.discord.get()
    }

    pub fn dispatcher(&self) -> Option<&WebhookDispatcher> {
        self.discord.get().map(|services| &services.dispatcher)
    }

    pub fn command_cooldown(&self) -> Duration {
        Duration::from_secs(self.config.settings.discord.command_cooldown_seconds)
    }

    /// Drop expired entries from the in-memory caches and cooldowns.
    pub async fn prune_caches(&self) -> usize {
        let mut removed = self.command_cooldowns.prune();
        removed += self.automod.prune();
        removed += self.http.prune_cache().await;
        if let Some(dispatcher) = self.dispatcher() {
            removed += dispatcher.prune().await;
        }
        removed
    }

    /// Call [`AppState::prune_caches`] every `period`.
    pub fn start_pruning(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let state = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let removed = state.prune_caches().await;
                if removed > 0 {
                    debug!(removed, "Pruned expired cache entries");
                }
            }
        })
    }

    /// Wire up the Discord side on the first `ready`: the webhook
    /// dispatcher, cron jobs and feed watcher. Returns false on reconnects.
    pub fn attach_discord(&self, http: Arc<Http>, bot_id: UserId) -> bool {
        let mut first = false;
        let services = self.discord.get_or_init(|| {
            first = true;
            let transport = Arc::new(SerenityTransport::new(Arc::clone(&http)));
            DiscordServices {
                dispatcher: WebhookDispatcher::new(transport, &self.config.settings.webhooks),
                http,
                bot_id,
            }
        });
        if !first {
            return false;
        }

        let settings = &self.config.settings;
        match register_message_jobs(&self.scheduler, &settings.cron, &services.dispatcher) {
            Ok(0) => {}
            Ok(_) => {
                self.scheduler
                    .start(Duration::from_secs(settings.cron.check_seconds.max(1)));
            }
            Err(err) => warn!(error = %err, "Cron jobs not scheduled"),
        }

        if !settings.feeds.is_empty() {
            let seen = match &self.redis {
                Some(store) => SeenStore::redis(Arc::clone(store)),
                None => SeenStore::memory(),
            };
            let watcher = FeedWatcher::new(
                settings.feeds.clone(),
                self.providers.clone(),
                services.dispatcher.clone(),
                seen,
            );
            Arc::new(watcher).start();
        }

        info!(bot_id = %bot_id, "Discord services attached");
        true
    }
}
