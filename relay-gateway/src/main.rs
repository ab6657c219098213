use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relay_cache::RedisStore;
use relay_gateway::discord::start_discord_bot;
use relay_gateway::state::{AppState, PRUNE_PERIOD};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    relay_core::load_dotenv();

    // Load configuration first so logging.level can seed the filter
    let config = relay_core::Config::load()?;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.settings.logging.level.as_str().into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        bridge_links = config.settings.bridge.links.len(),
        cron_jobs = config.settings.cron.jobs.len(),
        tickets = config.settings.tickets.enabled,
        "Configuration loaded"
    );

    let redis = match config.redis_url() {
        Some(url) => match RedisStore::connect(url, config.settings.redis.key_prefix.clone()).await
        {
            Ok(store) => {
                info!("Connected to Redis");
                Some(Arc::new(store))
            }
            Err(e) => {
                warn!("Redis unavailable, feed state stays in memory: {}", e);
                None
            }
        },
        None => None,
    };

    let discord_token = config.discord_bot_token().map(|s| s.to_string());
    let discord_enabled = config.discord_enabled();
    let state = Arc::new(AppState::new(config, redis)?);

    if !discord_enabled {
        info!("Discord bot not configured (set DISCORD_BOT_TOKEN and enable in config to enable)");
        return Ok(());
    }

    let Some(mut client) = start_discord_bot(discord_token, Arc::clone(&state)).await? else {
        info!("Discord bot not started");
        return Ok(());
    };
    info!("Discord bot started");
    state.start_pruning(PRUNE_PERIOD);

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down");
            shard_manager.shutdown_all().await;
        }
    });

    client.start().await?;
    Ok(())
}
