//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use relay_gateway::discord::webhooks::{
    ChannelInfo, ChannelKind, TransportError, WebhookHandle, WebhookPayload, WebhookTransport,
};

pub const BOT_ID: u64 = 42;

/// A message the fake transport "posted".
#[derive(Debug, Clone)]
pub struct Executed {
    pub webhook_id: u64,
    pub webhook_channel: u64,
    pub thread_id: Option<u64>,
    pub thread_name: Option<String>,
    pub payload: WebhookPayload,
}

/// In-memory Discord that records webhook traffic.
#[derive(Default)]
pub struct FakeTransport {
    pub channels: Mutex<HashMap<u64, ChannelKind>>,
    pub webhooks: Mutex<HashMap<u64, Vec<WebhookHandle>>>,
    pub forbidden: Mutex<HashSet<u64>>,
    /// Webhook ids that answer "Unknown Webhook" on execute.
    pub deleted: Mutex<HashSet<u64>>,
    pub executed: Mutex<Vec<Executed>>,
    pub creates: AtomicUsize,
    pub channel_lookups: AtomicUsize,
    pub execute_delay: Option<Duration>,
    next_id: AtomicU64,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1000),
            ..Self::default()
        }
    }

    pub fn with_channel(self, channel_id: u64, kind: ChannelKind) -> Self {
        self.channels.lock().unwrap().insert(channel_id, kind);
        self
    }

    pub fn forbid(&self, channel_id: u64) {
        self.forbidden.lock().unwrap().insert(channel_id);
    }

    pub fn executed(&self) -> Vec<Executed> {
        self.executed.lock().unwrap().clone()
    }

    /// Wait until at least `count` messages were posted, up to a second.
    pub async fn wait_for_executed(&self, count: usize) -> Vec<Executed> {
        for _ in 0..100 {
            let executed = self.executed();
            if executed.len() >= count {
                return executed;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.executed()
    }

    pub fn contents(&self) -> Vec<String> {
        self.executed()
            .into_iter()
            .map(|e| e.payload.content.unwrap_or_default())
            .collect()
    }

    pub fn add_webhook(&self, channel_id: u64, handle: WebhookHandle) {
        self.webhooks
            .lock()
            .unwrap()
            .entry(channel_id)
            .or_default()
            .push(handle);
    }

    fn check_allowed(&self, channel_id: u64) -> Result<(), TransportError> {
        if self.forbidden.lock().unwrap().contains(&channel_id) {
            Err(TransportError::MissingPermissions)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl WebhookTransport for FakeTransport {
    async fn current_user_id(&self) -> Result<u64, TransportError> {
        Ok(BOT_ID)
    }

    async fn channel(&self, channel_id: u64) -> Result<ChannelInfo, TransportError> {
        self.channel_lookups.fetch_add(1, Ordering::SeqCst);
        let kind = self
            .channels
            .lock()
            .unwrap()
            .get(&channel_id)
            .copied()
            .ok_or(TransportError::NotFound)?;
        Ok(ChannelInfo {
            id: channel_id,
            guild_id: Some(1),
            kind,
        })
    }

    async fn list_webhooks(&self, channel_id: u64) -> Result<Vec<WebhookHandle>, TransportError> {
        self.check_allowed(channel_id)?;
        // Give concurrent resolvers a chance to interleave.
        tokio::task::yield_now().await;
        Ok(self
            .webhooks
            .lock()
            .unwrap()
            .get(&channel_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_webhook(
        &self,
        channel_id: u64,
        name: &str,
    ) -> Result<WebhookHandle, TransportError> {
        self.check_allowed(channel_id)?;
        self.creates.fetch_add(1, Ordering::SeqCst);
        let handle = WebhookHandle {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            token: Some("token".to_string()),
            channel_id,
            name: Some(name.to_string()),
            owner_id: Some(BOT_ID),
        };
        self.add_webhook(channel_id, handle.clone());
        Ok(handle)
    }

    async fn execute(
        &self,
        webhook: &WebhookHandle,
        thread_id: Option<u64>,
        thread_name: Option<&str>,
        payload: &WebhookPayload,
    ) -> Result<Option<u64>, TransportError> {
        self.check_allowed(webhook.channel_id)?;
        if self.deleted.lock().unwrap().remove(&webhook.id) {
            self.webhooks
                .lock()
                .unwrap()
                .values_mut()
                .for_each(|hooks| hooks.retain(|h| h.id != webhook.id));
            return Err(TransportError::UnknownWebhook);
        }
        if let Some(delay) = self.execute_delay {
            tokio::time::sleep(delay).await;
        }
        let mut executed = self.executed.lock().unwrap();
        executed.push(Executed {
            webhook_id: webhook.id,
            webhook_channel: webhook.channel_id,
            thread_id,
            thread_name: thread_name.map(str::to_string),
            payload: payload.clone(),
        });
        Ok(Some(executed.len() as u64))
    }
}

/// HTTP client for tests against a mock server.
pub fn http_client(cache_ttl_seconds: u64) -> relay_gateway::web::HttpClient {
    relay_gateway::web::HttpClient::new(&relay_core::HttpSettings {
        user_agent: "relay-tests".into(),
        timeout_seconds: 5,
        max_retries: 2,
        cache_ttl_seconds,
    })
    .expect("http client")
}
