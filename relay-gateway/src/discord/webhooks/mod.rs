//! Webhook dispatch: ordered per-channel queues that post through
//! bot-managed webhooks, with batching and thread/forum redirection.

pub mod payload;
pub mod queue;
pub mod transport;

pub use payload::{WebhookFile, WebhookPayload};
pub use queue::{DispatchOutcome, DispatchTarget, SkipReason, WebhookDispatcher};
pub use transport::{
    ChannelInfo, ChannelKind, SerenityTransport, TransportError, WebhookHandle, WebhookTransport,
};
