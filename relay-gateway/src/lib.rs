pub mod cron;
pub mod discord;
pub mod feeds;
pub mod providers;
pub mod state;
pub mod web;

pub use providers::{ProviderError, Providers};
pub use state::AppState;
