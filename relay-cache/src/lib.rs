//! relay-cache: small caches used across the relay bot.
//!
//! This crate provides:
//! - `TimedCache`, an in-memory map whose entries expire after a TTL
//! - `Cooldowns`, expiring key sets for rate-limiting users and events
//! - `RedisStore`, a JSON key/value and set store backed by Redis

pub mod cooldown;
pub mod error;
pub mod redis_store;
pub mod timed;

pub use cooldown::Cooldowns;
pub use error::{CacheError, CacheResult};
pub use redis_store::RedisStore;
pub use timed::TimedCache;
