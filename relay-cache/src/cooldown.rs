//! Expiring key sets for per-user and per-event cooldowns.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// A set of keys that each leave the set once their cooldown runs out.
///
/// Synchronous on purpose: every operation is a map lookup, so callers can
/// use it from event handlers without awaiting.
#[derive(Debug)]
pub struct Cooldowns<K> {
    until: Mutex<HashMap<K, Instant>>,
}

impl<K> Cooldowns<K>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            until: Mutex::new(HashMap::new()),
        }
    }

    /// Put `key` on cooldown for `duration` unless it already is.
    ///
    /// Returns the time left when the key is still cooling down.
    pub fn try_acquire(&self, key: K, duration: Duration) -> Result<(), Duration> {
        let now = Instant::now();
        let mut until = self.until.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(expires) = until.get(&key)
            && *expires > now
        {
            return Err(*expires - now);
        }
        until.insert(key, now + duration);
        Ok(())
    }

    /// Time left on `key`'s cooldown, if any.
    pub fn remaining(&self, key: &K) -> Option<Duration> {
        let now = Instant::now();
        let until = self.until.lock().unwrap_or_else(PoisonError::into_inner);
        until
            .get(key)
            .and_then(|expires| expires.checked_duration_since(now))
            .filter(|left| !left.is_zero())
    }

    pub fn reset(&self, key: &K) {
        let mut until = self.until.lock().unwrap_or_else(PoisonError::into_inner);
        until.remove(key);
    }

    /// Forget keys whose cooldown has run out.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let mut until = self.until.lock().unwrap_or_else(PoisonError::into_inner);
        let before = until.len();
        until.retain(|_, expires| *expires > now);
        before - until.len()
    }
}

impl<K> Default for Cooldowns<K>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}
