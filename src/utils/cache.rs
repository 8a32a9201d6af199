use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Values that expire `ttl` after insertion, measured on an injected clock.
pub struct TimedCache<K, V> {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<K, (DateTime<Utc>, V)>>,
}

impl<K, V> TimedCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().ok()?;
        let lookup = entries
            .get(key)
            .map(|(stored_at, value)| (!self.expired(*stored_at, now)).then(|| value.clone()));
        match lookup {
            Some(Some(value)) => Some(value),
            Some(None) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: K, value: V) {
        let now = self.clock.now();
        if let Ok(mut entries) = self.entries.lock() {
            entries.retain(|_, (stored_at, _)| !self.expired(*stored_at, now));
            entries.insert(key, (now, value));
        }
    }

    pub fn invalidate_all(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    fn expired(&self, stored_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match (now - stored_at).to_std() {
            Ok(age) => age >= self.ttl,
            // clock went backwards
            Err(_) => false,
        }
    }
}
