use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// In-process TTL cache for read-heavy aggregates. Each entry carries its own
/// expiry instant; `get` never returns a value past its TTL, with or without
/// the background sweep.
pub struct Cache<V> {
    entries: DashMap<String, CacheEntry<V>>,
}

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

// Keys compose a namespace with every parameter that scopes the value.
pub fn compose_key(namespace: &str, parts: &[&str]) -> String {
    let mut key = String::from(namespace);
    for part in parts {
        key.push(':');
        key.push_str(part);
    }
    key
}

impl<V: Clone + Send + Sync + 'static> Cache<V> {
    pub fn new() -> Cache<V> {
        Cache {
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        match self.entries.get(key) {
            None => return None,
            Some(entry) => {
                if Instant::now() < entry.expires_at {
                    return Some(entry.value.clone());
                }
            }
        }
        // Expired: lazily evict, but only if nobody replaced it meanwhile.
        self.entries
            .remove_if(key, |_, entry| entry.expires_at <= Instant::now());
        None
    }

    pub fn set(&self, key: &str, value: V, ttl: Duration) {
        self.entries.insert(
            key.to_owned(),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Drop every expired entry so memory stays bounded between reads.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    pub fn start_sweep_task(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                self.sweep();
            }
        })
    }
}

impl<V: Clone + Send + Sync + 'static> Default for Cache<V> {
    fn default() -> Self {
        Cache::new()
    }
}
