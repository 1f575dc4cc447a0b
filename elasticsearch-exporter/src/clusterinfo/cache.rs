use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use prometheus::{register_int_gauge, IntGauge};
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use super::{same_allocation, MetadataRetriever, Retriever, RetrieverProvider};
use crate::client::redacted;
use crate::config::ClusterInfoConfig;

static RETRIEVERS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "elasticsearch_clusterinfo_retrievers",
        "Number of cluster info retrievers currently cached, one per scraped target."
    )
    .expect("elasticsearch_clusterinfo_retrievers is registered once")
});

struct Entry {
    retriever: Arc<Retriever>,
    last_used: Instant,
}

impl Entry {
    /// A scrape still holds a handle besides the cache's own.
    fn in_use(&self) -> bool {
        Arc::strong_count(&self.retriever) > 1
    }
}

/// Retrievers keyed by target URL. Entries idle for longer than the idle timeout are dropped,
/// and the least recently used entry makes room once the cache is full, preferring entries no
/// scrape is using. A retriever leaving the cache keeps serving the scrapes that hold it and
/// stops when the last of them drops it. Every retriever stops when the root token is cancelled.
pub struct RetrieverCache {
    client: Client,
    interval: Duration,
    bootstrap_timeout: Duration,
    idle_timeout: Duration,
    max_entries: usize,
    root: CancellationToken,
    entries: Mutex<HashMap<String, Entry>>,
}

impl RetrieverCache {
    pub fn new(client: Client, config: &ClusterInfoConfig, root: CancellationToken) -> Self {
        Self {
            client,
            interval: config.interval.0,
            bootstrap_timeout: config.bootstrap_timeout.0,
            idle_timeout: config.idle_timeout.0,
            max_entries: config.max_retrievers.max(1),
            root,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evicted(key: &str, entry: &Entry, why: &'static str) {
        debug!(
            url = %redacted_key(key),
            reason = why,
            in_use = entry.in_use(),
            "evicting cluster info retriever"
        );
    }

    fn evict_idle(&self, entries: &mut HashMap<String, Entry>, now: Instant) {
        entries.retain(|key, entry| {
            let keep = now.duration_since(entry.last_used) < self.idle_timeout;
            if !keep {
                Self::evicted(key, entry, "idle");
            }
            keep
        });
    }

    fn evict_least_recently_used(entries: &mut HashMap<String, Entry>) {
        let oldest = entries
            .iter()
            .min_by_key(|(_, entry)| (entry.in_use(), entry.last_used))
            .map(|(key, _)| key.clone());

        if let Some(key) = oldest {
            if let Some(entry) = entries.remove(&key) {
                Self::evicted(&key, &entry, "capacity");
            }
        }
    }
}

fn redacted_key(key: &str) -> String {
    Url::parse(key).map_or_else(|_| key.to_owned(), |url| redacted(&url))
}

impl RetrieverProvider for RetrieverCache {
    fn retriever(&self, target: &Url) -> Arc<dyn MetadataRetriever> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        self.evict_idle(&mut entries, now);
        RETRIEVERS.set(entries.len() as i64);

        if let Some(entry) = entries.get_mut(target.as_str()) {
            if !entry.retriever.is_stopped() {
                entry.last_used = now;
                return entry.retriever.clone();
            }
        }

        while entries.len() >= self.max_entries {
            Self::evict_least_recently_used(&mut entries);
        }

        let retriever = Arc::new(Retriever::new(
            self.client.clone(),
            target.clone(),
            self.interval,
            self.bootstrap_timeout,
            self.root.child_token(),
        ));
        debug!(url = %redacted(target), "created cluster info retriever");

        entries.insert(
            target.as_str().to_owned(),
            Entry {
                retriever: retriever.clone(),
                last_used: now,
            },
        );
        RETRIEVERS.set(entries.len() as i64);

        retriever
    }

    fn invalidate(&self, target: &Url, failed: &Arc<dyn MetadataRetriever>) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        let cached = entries
            .get(target.as_str())
            .is_some_and(|entry| same_allocation(&entry.retriever, failed));
        if cached {
            if let Some(entry) = entries.remove(target.as_str()) {
                Self::evicted(target.as_str(), &entry, "invalidated");
            }
        }
        RETRIEVERS.set(entries.len() as i64);
    }
}
