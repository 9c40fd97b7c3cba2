//! In-memory discovery network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::resolver::{DiscoveryNetwork, DiscoveryTopic, JoinMode, ReplicatedLog};
use crate::{PublicKey, Result};
use async_trait::async_trait;
use serde_json::Value;

type Published = Arc<Mutex<HashMap<PublicKey, Vec<Value>>>>;

/// A discovery network where every log lives in one shared map.
///
/// Replicas only see new entries after [`ReplicatedLog::update`], which makes
/// stale cached data observable in tests.
#[derive(Clone, Default)]
pub struct MemoryDiscovery {
    published: Published,
    replicas: Arc<Mutex<HashMap<PublicKey, Arc<MemoryLog>>>>,
    joins: Arc<AtomicUsize>,
    join_delay: Option<Duration>,
}

impl MemoryDiscovery {
    /// An empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every join by `delay`, simulating a slow network.
    pub fn with_join_delay(mut self, delay: Duration) -> Self {
        self.join_delay = Some(delay);
        self
    }

    /// Append `entry` to the network copy of `key`'s log without touching
    /// any local replica.
    pub fn publish(&self, key: &PublicKey, entry: Value) {
        self.published
            .lock()
            .unwrap()
            .entry(*key)
            .or_default()
            .push(entry);
    }

    /// Give the local replica of `key` stale `entries`.
    pub fn seed_replica(&self, key: &PublicKey, entries: Vec<Value>) {
        let log = self.replica(key);
        *log.entries.lock().unwrap() = entries;
    }

    /// Number of topic joins so far.
    pub fn join_count(&self) -> usize {
        self.joins.load(Ordering::SeqCst)
    }

    fn replica(&self, key: &PublicKey) -> Arc<MemoryLog> {
        self.replicas
            .lock()
            .unwrap()
            .entry(*key)
            .or_insert_with(|| {
                Arc::new(MemoryLog {
                    key: *key,
                    entries: Mutex::new(Vec::new()),
                    published: self.published.clone(),
                })
            })
            .clone()
    }
}

#[async_trait]
impl DiscoveryNetwork for MemoryDiscovery {
    async fn open_log(&self, key: &PublicKey) -> Result<Arc<dyn ReplicatedLog>> {
        Ok(self.replica(key))
    }

    async fn join(&self, _topic: &DiscoveryTopic, _mode: JoinMode) -> Result<()> {
        self.joins.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.join_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

struct MemoryLog {
    key: PublicKey,
    entries: Mutex<Vec<Value>>,
    published: Published,
}

#[async_trait]
impl ReplicatedLog for MemoryLog {
    async fn len(&self) -> Result<u64> {
        Ok(self.entries.lock().unwrap().len() as u64)
    }

    async fn latest(&self) -> Result<Option<Value>> {
        Ok(self.entries.lock().unwrap().last().cloned())
    }

    async fn append(&self, entry: Value) -> Result<()> {
        self.published
            .lock()
            .unwrap()
            .entry(self.key)
            .or_default()
            .push(entry.clone());
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }

    async fn update(&self) -> Result<()> {
        let fresh = self
            .published
            .lock()
            .unwrap()
            .get(&self.key)
            .cloned()
            .unwrap_or_default();
        *self.entries.lock().unwrap() = fresh;
        Ok(())
    }
}
