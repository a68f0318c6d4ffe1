//! In-memory key/value store
//!
//! Backs tests and single-process deployments. Entries expire lazily against
//! the tokio clock, so paused-clock tests can drive window boundaries
//! deterministically. Single-key operations are atomic through the map's
//! per-entry locking.

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::{Duration, Instant};

use super::KvStore;
use crate::{HubError, Result};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: String, ttl_secs: u64) -> Self {
        let expires_at = if ttl_secs == 0 {
            None
        } else {
            Some(Instant::now() + Duration::from_secs(ttl_secs))
        };
        Self { value, expires_at }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Concurrent in-memory store honouring SETNX/INCR/TTL semantics
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| !entry.value().is_expired())
            .count()
    }

    /// Whether the store holds no live entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn parse_counter(value: &str) -> Result<i64> {
        value
            .parse::<i64>()
            .map_err(|_| HubError::Store(format!("value is not an integer: {value}")))
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => Ok(Some(entry.value.clone())),
            _ => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        self.entries
            .insert(key.to_string(), Entry::new(value.to_string(), ttl_secs));
        Ok(())
    }

    async fn setnx(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        let mut set = false;
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| {
                set = true;
                Entry::new(value.to_string(), ttl_secs)
            });
        if !set && entry.is_expired() {
            *entry = Entry::new(value.to_string(), ttl_secs);
            set = true;
        }
        Ok(set)
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        self.incrby(key, 1).await
    }

    async fn incrby(&self, key: &str, delta: i64) -> Result<i64> {
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new("0".to_string(), 0));
        if entry.is_expired() {
            *entry = Entry::new("0".to_string(), 0);
        }
        let next = Self::parse_counter(&entry.value)? + delta;
        entry.value = next.to_string();
        Ok(next)
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let matches: Vec<String> = match pattern.strip_suffix('*') {
            Some(prefix) => self
                .entries
                .iter()
                .filter(|entry| !entry.value().is_expired() && entry.key().starts_with(prefix))
                .map(|entry| entry.key().clone())
                .collect(),
            None => self
                .entries
                .get(pattern)
                .filter(|entry| !entry.is_expired())
                .map(|entry| vec![entry.key().clone()])
                .unwrap_or_default(),
        };
        Ok(matches)
    }

    async fn ping(&self) -> Result<bool> {
        Ok(true)
    }
}
