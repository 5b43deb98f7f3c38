//! Company research cache.
//!
//! Keyed, TTL'd store for expensive external lookups with a completeness
//! flag and a merge-on-supplement policy. A `full` entry is reusable while
//! fresh; a `partial` entry is always worth supplementing regardless of age,
//! because incompleteness outranks staleness. Profile text is expensive to
//! regenerate, contact discovery is cheap and incremental, so a profile-only
//! hit never forces a full re-fetch.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::StageError;
use crate::models::company::{Contact, ResearchPayload};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Completeness {
    Partial,
    Full,
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub payload: ResearchPayload,
    pub completeness: Completeness,
    pub fetched_at: DateTime<Utc>,
}

pub struct ResearchCache {
    ttl: Duration,
    min_contacts_full: usize,
    entries: Mutex<HashMap<String, CacheEntry>>,
    /// Per-key locks serializing read-modify-write in `resolve`; concurrent
    /// resolvers for one key never interleave, so a supplement always merges
    /// into the entry it read.
    key_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ResearchCache {
    pub fn new(ttl_secs: u64, min_contacts_full: usize) -> Self {
        Self {
            ttl: Duration::seconds(ttl_secs as i64),
            min_contacts_full,
            entries: Mutex::new(HashMap::new()),
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the entry for `key`, discarding it as a miss if its payload
    /// fails the integrity check.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some(entry) if entry.payload.is_valid() => Some(entry.clone()),
            Some(_) => {
                warn!(key, "{}", StageError::CacheCorruption(key.to_string()));
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: &str, payload: ResearchPayload, completeness: Completeness) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            key.to_string(),
            CacheEntry {
                payload,
                completeness,
                fetched_at: Utc::now(),
            },
        );
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.key_locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(key.to_string()).or_default())
    }

    fn classify(&self, payload: &ResearchPayload) -> Completeness {
        if payload.contacts.len() >= self.min_contacts_full {
            Completeness::Full
        } else {
            Completeness::Partial
        }
    }

    /// The composed policy used by company enrichment:
    ///
    /// 1. absent, corrupt, or stale `full` entry: fetch fully and store;
    /// 2. fresh `full` entry: return it with no external call;
    /// 3. `partial` entry at any age: fetch only the supplement, merge the
    ///    discovered contacts (de-duplicated, first-seen order), refresh the
    ///    TTL, and promote to `full` once the contact threshold is crossed.
    pub async fn resolve<F, FutF, S, FutS>(
        &self,
        key: &str,
        fetch_full: F,
        fetch_supplement: S,
    ) -> Result<ResearchPayload, StageError>
    where
        F: FnOnce() -> FutF,
        FutF: Future<Output = Result<ResearchPayload, StageError>>,
        S: FnOnce(ResearchPayload) -> FutS,
        FutS: Future<Output = Result<Vec<Contact>, StageError>>,
    {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        match self.get(key) {
            Some(entry) if entry.completeness == Completeness::Partial => {
                debug!(key, "supplementing partial research entry");
                let mut payload = entry.payload.clone();
                let discovered = fetch_supplement(entry.payload).await?;
                let added = payload.merge_contacts(discovered);
                let completeness = self.classify(&payload);
                debug!(key, added, ?completeness, "supplement merged");
                self.put(key, payload.clone(), completeness);
                Ok(payload)
            }
            Some(entry) if Utc::now() - entry.fetched_at < self.ttl => {
                debug!(key, "research cache hit");
                Ok(entry.payload)
            }
            _ => {
                debug!(key, "research cache miss, fetching fully");
                let payload = fetch_full().await?;
                let completeness = self.classify(&payload);
                self.put(key, payload.clone(), completeness);
                Ok(payload)
            }
        }
    }
}
