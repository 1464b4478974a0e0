//! Keyed cache stores.
//!
//! Stores never evict. An entry is replaced only by an explicit refresh for
//! its key, or amended in place when a relation field is attached after the
//! base fetch.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use gxcert_core::{
    Address, CertId, Certificate, ContentId, Grant, GrantId, Group, GroupId, Profile,
};
use tokio::sync::RwLock;

/// A single keyed store.
#[derive(Debug)]
pub struct KeyedStore<K, V> {
    entries: RwLock<HashMap<K, V>>,
}

impl<K, V> Default for KeyedStore<K, V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> KeyedStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        self.entries.read().await.get(key).cloned()
    }

    pub async fn contains(&self, key: &K) -> bool {
        self.entries.read().await.contains_key(key)
    }

    /// Write `value`, replacing any prior entry.
    pub async fn put(&self, key: K, value: V) {
        self.entries.write().await.insert(key, value);
    }

    /// Write `value` only if `key` is unknown. Returns whether it was written.
    pub async fn insert_if_absent(&self, key: K, value: V) -> bool {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&key) {
            return false;
        }
        entries.insert(key, value);
        true
    }

    /// Amend an existing entry in place. Returns the amended value, or `None`
    /// when the key is unknown.
    pub async fn update<F>(&self, key: &K, amend: F) -> Option<V>
    where
        F: FnOnce(&mut V),
    {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(key)?;
        amend(entry);
        Some(entry.clone())
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Full contents, as carried by store-update notifications.
    pub async fn snapshot(&self) -> HashMap<K, V> {
        self.entries.read().await.clone()
    }
}

/// Every store owned by a manager.
///
/// Held behind an `Arc` so background hydration and managers constructed over
/// the same cache can share it.
#[derive(Debug, Default)]
pub struct CacheStores {
    pub profiles: KeyedStore<Address, Profile>,
    pub groups: KeyedStore<GroupId, Group>,
    /// owner → groups the owner belongs to
    pub groups_by_owner: KeyedStore<Address, Vec<Group>>,
    pub certificates: KeyedStore<CertId, Certificate>,
    /// group → certificates the group issued
    pub group_certificates: KeyedStore<GroupId, Vec<Certificate>>,
    pub grants: KeyedStore<GrantId, Grant>,
    /// certificate → grants issued for it
    pub issued_grants: KeyedStore<CertId, Vec<Grant>>,
    /// recipient → grants received
    pub received_grants: KeyedStore<Address, Vec<Grant>>,
    /// content id → resolved URL
    pub images: KeyedStore<ContentId, String>,
}

impl CacheStores {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Base resolutions served from a store.
    pub hits: u64,
    /// Base resolutions that went to the remote source.
    pub misses: u64,
    /// Calls issued to a remote source, including index lookups.
    pub remote_fetches: u64,
    /// Calls issued to the blob fetcher.
    pub image_fetches: u64,
    /// Blob fetches that failed and left an empty image field.
    pub image_failures: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    remote_fetches: AtomicU64,
    image_fetches: AtomicU64,
    image_failures: AtomicU64,
}

impl CacheCounters {
    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn remote_fetch(&self) {
        self.remote_fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn image_fetch(&self) {
        self.image_fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn image_failure(&self) {
        self.image_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            remote_fetches: self.remote_fetches.load(Ordering::Relaxed),
            image_fetches: self.image_fetches.load(Ordering::Relaxed),
            image_failures: self.image_failures.load(Ordering::Relaxed),
        }
    }
}
