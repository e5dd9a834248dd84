//! The concurrent keyspace: a byte-string key to value-record map.
//!
//! Reads run concurrently with each other; any mutation (set, delete, or the
//! lazy delete a read triggers on an expired key) takes the map exclusively.
//! A [`ValueRecord`] is immutable after insertion — updates replace it wholesale.

use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::time::NEVER;

#[derive(Debug, Clone)]
pub struct ValueRecord {
    pub data: Vec<u8>,
    pub expiry_ms: i64,
}

impl ValueRecord {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expiry_ms != NEVER && self.expiry_ms <= now_ms
    }
}

#[derive(Default)]
pub struct KeyspaceStore {
    map: RwLock<HashMap<Vec<u8>, ValueRecord>>,
}

impl KeyspaceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, key: Vec<u8>, data: Vec<u8>, expiry_ms: i64) {
        let mut map = self.map.write().await;
        map.insert(key, ValueRecord { data, expiry_ms });
    }

    /// Reads a live value, lazily deleting and reporting absence if the
    /// stored record has already expired.
    pub async fn get(&self, key: &[u8], now_ms: i64) -> Option<Vec<u8>> {
        {
            let map = self.map.read().await;
            match map.get(key) {
                Some(rec) if !rec.is_expired(now_ms) => return Some(rec.data.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        self.delete(key).await;
        None
    }

    /// Same lazy-expiry discipline as `get`, without cloning the payload.
    pub async fn exists(&self, key: &[u8], now_ms: i64) -> bool {
        {
            let map = self.map.read().await;
            match map.get(key) {
                Some(rec) if !rec.is_expired(now_ms) => return true,
                Some(_) => {}
                None => return false,
            }
        }
        self.delete(key).await;
        false
    }

    pub async fn delete(&self, key: &[u8]) -> bool {
        let mut map = self.map.write().await;
        map.remove(key).is_some()
    }

    /// Current expiry timestamp of a key, if present, without mutating
    /// anything. Used by the purge scheduler to cross-check a stale heap
    /// entry against the live record before deleting it.
    pub async fn current_expiry(&self, key: &[u8]) -> Option<i64> {
        let map = self.map.read().await;
        map.get(key).map(|rec| rec.expiry_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::now_millis;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let store = KeyspaceStore::new();
        store.set(b"foo".to_vec(), b"bar".to_vec(), NEVER).await;
        assert_eq!(store.get(b"foo", now_millis()).await, Some(b"bar".to_vec()));
    }

    #[tokio::test]
    async fn set_twice_replaces_value() {
        let store = KeyspaceStore::new();
        store.set(b"k".to_vec(), b"v".to_vec(), NEVER).await;
        store.set(b"k".to_vec(), b"w".to_vec(), NEVER).await;
        assert_eq!(store.get(b"k", now_millis()).await, Some(b"w".to_vec()));
    }

    #[tokio::test]
    async fn get_on_expired_key_deletes_and_returns_none() {
        let store = KeyspaceStore::new();
        let now = now_millis();
        store.set(b"k".to_vec(), b"v".to_vec(), now - 1).await;
        assert_eq!(store.get(b"k", now).await, None);
        assert!(!store.exists(b"k", now).await);
    }

    #[tokio::test]
    async fn delete_reports_whether_something_was_removed() {
        let store = KeyspaceStore::new();
        store.set(b"k".to_vec(), b"v".to_vec(), NEVER).await;
        assert!(store.delete(b"k").await);
        assert!(!store.delete(b"k").await);
    }

    #[tokio::test]
    async fn exists_counts_only_live_keys() {
        let store = KeyspaceStore::new();
        let now = now_millis();
        store.set(b"a".to_vec(), b"1".to_vec(), NEVER).await;
        store.set(b"b".to_vec(), b"1".to_vec(), now - 1).await;
        assert!(store.exists(b"a", now).await);
        assert!(!store.exists(b"b", now).await);
    }
}
