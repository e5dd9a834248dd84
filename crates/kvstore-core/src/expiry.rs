//! The expiry index: a mutex-guarded min-heap of (expiry-timestamp, key)
//! pairs driving lazy and periodic purging.
//!
//! Entries are append-only on SET — updating a key's expiry does not remove
//! the stale heap entry left by a prior SET. Staleness is reconciled at
//! purge time by cross-checking the live record, keeping writes O(log n)
//! without indexing back into the heap.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use tokio::sync::Mutex;

type Entry = Reverse<(i64, Vec<u8>)>;

#[derive(Default)]
pub struct ExpiryIndex {
    heap: Mutex<BinaryHeap<Entry>>,
}

impl ExpiryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, expiry_ms: i64, key: Vec<u8>) {
        let mut heap = self.heap.lock().await;
        heap.push(Reverse((expiry_ms, key)));
    }

    pub async fn peek(&self) -> Option<(i64, Vec<u8>)> {
        let heap = self.heap.lock().await;
        heap.peek().map(|Reverse((ts, key))| (*ts, key.clone()))
    }

    pub async fn pop(&self) -> Option<(i64, Vec<u8>)> {
        let mut heap = self.heap.lock().await;
        heap.pop().map(|Reverse(entry)| entry)
    }
}
