//! The purge scheduler: a single recurring task that sweeps the expiry
//! index, bounded to the count of currently-due entries per sweep.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::expiry::ExpiryIndex;
use crate::keyspace::KeyspaceStore;
use crate::time::now_millis;

/// One sweep: pop every heap entry whose timestamp is due, dropping stale
/// entries and deleting keys whose live record confirms the expiry.
pub async fn purge_sweep(keyspace: &KeyspaceStore, expiry: &ExpiryIndex, now_ms: i64) -> usize {
    let mut purged = 0;
    loop {
        match expiry.peek().await {
            Some((ts, _)) if ts <= now_ms => {}
            _ => break,
        }
        let Some((_, key)) = expiry.pop().await else {
            break;
        };
        if let Some(current_expiry) = keyspace.current_expiry(&key).await {
            if current_expiry <= now_ms {
                keyspace.delete(&key).await;
                purged += 1;
            }
            // otherwise the heap entry was stale (re-SET moved the expiry
            // later); drop it without touching the keyspace.
        }
    }
    purged
}

/// Spawns the recurring sweep task. Mirrors the teacher's one-task-per-shared-
/// concern spawn style (`ClientConnector::begin`, `ClientPool::begin`): takes
/// ownership of `Arc` handles and runs until the runtime shuts down.
pub fn spawn_purge_scheduler(
    keyspace: Arc<KeyspaceStore>,
    expiry: Arc<ExpiryIndex>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let now = now_millis();
            let purged = purge_sweep(&keyspace, &expiry, now).await;
            if purged > 0 {
                debug!(purged, "purge sweep evicted expired keys");
            }
        }
    })
}
