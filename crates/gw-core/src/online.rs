use std::time::Duration;

use tokio::sync::mpsc;

use crate::bucket::BucketManager;

/// A presence delta for one user: the full set of platforms it is online on
/// right now (not just what changed), so the downstream consumer's state is
/// self-correcting even if an update is missed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserStateUpdate {
    pub user_id: String,
    pub online_platform_ids: Vec<i32>,
}

/// Coalesces presence deltas into size- or time-bounded batches before they
/// reach the downstream user-service RPC, so a user flapping rapidly online
/// across several platforms produces one batched call instead of many. Each
/// worker owns its own inbox so a slow downstream call for one shard never
/// head-of-line blocks updates routed to another.
pub struct OnlineStatusBatcher {
    inboxes: Vec<mpsc::Sender<UserStateUpdate>>,
    /// Randomized per-process so that presence updates for a given user id
    /// do not pile onto the same downstream shard across every process in
    /// a fleet running this same routing function.
    shard_offset: u64,
}

const WORKER_BATCH_CAP: usize = 100;

impl OnlineStatusBatcher {
    /// `downstream` receives completed batches; a separate task (owned by
    /// the caller) is expected to drain it and perform the actual RPC call,
    /// keeping this crate free of any concrete back-end transport.
    pub fn new(
        concurrency: usize,
        merge_tick: Duration,
        inbox_depth: usize,
        downstream: mpsc::Sender<Vec<UserStateUpdate>>,
        shard_offset: u64,
    ) -> Self {
        let concurrency = concurrency.max(1);
        let mut inboxes = Vec::with_capacity(concurrency);
        for _ in 0..concurrency {
            let (tx, rx) = mpsc::channel(inbox_depth.max(1));
            inboxes.push(tx);
            tokio::spawn(Self::worker_loop(rx, merge_tick, downstream.clone()));
        }
        Self { inboxes, shard_offset }
    }

    async fn worker_loop(
        mut rx: mpsc::Receiver<UserStateUpdate>,
        merge_tick: Duration,
        downstream: mpsc::Sender<Vec<UserStateUpdate>>,
    ) {
        let mut pending: Vec<UserStateUpdate> = Vec::with_capacity(WORKER_BATCH_CAP);
        let mut ticker = tokio::time::interval(merge_tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                maybe_update = rx.recv() => {
                    match maybe_update {
                        Some(update) => {
                            pending.push(update);
                            if pending.len() >= WORKER_BATCH_CAP {
                                let batch = std::mem::replace(&mut pending, Vec::with_capacity(WORKER_BATCH_CAP));
                                let _ = downstream.send(batch).await;
                            }
                        }
                        None => {
                            if !pending.is_empty() {
                                let _ = downstream.send(std::mem::take(&mut pending)).await;
                            }
                            return;
                        }
                    }
                }
                _ = ticker.tick() => {
                    if !pending.is_empty() {
                        let batch = std::mem::replace(&mut pending, Vec::with_capacity(WORKER_BATCH_CAP));
                        let _ = downstream.send(batch).await;
                    }
                }
            }
        }
    }

    fn route(&self, user_id: &str) -> usize {
        let h = crc32fast::hash(user_id.as_bytes()) as u64;
        ((h.wrapping_add(self.shard_offset)) as usize) % self.inboxes.len()
    }

    /// Queue a presence delta; non-blocking -- if the target worker's inbox
    /// is saturated the update is dropped (the next renewal pass will
    /// re-derive current state anyway).
    pub fn ingest(&self, update: UserStateUpdate) {
        let idx = self.route(&update.user_id);
        if self.inboxes[idx].try_send(update).is_err() {
            tracing::warn!("online status batcher worker inbox full, update dropped");
        }
    }
}

/// Scan every bucket for users active within `window` and emit their
/// current online-platform set. Run on a periodic renewal ticker so the
/// downstream user-service's cached presence state never silently expires
/// for a user who has had no register/unregister churn recently.
pub fn collect_renewal_snapshot(manager: &BucketManager, window: Duration) -> Vec<UserStateUpdate> {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let window_secs = window.as_secs() as i64;

    let mut updates = Vec::new();
    for bucket in manager.all_buckets() {
        for user_id in bucket.all_user_ids() {
            let Some(entry) = bucket.user_platforms_entry(&user_id) else {
                continue;
            };
            if now - entry.last_active_epoch_secs() > window_secs {
                continue;
            }
            updates.push(UserStateUpdate {
                user_id,
                online_platform_ids: entry.online_platform_ids(),
            });
        }
    }
    updates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn batcher_flushes_when_worker_batch_cap_is_reached() {
        let (tx, mut rx) = mpsc::channel(8);
        let batcher = OnlineStatusBatcher::new(1, Duration::from_secs(60), 512, tx, 0);
        for i in 0..WORKER_BATCH_CAP {
            batcher.ingest(UserStateUpdate {
                user_id: format!("u{i}"),
                online_platform_ids: vec![1],
            });
        }
        let batch = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("batch should arrive")
            .expect("channel open");
        assert_eq!(batch.len(), WORKER_BATCH_CAP);
    }

    #[tokio::test]
    async fn batcher_flushes_on_merge_tick_even_if_not_full() {
        let (tx, mut rx) = mpsc::channel(8);
        let batcher = OnlineStatusBatcher::new(1, Duration::from_millis(20), 512, tx, 0);
        batcher.ingest(UserStateUpdate {
            user_id: "u1".to_owned(),
            online_platform_ids: vec![2],
        });
        let batch = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("batch should arrive on tick")
            .expect("channel open");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].user_id, "u1");
    }

    #[tokio::test]
    async fn same_user_id_always_routes_to_same_worker() {
        let (tx, _rx) = mpsc::channel(8);
        let batcher = OnlineStatusBatcher::new(4, Duration::from_secs(60), 8, tx, 7);
        let idx1 = batcher.route("stable-user");
        let idx2 = batcher.route("stable-user");
        assert_eq!(idx1, idx2);
    }
}
