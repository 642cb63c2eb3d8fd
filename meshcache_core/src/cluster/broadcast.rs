//! Background fan-out of join announcements
//!
//! Announcements run as tracked tasks so that shutdown can wait for them or
//! cancel them explicitly. A semaphore caps how many are in flight at once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::cluster::Peer;
use crate::log::log_cluster_operation;
use crate::metrics;

/// Counters for announcements sent by one node
#[derive(Debug, Default)]
pub struct BroadcastStats {
    pub sent: AtomicU64,
    pub failed: AtomicU64,
}

/// Bounded pool of announcement tasks
pub struct Broadcaster {
    tracker: TaskTracker,
    cancel: CancellationToken,
    permits: Arc<Semaphore>,
    stats: Arc<BroadcastStats>,
    // Set once by shutdown; guards reopening the tracker after quiesce
    shut_down: Mutex<bool>,
}

impl Broadcaster {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            stats: Arc::new(BroadcastStats::default()),
            shut_down: Mutex::new(false),
        }
    }

    /// Tell `peer` that `address` joined, without waiting for the outcome.
    pub fn announce<V: 'static>(&self, peer: Arc<dyn Peer<V>>, address: String) {
        if self.is_shut_down() {
            tracing::debug!(peer = peer.addr(), %address, "Broadcaster closed, dropping announcement");
            return;
        }

        let cancel = self.cancel.clone();
        let permits = Arc::clone(&self.permits);
        let stats = Arc::clone(&self.stats);

        self.tracker.spawn(async move {
            let _permit = tokio::select! {
                _ = cancel.cancelled() => return,
                permit = permits.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };

            let start_time = Instant::now();
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = peer.connect(&address) => result,
            };

            let duration = start_time.elapsed();
            match result {
                Ok(()) => {
                    stats.sent.fetch_add(1, Ordering::Relaxed);
                    metrics::record_announcement(true);
                    log_cluster_operation("announce", peer.addr(), true, duration, None);
                }
                Err(e) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    metrics::record_announcement(false);
                    let detail = format!("announcing {}: {}", address, e);
                    log_cluster_operation("announce", peer.addr(), false, duration, Some(&detail));
                }
            }
        });
    }

    /// Announcements queued or running right now.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    pub fn stats(&self) -> &BroadcastStats {
        &self.stats
    }

    fn is_shut_down(&self) -> bool {
        *self.shut_down.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until no announcement is queued or running.
    ///
    /// Announcements spawned while waiting are waited for as well; new work
    /// is accepted again afterwards.
    pub async fn quiesce(&self) {
        self.tracker.close();
        self.tracker.wait().await;

        let shut_down = self.shut_down.lock().unwrap_or_else(PoisonError::into_inner);
        if !*shut_down {
            self.tracker.reopen();
        }
    }

    /// Stop accepting work, give in-flight announcements `drain` to finish,
    /// then cancel whatever is left.
    pub async fn shutdown(&self, drain: Duration) {
        {
            let mut shut_down = self.shut_down.lock().unwrap_or_else(PoisonError::into_inner);
            *shut_down = true;
            self.tracker.close();
        }
        if tokio::time::timeout(drain, self.tracker.wait()).await.is_err() {
            tracing::warn!(
                remaining = self.tracker.len(),
                "Cancelling announcements still in flight"
            );
            self.cancel.cancel();
            self.tracker.wait().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CacheError, CacheResult};
    use async_trait::async_trait;

    struct RecordingPeer {
        addr: String,
        seen: Mutex<Vec<String>>,
        fail: bool,
        delay: Duration,
    }

    #[async_trait]
    impl Peer<String> for RecordingPeer {
        async fn get(&self, key: &str) -> CacheResult<String> {
            Err(CacheError::NotFound(key.to_string()))
        }

        async fn set(&self, _key: &str, _value: &String) -> CacheResult<()> {
            Ok(())
        }

        async fn connect(&self, address: &str) -> CacheResult<()> {
            tokio::time::sleep(self.delay).await;
            self.seen.lock().unwrap().push(address.to_string());
            if self.fail {
                Err(CacheError::remote(&self.addr, "refused"))
            } else {
                Ok(())
            }
        }

        fn addr(&self) -> &str {
            &self.addr
        }
    }

    fn peer(fail: bool, delay: Duration) -> Arc<RecordingPeer> {
        Arc::new(RecordingPeer {
            addr: "10.0.0.9:7070".to_string(),
            seen: Mutex::new(Vec::new()),
            fail,
            delay,
        })
    }

    #[tokio::test]
    async fn test_announcements_are_delivered_and_counted() {
        let broadcaster = Broadcaster::new(2);
        let target = peer(false, Duration::from_millis(1));

        for i in 0..5 {
            broadcaster.announce::<String>(target.clone(), format!("node-{}", i));
        }
        broadcaster.quiesce().await;

        let mut seen = target.seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["node-0", "node-1", "node-2", "node-3", "node-4"]);
        assert_eq!(broadcaster.stats().sent.load(Ordering::Relaxed), 5);
        assert_eq!(broadcaster.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_quiesce_waits_then_accepts_new_work() {
        let broadcaster = Broadcaster::new(4);
        let target = peer(false, Duration::from_millis(50));

        broadcaster.announce::<String>(target.clone(), "first".to_string());
        broadcaster.quiesce().await;
        assert_eq!(target.seen.lock().unwrap().as_slice(), &["first".to_string()]);

        broadcaster.announce::<String>(target.clone(), "second".to_string());
        assert_eq!(broadcaster.in_flight(), 1);
        broadcaster.quiesce().await;
        assert_eq!(target.seen.lock().unwrap().len(), 2);
        assert_eq!(broadcaster.stats().sent.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_fan_out() {
        let broadcaster = Broadcaster::new(4);
        let target = peer(true, Duration::ZERO);

        broadcaster.announce::<String>(target.clone(), "a".to_string());
        broadcaster.announce::<String>(target.clone(), "b".to_string());
        broadcaster.quiesce().await;

        assert_eq!(broadcaster.stats().failed.load(Ordering::Relaxed), 2);
        assert_eq!(target.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_slow_announcements() {
        let broadcaster = Broadcaster::new(1);
        let target = peer(false, Duration::from_secs(30));

        broadcaster.announce::<String>(target.clone(), "slow".to_string());
        broadcaster.shutdown(Duration::from_millis(20)).await;

        assert_eq!(broadcaster.in_flight(), 0);
        assert!(target.seen.lock().unwrap().is_empty());

        // Closed broadcasters drop new work
        broadcaster.announce::<String>(target.clone(), "late".to_string());
        assert_eq!(broadcaster.in_flight(), 0);
    }
}
