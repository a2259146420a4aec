//! Garbage collector for expired entries.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::clock::Clock;
use crate::error::Result;
use crate::liveness::cutoff_ms;
use crate::metrics::HallMetrics;
use crate::store::PresenceStore;

/// Deletes every row whose `last_alive_ms` has fallen out of the window.
pub struct GarbageCollector {
    store: Arc<dyn PresenceStore>,
    clock: Arc<dyn Clock>,
    threshold: Duration,
    metrics: Arc<HallMetrics>,
}

impl GarbageCollector {
    pub fn new(
        store: Arc<dyn PresenceStore>,
        clock: Arc<dyn Clock>,
        threshold: Duration,
        metrics: Arc<HallMetrics>,
    ) -> Self {
        Self {
            store,
            clock,
            threshold,
            metrics,
        }
    }

    /// Run one delete-by-predicate pass and return the number of rows reaped.
    pub fn sweep(&self) -> Result<usize> {
        let older_than = cutoff_ms(self.clock.now_ms(), self.threshold);
        match self.store.delete_where(older_than) {
            Ok(reaped) => {
                self.metrics.record_sweep(reaped);
                if reaped > 0 {
                    info!("GC reaped {} expired entries", reaped);
                } else {
                    debug!("GC sweep found nothing to reap");
                }
                Ok(reaped)
            }
            Err(e) => {
                self.metrics.record_sweep_failed();
                Err(e.into())
            }
        }
    }

    /// Sweep every `interval` until the returned handle is stopped.
    ///
    /// The first sweep happens one interval after spawning. A failed sweep is
    /// logged and the loop carries on; the next tick re-evaluates the cutoff.
    pub fn spawn(self, interval: Duration) -> GcHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            info!("GC loop started (interval={}ms)", interval.as_millis());
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        info!("GC loop stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep() {
                            error!("GC sweep failed: {}", e);
                        }
                    }
                }
            }
        });

        GcHandle { shutdown_tx, join }
    }
}

/// Owner of a running GC loop.
pub struct GcHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl GcHandle {
    /// Signal the loop and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.join.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{MockPresenceStore, SqliteStore, StoreError};

    fn sqlite() -> Arc<SqliteStore> {
        let store = SqliteStore::open_in_memory("gc").unwrap();
        store.create_table_if_absent().unwrap();
        Arc::new(store)
    }

    #[test]
    fn test_sweep_reaps_only_expired_rows() {
        let store = sqlite();
        store.insert("old", "", 0, i64::MIN).unwrap();
        store.insert("fresh", "", 1_500, i64::MIN).unwrap();
        let clock = Arc::new(ManualClock::new(2_100));
        let metrics = Arc::new(HallMetrics::new());
        let gc = GarbageCollector::new(
            store.clone(),
            clock,
            Duration::from_secs(2),
            metrics.clone(),
        );

        assert_eq!(gc.sweep().unwrap(), 1);
        assert_eq!(store.select_names().unwrap(), vec!["fresh".to_string()]);
        assert_eq!(metrics.snapshot().rows_reaped, 1);
        assert_eq!(metrics.snapshot().gc_sweeps, 1);
    }

    #[test]
    fn test_sweep_failure_is_counted() {
        let mut store = MockPresenceStore::new();
        store
            .expect_delete_where()
            .returning(|_| Err(StoreError::Poisoned));
        let metrics = Arc::new(HallMetrics::new());
        let gc = GarbageCollector::new(
            Arc::new(store),
            Arc::new(ManualClock::new(0)),
            Duration::from_secs(2),
            metrics.clone(),
        );

        assert!(gc.sweep().is_err());
        assert_eq!(metrics.snapshot().gc_failures, 1);
        assert_eq!(metrics.snapshot().gc_sweeps, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_survives_failed_sweeps() {
        let mut store = MockPresenceStore::new();
        let mut calls = 0;
        store.expect_delete_where().returning(move |_| {
            calls += 1;
            if calls == 1 {
                Err(StoreError::Poisoned)
            } else {
                Ok(2)
            }
        });
        let metrics = Arc::new(HallMetrics::new());
        let gc = GarbageCollector::new(
            Arc::new(store),
            Arc::new(ManualClock::new(0)),
            Duration::from_secs(2),
            metrics.clone(),
        );

        let handle = gc.spawn(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        handle.stop().await;

        let snap = metrics.snapshot();
        assert_eq!(snap.gc_failures, 1);
        assert_eq!(snap.gc_sweeps, 2);
        assert_eq!(snap.rows_reaped, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_expired_entry_gone_after_next_tick() {
        // heartbeat 1s, threshold 2s, register at t=0, no heartbeats.
        let store = sqlite();
        store.insert("A", "", 0, i64::MIN).unwrap();
        let clock = Arc::new(ManualClock::new(0));
        let liveness = crate::liveness::LivenessEngine::new(
            store.clone(),
            clock.clone(),
            Duration::from_secs(2),
        );
        let gc = GarbageCollector::new(
            store.clone(),
            clock.clone(),
            Duration::from_secs(2),
            Arc::new(HallMetrics::new()),
        );

        clock.set_ms(1_900);
        assert!(liveness.is_alive("A"));
        clock.set_ms(2_100);
        assert!(!liveness.is_alive("A"));
        assert_eq!(liveness.list_all().unwrap(), vec!["A".to_string()]);

        let handle = gc.spawn(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        handle.stop().await;
        assert!(liveness.list_all().unwrap().is_empty());
    }
}
