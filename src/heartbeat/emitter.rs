//! Per-registration heartbeat emitter.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::coalescer::TouchSender;

/// Recurring timer that queues a touch for one name.
pub struct HeartbeatEmitter {
    name: String,
    interval: Duration,
    queue: TouchSender,
}

impl HeartbeatEmitter {
    pub fn new(name: &str, interval: Duration, queue: TouchSender) -> Self {
        Self {
            name: name.to_string(),
            interval,
            queue,
        }
    }

    /// Start ticking in the background.
    ///
    /// The first touch is queued one interval after spawning, because
    /// registration has already stamped the row. The task ends when the handle
    /// is cancelled or dropped, or when the queue closes. Cancellation is seen
    /// at every tick boundary and while the send is waiting on a full queue.
    pub fn spawn(self) -> EmitterHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let name = self.name.clone();

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {}
                }

                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    sent = self.queue.touch(&self.name) => {
                        if sent.is_err() {
                            warn!("Heartbeat queue closed, emitter for {} exiting", self.name);
                            break;
                        }
                    }
                }
            }

            debug!("Heartbeat emitter for {} stopped", self.name);
        });

        EmitterHandle {
            name,
            shutdown_tx,
            join,
        }
    }
}

/// Cancellation handle for one emitter. Dropping it also stops the emitter.
pub struct EmitterHandle {
    name: String,
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl EmitterHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Signal the emitter and wait for its task to end.
    pub async fn cancel(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.join.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::heartbeat::{CoalescerHandle, HeartbeatCoalescer};
    use crate::metrics::HallMetrics;
    use crate::store::MockPresenceStore;
    use std::sync::Arc;

    fn queue(batch: usize, metrics: Arc<HallMetrics>) -> (TouchSender, CoalescerHandle) {
        let mut store = MockPresenceStore::new();
        store
            .expect_touch_batch()
            .returning(|names, _| Ok(names.len()));
        HeartbeatCoalescer::new(
            Arc::new(store),
            Arc::new(ManualClock::new(0)),
            metrics,
            batch,
            Duration::from_millis(100),
        )
        .spawn()
    }

    #[tokio::test(start_paused = true)]
    async fn test_emits_once_per_interval() {
        let metrics = Arc::new(HallMetrics::new());
        let (sender, coalescer) = queue(10, metrics.clone());
        let emitter = HeartbeatEmitter::new("a", Duration::from_secs(1), sender).spawn();
        assert_eq!(emitter.name(), "a");

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(metrics.snapshot().touches_enqueued, 0);

        tokio::time::sleep(Duration::from_millis(2_700)).await;
        assert_eq!(metrics.snapshot().touches_enqueued, 3);

        emitter.cancel().await;
        coalescer.wait().await;
        assert_eq!(metrics.snapshot().touches_applied, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_ticking() {
        let metrics = Arc::new(HallMetrics::new());
        let (sender, _coalescer) = queue(10, metrics.clone());
        let emitter = HeartbeatEmitter::new("a", Duration::from_secs(1), sender.clone()).spawn();

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        emitter.cancel().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(metrics.snapshot().touches_enqueued, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_stops_emitter() {
        let metrics = Arc::new(HallMetrics::new());
        let (sender, coalescer) = queue(10, metrics.clone());
        let emitter = HeartbeatEmitter::new("a", Duration::from_secs(1), sender).spawn();
        drop(emitter);

        // The emitter held the last sender, so the coalescer drains and exits.
        coalescer.wait().await;
        assert_eq!(metrics.snapshot().touches_enqueued, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_blocked_on_full_queue() {
        // A queue nobody drains: capacity 1, consumer never started.
        let (tx, _rx) = tokio::sync::mpsc::channel::<String>(1);
        let metrics = Arc::new(HallMetrics::new());
        let sender = TouchSender::for_test(tx, metrics.clone());

        let emitter = HeartbeatEmitter::new("a", Duration::from_secs(1), sender).spawn();
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        // First touch fills the queue, the second is blocked on backpressure.
        assert_eq!(metrics.snapshot().touches_enqueued, 1);
        assert!(!emitter.is_finished());

        emitter.cancel().await;
    }
}
