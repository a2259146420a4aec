//! Heartbeat coalescer: one consumer turning queued touches into grouped updates.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::clock::Clock;
use crate::error::{HallError, Result};
use crate::metrics::HallMetrics;
use crate::store::PresenceStore;

/// Producer side of the heartbeat queue. Cheap to clone, one per emitter.
#[derive(Clone)]
pub struct TouchSender {
    tx: mpsc::Sender<String>,
    metrics: Arc<HallMetrics>,
}

impl TouchSender {
    /// Queue a touch for `name`, waiting while the queue is full.
    pub async fn touch(&self, name: &str) -> Result<()> {
        self.tx
            .send(name.to_string())
            .await
            .map_err(|_| HallError::QueueClosed)?;
        self.metrics.record_enqueued();
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn for_test(tx: mpsc::Sender<String>, metrics: Arc<HallMetrics>) -> Self {
        Self { tx, metrics }
    }

    /// Free slots left in the bounded queue.
    pub fn capacity(&self) -> usize {
        self.tx.capacity()
    }
}

/// Drains the heartbeat queue and applies touches in batches.
///
/// A batch is flushed when it reaches `max_batch_size` touches or when the
/// flush timer fires, whichever comes first. Each flush is one transaction
/// with one update per distinct name. A failed flush is logged, counted and
/// dropped; the consumer keeps going.
pub struct HeartbeatCoalescer {
    store: Arc<dyn PresenceStore>,
    clock: Arc<dyn Clock>,
    metrics: Arc<HallMetrics>,
    max_batch_size: usize,
    flush_interval: Duration,
}

impl HeartbeatCoalescer {
    pub fn new(
        store: Arc<dyn PresenceStore>,
        clock: Arc<dyn Clock>,
        metrics: Arc<HallMetrics>,
        max_batch_size: usize,
        flush_interval: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            metrics,
            max_batch_size: max_batch_size.max(1),
            flush_interval,
        }
    }

    /// Start the consumer task. The queue holds at most `max_batch_size` touches.
    ///
    /// The consumer exits after every [`TouchSender`] has been dropped and the
    /// last partial batch has been flushed.
    pub fn spawn(self) -> (TouchSender, CoalescerHandle) {
        let (tx, rx) = mpsc::channel(self.max_batch_size);
        let sender = TouchSender {
            tx,
            metrics: Arc::clone(&self.metrics),
        };
        let join = tokio::spawn(self.run(rx));
        (sender, CoalescerHandle { join })
    }

    async fn run(self, mut rx: mpsc::Receiver<String>) {
        info!(
            "Heartbeat coalescer started (max_batch_size={}, flush_interval={}ms)",
            self.max_batch_size,
            self.flush_interval.as_millis()
        );

        let mut batch: Vec<String> = Vec::with_capacity(self.max_batch_size);
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                received = rx.recv() => match received {
                    Some(name) => {
                        batch.push(name);
                        if batch.len() >= self.max_batch_size {
                            self.flush(&mut batch);
                            ticker.reset();
                        }
                    }
                    None => {
                        if !batch.is_empty() {
                            self.flush(&mut batch);
                        }
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if !batch.is_empty() {
                        self.flush(&mut batch);
                    }
                }
            }
        }

        info!("Heartbeat coalescer stopped");
    }

    fn flush(&self, batch: &mut Vec<String>) {
        let touches = batch.len();
        let names = distinct(batch.drain(..));

        match self.store.touch_batch(&names, self.clock.now_ms()) {
            Ok(rows) => {
                self.metrics.record_batch_committed(touches, rows);
                debug!(
                    "Applied heartbeat batch ({} touches, {} names, {} rows)",
                    touches,
                    names.len(),
                    rows
                );
            }
            Err(e) => {
                self.metrics.record_batch_failed();
                error!("Heartbeat batch of {} touches failed: {}", touches, e);
            }
        }
    }
}

/// Keep the first occurrence of each name.
fn distinct(names: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    names.filter(|name| seen.insert(name.clone())).collect()
}

/// Owner of the running consumer task.
pub struct CoalescerHandle {
    join: JoinHandle<()>,
}

impl CoalescerHandle {
    /// Wait for the consumer to drain and exit.
    pub async fn wait(self) {
        if let Err(e) = self.join.await {
            error!("Heartbeat coalescer task ended abnormally: {}", e);
        }
    }
}
