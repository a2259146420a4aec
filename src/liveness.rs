//! Liveness query engine.
//!
//! Liveness is derived, never stored: an entry is alive iff
//! `last_alive_ms > now_ms - threshold_ms`. The garbage collector uses
//! [`cutoff_ms`] as well, so the read path and the reaper cannot disagree
//! about where the window ends.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::clock::Clock;
use crate::error::Result;
use crate::store::{Entry, PresenceStore};

/// Oldest `last_alive_ms` that is no longer alive at `now_ms`.
///
/// Rows strictly above the cutoff are alive; rows strictly below are
/// collectable.
pub fn cutoff_ms(now_ms: i64, threshold: Duration) -> i64 {
    let threshold_ms = i64::try_from(threshold.as_millis()).unwrap_or(i64::MAX);
    now_ms.saturating_sub(threshold_ms)
}

/// Read path over a [`PresenceStore`].
#[derive(Clone)]
pub struct LivenessEngine {
    store: Arc<dyn PresenceStore>,
    clock: Arc<dyn Clock>,
    threshold: Duration,
}

impl LivenessEngine {
    pub fn new(store: Arc<dyn PresenceStore>, clock: Arc<dyn Clock>, threshold: Duration) -> Self {
        Self {
            store,
            clock,
            threshold,
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Current cutoff according to this engine's clock.
    pub fn current_cutoff_ms(&self) -> i64 {
        cutoff_ms(self.clock.now_ms(), self.threshold)
    }

    /// Whether `name` has a row with a fresh enough timestamp.
    ///
    /// Fails closed: a store error reads as "not alive".
    pub fn is_alive(&self, name: &str) -> bool {
        match self.store.select_one_if(name, self.current_cutoff_ms()) {
            Ok(row) => row.is_some(),
            Err(e) => {
                warn!("Liveness check for {} failed, reporting dead: {}", name, e);
                false
            }
        }
    }

    /// The alive entry for `name`, with its content.
    pub fn lookup(&self, name: &str) -> Result<Option<Entry>> {
        Ok(self.store.select_one_if(name, self.current_cutoff_ms())?)
    }

    /// Every stored name, including stale ones the GC has not reaped yet.
    pub fn list_all(&self) -> Result<Vec<String>> {
        Ok(self.store.select_names()?)
    }

    /// Only names that are currently alive.
    pub fn list_alive(&self) -> Result<Vec<String>> {
        Ok(self.store.select_names_if(self.current_cutoff_ms())?)
    }
}
