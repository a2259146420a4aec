//! The hall: registration lifecycle over the liveness engine.
//!
//! A [`Hall`] owns everything one process needs to take part in a registry:
//! the store handle, the heartbeat queue and its consumer, the GC loop and
//! one emitter per name registered from this process.
//!
//! ```text
//!  register(name) ──insert──────────────────────────────┐
//!        │                                               ▼
//!        └─► HeartbeatEmitter ──touch──► queue ──► HeartbeatCoalescer ──► PresenceStore
//!                                                                          ▲     ▲
//!  is_alive / list_all ── LivenessEngine ──────────────────────────────────┘     │
//!  GarbageCollector ── delete_where(cutoff) ─────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use presence_hall::{Hall, HallConfig, SqliteStore, SystemClock};
//!
//! # tokio_test::block_on(async {
//! let config = HallConfig {
//!     registry_name: "workers".to_string(),
//!     ..Default::default()
//! };
//! let store = Arc::new(SqliteStore::open_in_memory("workers").unwrap());
//! let hall = Hall::with_store(config, store, Arc::new(SystemClock)).unwrap();
//! hall.init().unwrap();
//!
//! hall.register("worker-1", "10.0.0.7:9000").await.unwrap();
//! assert!(hall.is_alive("worker-1"));
//! assert_eq!(hall.list_all().unwrap(), vec!["worker-1".to_string()]);
//!
//! hall.unregister("worker-1").await.unwrap();
//! assert!(!hall.is_alive("worker-1"));
//! hall.shutdown().await;
//! # })
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::HallConfig;
use crate::error::{HallError, Result};
use crate::gc::{GarbageCollector, GcHandle};
use crate::heartbeat::{
    CoalescerHandle, EmitterHandle, HeartbeatCoalescer, HeartbeatEmitter, TouchSender,
};
use crate::liveness::{cutoff_ms, LivenessEngine};
use crate::metrics::{HallMetrics, MetricsSnapshot};
use crate::store::{Entry, PresenceStore, SqliteStore, StoreError};

/// Longest accepted entry name, in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// Presence registry context. Construct, then [`Hall::init`].
pub struct Hall {
    config: HallConfig,
    clock: Arc<dyn Clock>,
    provided_store: Option<Arc<dyn PresenceStore>>,
    state: OnceCell<HallState>,
}

/// Everything that exists only after `init`.
struct HallState {
    store: Arc<dyn PresenceStore>,
    liveness: LivenessEngine,
    metrics: Arc<HallMetrics>,
    /// `None` once shutdown has started. Held across a whole registration or
    /// unregistration so neither shutdown nor the other can interleave.
    queue: Mutex<Option<TouchSender>>,
    coalescer: Mutex<Option<CoalescerHandle>>,
    gc: Mutex<Option<GcHandle>>,
    emitters: Mutex<HashMap<String, EmitterHandle>>,
}

impl Hall {
    /// A hall backed by the SQLite file named in `config`, on the system clock.
    pub fn new(config: HallConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            clock: Arc::new(SystemClock),
            provided_store: None,
            state: OnceCell::new(),
        })
    }

    /// A hall over a caller-supplied store and clock.
    pub fn with_store(
        config: HallConfig,
        store: Arc<dyn PresenceStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            clock,
            provided_store: Some(store),
            state: OnceCell::new(),
        })
    }

    /// `new` followed by `init`.
    pub fn open(config: HallConfig) -> Result<Self> {
        let hall = Self::new(config)?;
        hall.init()?;
        Ok(hall)
    }

    /// Open the store, create the table, start the coalescer and the GC loop.
    ///
    /// Idempotent: later calls return `Ok(())` without touching anything.
    /// Must be called from within a Tokio runtime.
    pub fn init(&self) -> Result<()> {
        self.state.get_or_try_init(|| self.start())?;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.state.get().is_some()
    }

    fn start(&self) -> Result<HallState> {
        let store: Arc<dyn PresenceStore> = match &self.provided_store {
            Some(store) => Arc::clone(store),
            None => Arc::new(SqliteStore::open(
                &self.config.database_path,
                &self.config.registry_name,
                self.config.busy_timeout(),
            )?),
        };
        store.create_table_if_absent()?;

        let metrics = Arc::new(HallMetrics::new());
        let threshold = self.config.inactive_threshold();
        let liveness = LivenessEngine::new(Arc::clone(&store), Arc::clone(&self.clock), threshold);

        let (queue, coalescer) = HeartbeatCoalescer::new(
            Arc::clone(&store),
            Arc::clone(&self.clock),
            Arc::clone(&metrics),
            self.config.max_batch_size,
            self.config.flush_interval(),
        )
        .spawn();

        let gc = if self.config.gc_enabled {
            Some(
                GarbageCollector::new(
                    Arc::clone(&store),
                    Arc::clone(&self.clock),
                    threshold,
                    Arc::clone(&metrics),
                )
                .spawn(self.config.heartbeat_interval()),
            )
        } else {
            debug!("Background GC disabled by configuration");
            None
        };

        info!(
            "Hall {} initialized (heartbeat={}ms, threshold={}ms, batch={})",
            self.config.registry_name,
            self.config.heartbeat_interval_ms,
            threshold.as_millis(),
            self.config.max_batch_size
        );

        Ok(HallState {
            store,
            liveness,
            metrics,
            queue: Mutex::new(Some(queue)),
            coalescer: Mutex::new(Some(coalescer)),
            gc: Mutex::new(gc),
            emitters: Mutex::new(HashMap::new()),
        })
    }

    fn state(&self) -> Result<&HallState> {
        self.state.get().ok_or(HallError::NotInitialized)
    }

    pub fn config(&self) -> &HallConfig {
        &self.config
    }

    /// Register `name` with `content` and start heartbeating it.
    ///
    /// Fails with [`HallError::NameExists`] while another alive entry holds the
    /// name. A stale row (expired but not collected yet) is taken over. The
    /// emitter starts only after the insert has succeeded.
    pub async fn register(&self, name: &str, content: &str) -> Result<()> {
        let state = self.state()?;
        validate_name(name)?;

        if state.liveness.is_alive(name) {
            return Err(HallError::NameExists(name.to_string()));
        }

        let queue_guard = state.queue.lock().await;
        let queue = queue_guard.clone().ok_or(HallError::QueueClosed)?;

        let now = self.clock.now_ms();
        let stale_before = cutoff_ms(now, self.config.inactive_threshold());
        match state.store.insert(name, content, now, stale_before) {
            Ok(()) => {}
            Err(StoreError::DuplicateKey(_)) => {
                return Err(HallError::NameExists(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        let handle = HeartbeatEmitter::new(name, self.config.heartbeat_interval(), queue).spawn();
        let previous = state.emitters.lock().await.insert(name.to_string(), handle);
        drop(queue_guard);

        if let Some(previous) = previous {
            debug!("Replacing stale emitter for {}", name);
            previous.cancel().await;
        }

        info!("Registered {}", name);
        Ok(())
    }

    /// Stop heartbeating `name` and delete its row if it is alive.
    ///
    /// Unknown and already expired names are a successful no-op. Runs under
    /// the same lock as [`Hall::register`], so a registration of the same name
    /// is either fully visible (row and emitter) or not started yet.
    pub async fn unregister(&self, name: &str) -> Result<()> {
        let state = self.state()?;
        let _registration = state.queue.lock().await;

        let emitter = state.emitters.lock().await.remove(name);
        if let Some(emitter) = emitter {
            emitter.cancel().await;
        }

        if state.liveness.lookup(name)?.is_some() {
            state.store.delete(name)?;
            info!("Unregistered {}", name);
        } else {
            debug!("Unregister of {}: not alive, nothing to delete", name);
        }
        Ok(())
    }

    /// Whether `name` is currently alive. Fails closed, including before `init`.
    pub fn is_alive(&self, name: &str) -> bool {
        match self.state() {
            Ok(state) => state.liveness.is_alive(name),
            Err(_) => {
                warn!("is_alive({}) called before init", name);
                false
            }
        }
    }

    /// The alive entry for `name`.
    pub fn lookup(&self, name: &str) -> Result<Option<Entry>> {
        self.state()?.liveness.lookup(name)
    }

    /// Every stored name, including stale entries not yet collected.
    pub fn list_all(&self) -> Result<Vec<String>> {
        self.state()?.liveness.list_all()
    }

    /// Only currently alive names.
    pub fn list_alive(&self) -> Result<Vec<String>> {
        self.state()?.liveness.list_alive()
    }

    /// Run one GC sweep now, outside the background schedule.
    pub fn sweep_now(&self) -> Result<usize> {
        let state = self.state()?;
        GarbageCollector::new(
            Arc::clone(&state.store),
            Arc::clone(&self.clock),
            self.config.inactive_threshold(),
            Arc::clone(&state.metrics),
        )
        .sweep()
    }

    /// Names with a running emitter in this process, sorted.
    pub async fn local_registrations(&self) -> Vec<String> {
        let Ok(state) = self.state() else {
            return Vec::new();
        };
        let mut names: Vec<String> = state.emitters.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.state
            .get()
            .map(|state| state.metrics.snapshot())
            .unwrap_or_default()
    }

    /// Stop every emitter and the GC, then let the coalescer flush and exit.
    ///
    /// Rows are left in place; they expire like those of a crashed process.
    /// Calling this more than once is harmless. Registration afterwards fails
    /// with [`HallError::QueueClosed`].
    pub async fn shutdown(&self) {
        let Some(state) = self.state.get() else {
            return;
        };

        let queue = state.queue.lock().await.take();
        if queue.is_none() {
            debug!("Hall {} already shut down", self.config.registry_name);
            return;
        }
        drop(queue);

        let emitters: Vec<EmitterHandle> = state
            .emitters
            .lock()
            .await
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for emitter in emitters {
            emitter.cancel().await;
        }

        let gc = state.gc.lock().await.take();
        if let Some(gc) = gc {
            gc.stop().await;
        }

        let coalescer = state.coalescer.lock().await.take();
        if let Some(coalescer) = coalescer {
            coalescer.wait().await;
        }

        info!("Hall {} shut down", self.config.registry_name);
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(HallError::InvalidName("name must not be empty".to_string()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(HallError::InvalidName(format!(
            "name is {} bytes, limit is {}",
            name.len(),
            MAX_NAME_LEN
        )));
    }
    Ok(())
}
