//! Counters for the heartbeat pipeline and the garbage collector.
//!
//! Background loops never return their errors to a caller, so failures are
//! logged and counted here. Snapshots render in Prometheus text exposition
//! format or JSON. This module provides only rendering functions, no HTTP
//! server or transport logic.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// Shared, lock-free counters updated by the emitters, coalescer and GC.
#[derive(Debug, Default)]
pub struct HallMetrics {
    touches_enqueued: AtomicU64,
    touches_applied: AtomicU64,
    rows_refreshed: AtomicU64,
    batches_committed: AtomicU64,
    batches_failed: AtomicU64,
    gc_sweeps: AtomicU64,
    gc_failures: AtomicU64,
    rows_reaped: AtomicU64,
}

impl HallMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_enqueued(&self) {
        self.touches_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// A grouped update committed. `touches` counts queued signals in the
    /// batch, `rows` the rows the store actually changed.
    pub(crate) fn record_batch_committed(&self, touches: usize, rows: usize) {
        self.batches_committed.fetch_add(1, Ordering::Relaxed);
        self.touches_applied.fetch_add(touches as u64, Ordering::Relaxed);
        self.rows_refreshed.fetch_add(rows as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_batch_failed(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sweep(&self, reaped: usize) {
        self.gc_sweeps.fetch_add(1, Ordering::Relaxed);
        self.rows_reaped.fetch_add(reaped as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_sweep_failed(&self) {
        self.gc_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            touches_enqueued: self.touches_enqueued.load(Ordering::Relaxed),
            touches_applied: self.touches_applied.load(Ordering::Relaxed),
            rows_refreshed: self.rows_refreshed.load(Ordering::Relaxed),
            batches_committed: self.batches_committed.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            gc_sweeps: self.gc_sweeps.load(Ordering::Relaxed),
            gc_failures: self.gc_failures.load(Ordering::Relaxed),
            rows_reaped: self.rows_reaped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`HallMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub touches_enqueued: u64,
    pub touches_applied: u64,
    pub rows_refreshed: u64,
    pub batches_committed: u64,
    pub batches_failed: u64,
    pub gc_sweeps: u64,
    pub gc_failures: u64,
    pub rows_reaped: u64,
}

// ---------------------------------------------------------------------------
// Renderers
// ---------------------------------------------------------------------------

/// Telemetry output format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryFormat {
    #[default]
    Prometheus,
    Json,
}

impl std::str::FromStr for TelemetryFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prometheus" | "prom" => Ok(Self::Prometheus),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown format {other:?} (expected prometheus|json)")),
        }
    }
}

/// Dispatches to the correct renderer based on the format.
pub fn render(snapshot: &MetricsSnapshot, registry: &str, format: &TelemetryFormat) -> String {
    match format {
        TelemetryFormat::Prometheus => render_prometheus(snapshot, registry),
        TelemetryFormat::Json => render_json(snapshot, registry),
    }
}

/// Renders every counter as a Prometheus counter labelled with the registry.
pub fn render_prometheus(snapshot: &MetricsSnapshot, registry: &str) -> String {
    let families: [(&str, &str, u64); 8] = [
        (
            "presence_hall_touches_enqueued_total",
            "Heartbeat touches queued by emitters.",
            snapshot.touches_enqueued,
        ),
        (
            "presence_hall_touches_applied_total",
            "Heartbeat touches inside committed batches.",
            snapshot.touches_applied,
        ),
        (
            "presence_hall_rows_refreshed_total",
            "Rows whose last_alive was advanced.",
            snapshot.rows_refreshed,
        ),
        (
            "presence_hall_batches_committed_total",
            "Grouped heartbeat updates committed.",
            snapshot.batches_committed,
        ),
        (
            "presence_hall_batches_failed_total",
            "Grouped heartbeat updates that failed and were dropped.",
            snapshot.batches_failed,
        ),
        (
            "presence_hall_gc_sweeps_total",
            "Garbage collector sweeps completed.",
            snapshot.gc_sweeps,
        ),
        (
            "presence_hall_gc_failures_total",
            "Garbage collector sweeps that failed.",
            snapshot.gc_failures,
        ),
        (
            "presence_hall_rows_reaped_total",
            "Expired rows deleted by the garbage collector.",
            snapshot.rows_reaped,
        ),
    ];

    let mut out = String::new();
    for (name, help, value) in families {
        out.push_str(&format!("# HELP {} {}\n", name, help));
        out.push_str(&format!("# TYPE {} counter\n", name));
        out.push_str(&format!("{}{{registry=\"{}\"}} {}\n", name, registry, value));
    }
    out
}

/// Renders the snapshot as a JSON object with the registry name attached.
pub fn render_json(snapshot: &MetricsSnapshot, registry: &str) -> String {
    let value = serde_json::json!({
        "registry": registry,
        "metrics": snapshot,
    });
    serde_json::to_string_pretty(&value).unwrap_or_default()
}
