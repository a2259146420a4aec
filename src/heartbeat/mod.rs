//! Heartbeat pipeline - per-name emitters feeding one coalescing writer.

mod coalescer;
mod emitter;

pub use coalescer::{CoalescerHandle, HeartbeatCoalescer, TouchSender};
pub use emitter::{EmitterHandle, HeartbeatEmitter};
