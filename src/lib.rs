//! presence-hall - durable presence registry with coalesced heartbeats
//!
//! Named entities register, heartbeat while they live, and are reaped once
//! they stop. Liveness is derived from a last-seen timestamp in a SQLite table
//! that other processes can read directly.

pub mod clock;
pub mod config;
pub mod error;
pub mod gc;
pub mod hall;
pub mod heartbeat;
pub mod liveness;
pub mod metrics;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::HallConfig;
pub use error::{HallError, Result};
pub use hall::Hall;
pub use store::{Entry, PresenceStore, SqliteStore, StoreError};
