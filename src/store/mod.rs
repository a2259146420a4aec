//! Store adapter for presence entries.
//!
//! The hall only talks to durable storage through [`PresenceStore`]. Every
//! method is synchronous and blocks the calling task for the duration of the
//! call; time arrives as explicit unix-millisecond arguments so the store never
//! reads a clock of its own.

mod sqlite;

pub use sqlite::SqliteStore;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Registry identifiers end up inside table names, so only this shape is allowed.
static REGISTRY_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]{1,64}$").expect("static regex"));

/// Errors raised by a store adapter.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// Insert hit the primary key of a row that is still alive.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    /// The connection mutex was poisoned by a panicking holder.
    #[error("store connection poisoned")]
    Poisoned,
}

/// One named, time-stamped presence record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub name: String,
    pub content: String,
    /// Last heartbeat (or registration) time, unix milliseconds.
    pub last_alive_ms: i64,
}

/// Durable table keyed by entry name.
///
/// "Alive after" arguments are exclusive lower bounds: a row matches when
/// `last_alive_ms > alive_after_ms`. "Older than" arguments are exclusive upper
/// bounds: a row matches when `last_alive_ms < older_than_ms`.
#[cfg_attr(test, mockall::automock)]
pub trait PresenceStore: Send + Sync {
    /// Create the backing table and its index. Safe to call repeatedly.
    fn create_table_if_absent(&self) -> Result<(), StoreError>;

    /// Insert a new entry stamped at `now_ms`.
    ///
    /// An existing row with `last_alive_ms <= stale_before_ms` is replaced in the
    /// same statement. Any other existing row yields [`StoreError::DuplicateKey`].
    fn insert(
        &self,
        name: &str,
        content: &str,
        now_ms: i64,
        stale_before_ms: i64,
    ) -> Result<(), StoreError>;

    /// Move `last_alive_ms` forward to `now_ms`. Returns 0 when the name is absent.
    fn update_timestamp(&self, name: &str, now_ms: i64) -> Result<usize, StoreError>;

    /// Apply one timestamp update per name inside a single transaction.
    ///
    /// Either every update commits or none does. Absent names contribute 0 to
    /// the returned row count.
    fn touch_batch(&self, names: &[String], now_ms: i64) -> Result<usize, StoreError>;

    /// Remove the row for `name`. Absence is not an error.
    fn delete(&self, name: &str) -> Result<(), StoreError>;

    /// Every stored name, alive or not.
    fn select_names(&self) -> Result<Vec<String>, StoreError>;

    /// Names whose `last_alive_ms > alive_after_ms`.
    fn select_names_if(&self, alive_after_ms: i64) -> Result<Vec<String>, StoreError>;

    /// The row for `name` if its `last_alive_ms > alive_after_ms`.
    fn select_one_if(&self, name: &str, alive_after_ms: i64)
        -> Result<Option<Entry>, StoreError>;

    /// Delete every row with `last_alive_ms < older_than_ms`.
    fn delete_where(&self, older_than_ms: i64) -> Result<usize, StoreError>;
}

/// Check a registry identifier against the allow-list and return the table name.
pub fn table_name_for(registry_name: &str) -> Result<String, StoreError> {
    if !REGISTRY_NAME_RE.is_match(registry_name) {
        return Err(StoreError::InvalidIdentifier(registry_name.to_string()));
    }
    Ok(format!("hall_{registry_name}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_for_valid_identifiers() {
        assert_eq!(table_name_for("workers").unwrap(), "hall_workers");
        assert_eq!(table_name_for("Region_01").unwrap(), "hall_Region_01");
    }

    #[test]
    fn test_table_name_for_rejects_injection() {
        for bad in [
            "",
            "a b",
            "x; DROP TABLE users",
            "name\"",
            "dash-ed",
            "naïve",
            &"a".repeat(65),
        ] {
            assert!(
                matches!(table_name_for(bad), Err(StoreError::InvalidIdentifier(_))),
                "accepted {:?}",
                bad
            );
        }
    }
}
