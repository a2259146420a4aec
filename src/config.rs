//! Configuration for presence-hall
//!
//! Settings come from three layers, later ones winning:
//!
//! 1. built-in defaults (`HallConfig::default()`)
//! 2. a JSON file, `~/.presence-hall/config.json` unless a path is given
//! 3. `PRESENCE_HALL_*` environment variables
//!
//! ```json
//! {
//!     "database_path": "/var/lib/presence/presence.db",
//!     "registry_name": "workers",
//!     "heartbeat_interval_ms": 5000,
//!     "max_batch_size": 100,
//!     "flush_interval_ms": 1000
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{HallError, Result};
use crate::store::table_name_for;

/// Default number of touches coalesced into one grouped update.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;
/// Default emitter and GC period.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 5_000;
/// Default upper bound on how long a partial batch may wait before flushing.
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 1_000;
/// Longest accepted heartbeat interval (one day).
pub const MAX_HEARTBEAT_INTERVAL_MS: u64 = 86_400_000;
/// Default SQLite busy timeout.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

const ENV_DB: &str = "PRESENCE_HALL_DB";
const ENV_REGISTRY: &str = "PRESENCE_HALL_REGISTRY";
const ENV_HEARTBEAT_MS: &str = "PRESENCE_HALL_HEARTBEAT_MS";
const ENV_BATCH_SIZE: &str = "PRESENCE_HALL_BATCH_SIZE";
const ENV_FLUSH_MS: &str = "PRESENCE_HALL_FLUSH_MS";

/// Runtime configuration of a hall.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HallConfig {
    /// SQLite database file shared with other processes.
    pub database_path: PathBuf,
    /// Registry identifier; the table is `hall_<registry_name>`.
    pub registry_name: String,
    /// Emitter period and GC period. The inactive threshold is twice this.
    pub heartbeat_interval_ms: u64,
    /// Queue capacity and size-triggered flush point of the coalescer.
    pub max_batch_size: usize,
    /// Time-triggered flush point of the coalescer.
    pub flush_interval_ms: u64,
    /// How long SQLite waits on a locked database before failing.
    pub busy_timeout_ms: u64,
    /// Run the background GC loop. Read-only clients can turn it off.
    pub gc_enabled: bool,
}

impl Default for HallConfig {
    fn default() -> Self {
        Self {
            database_path: Self::dir().join("presence.db"),
            registry_name: "default".to_string(),
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            gc_enabled: true,
        }
    }
}

impl HallConfig {
    /// Base directory for presence-hall state (`~/.presence-hall`).
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".presence-hall")
    }

    /// Default config file location.
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load from the default location, apply env overrides and validate.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::path())
    }

    /// Load from `path` (defaults if it does not exist), apply env overrides and validate.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            debug!("Loaded config from {}", path.display());
            serde_json::from_str(&content)?
        } else {
            debug!("No config at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `PRESENCE_HALL_*` environment variables.
    ///
    /// Unparseable numbers are ignored with a warning.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(db) = std::env::var(ENV_DB) {
            self.database_path = PathBuf::from(db);
        }
        if let Ok(registry) = std::env::var(ENV_REGISTRY) {
            self.registry_name = registry;
        }
        if let Some(ms) = env_number(ENV_HEARTBEAT_MS) {
            self.heartbeat_interval_ms = ms;
        }
        if let Some(size) = env_number(ENV_BATCH_SIZE) {
            self.max_batch_size = size as usize;
        }
        if let Some(ms) = env_number(ENV_FLUSH_MS) {
            self.flush_interval_ms = ms;
        }
    }

    pub fn validate(&self) -> Result<()> {
        table_name_for(&self.registry_name).map_err(|_| {
            HallError::Config(format!(
                "registry_name {:?} must match [A-Za-z0-9_]{{1,64}}",
                self.registry_name
            ))
        })?;
        if self.max_batch_size == 0 {
            return Err(HallError::Config(
                "max_batch_size must be greater than zero".to_string(),
            ));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(HallError::Config(
                "heartbeat_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.heartbeat_interval_ms > MAX_HEARTBEAT_INTERVAL_MS {
            return Err(HallError::Config(format!(
                "heartbeat_interval_ms must be at most {}",
                MAX_HEARTBEAT_INTERVAL_MS
            )));
        }
        if self.flush_interval_ms == 0 || self.flush_interval_ms >= self.heartbeat_interval_ms {
            return Err(HallError::Config(format!(
                "flush_interval_ms must be in 1..{} (below heartbeat_interval_ms)",
                self.heartbeat_interval_ms
            )));
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Twice the heartbeat interval: one missed heartbeat is tolerated.
    pub fn inactive_threshold(&self) -> Duration {
        self.heartbeat_interval() * 2
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

fn env_number(key: &str) -> Option<u64> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(n) => Some(n),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a number", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = HallConfig::default();
        assert_eq!(config.max_batch_size, 100);
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(5));
        assert_eq!(config.inactive_threshold(), Duration::from_secs(10));
        assert_eq!(config.flush_interval(), Duration::from_secs(1));
        assert!(config.gc_enabled);
        assert!(config.database_path.ends_with(".presence-hall/presence.db"));
        config.validate().expect("defaults are valid");
    }

    #[test]
    fn test_threshold_tracks_heartbeat() {
        let config = HallConfig {
            heartbeat_interval_ms: 1_000,
            flush_interval_ms: 100,
            ..Default::default()
        };
        assert_eq!(config.inactive_threshold(), Duration::from_secs(2));
    }

    #[test]
    fn test_serde_default_fills_missing_fields() {
        let config: HallConfig =
            serde_json::from_str(r#"{"registry_name": "workers"}"#).expect("deserialize");
        assert_eq!(config.registry_name, "workers");
        assert_eq!(config.max_batch_size, DEFAULT_MAX_BATCH_SIZE);
        assert_eq!(config.heartbeat_interval_ms, DEFAULT_HEARTBEAT_INTERVAL_MS);
    }

    #[test]
    fn test_validate_rejects_bad_registry_name() {
        let config = HallConfig {
            registry_name: "workers; DROP TABLE x".to_string(),
            ..Default::default()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("registry_name"), "got: {}", err);
    }

    #[test]
    fn test_validate_rejects_zero_batch_size() {
        let config = HallConfig {
            max_batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(HallError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_flush_not_below_heartbeat() {
        let config = HallConfig {
            heartbeat_interval_ms: 1_000,
            flush_interval_ms: 1_000,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(HallError::Config(_))));

        let config = HallConfig {
            flush_interval_ms: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(HallError::Config(_))));
    }

    #[test]
    fn test_validate_caps_heartbeat_interval() {
        let at_limit = HallConfig {
            heartbeat_interval_ms: MAX_HEARTBEAT_INTERVAL_MS,
            ..Default::default()
        };
        at_limit.validate().expect("one day is accepted");
        let now = 1_700_000_000_000;
        assert!(crate::liveness::cutoff_ms(now, at_limit.inactive_threshold()) < now);

        for heartbeat_interval_ms in [MAX_HEARTBEAT_INTERVAL_MS + 1, u64::MAX] {
            let config = HallConfig {
                heartbeat_interval_ms,
                ..Default::default()
            };
            assert!(matches!(config.validate(), Err(HallError::Config(_))));
        }
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(
            br#"{"registry_name": "brokers", "heartbeat_interval_ms": 2000, "flush_interval_ms": 250}"#,
        )
        .unwrap();

        let config = HallConfig::load_from(&path).expect("load");
        assert_eq!(config.registry_name, "brokers");
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(2));
        assert_eq!(config.flush_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_load_from_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = HallConfig::load_from(&dir.path().join("absent.json")).expect("load");
        assert_eq!(config.max_batch_size, DEFAULT_MAX_BATCH_SIZE);
    }

    #[test]
    fn test_load_from_invalid_json_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(HallConfig::load_from(&path), Err(HallError::Json(_))));
    }
}
