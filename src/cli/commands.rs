//! One function per subcommand.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use presence_hall::metrics::{render, TelemetryFormat};
use presence_hall::{Hall, HallConfig};

/// Flags that override the config file and environment.
#[derive(Debug, Default)]
pub(crate) struct ConfigOverrides {
    pub config: Option<PathBuf>,
    pub db: Option<PathBuf>,
    pub registry: Option<String>,
    pub heartbeat: Option<Duration>,
}

/// Resolve config: file, then env, then command-line flags.
pub(crate) fn load_config(overrides: ConfigOverrides) -> Result<HallConfig> {
    let path = overrides.config.unwrap_or_else(HallConfig::path);
    let mut config = HallConfig::load_from(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;

    if let Some(db) = overrides.db {
        config.database_path = db;
    }
    if let Some(registry) = overrides.registry {
        config.registry_name = registry;
    }
    if let Some(heartbeat) = overrides.heartbeat {
        config.heartbeat_interval_ms = u64::try_from(heartbeat.as_millis())
            .unwrap_or(u64::MAX)
            .max(1);
        if config.flush_interval_ms >= config.heartbeat_interval_ms {
            config.flush_interval_ms = (config.heartbeat_interval_ms / 5).max(1);
        }
    }

    config.validate()?;
    Ok(config)
}

fn open(config: HallConfig) -> Result<Hall> {
    let path = config.database_path.clone();
    Hall::open(config).with_context(|| format!("Failed to open hall at {}", path.display()))
}

/// Open without the background GC, for commands that only read or sweep once.
fn open_read_only(mut config: HallConfig) -> Result<Hall> {
    config.gc_enabled = false;
    open(config)
}

pub(crate) async fn cmd_register(config: HallConfig, name: String, content: String) -> Result<()> {
    let hall = open(config)?;
    hall.register(&name, &content).await?;

    println!(
        "Registered {} in {} (heartbeat every {}ms)",
        name,
        hall.config().registry_name,
        hall.config().heartbeat_interval_ms
    );
    println!("Press Ctrl+C to unregister and exit.");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    hall.unregister(&name).await?;
    hall.shutdown().await;
    println!("Unregistered {}", name);
    Ok(())
}

pub(crate) async fn cmd_unregister(config: HallConfig, name: String) -> Result<()> {
    let hall = open(config)?;
    let result = hall.unregister(&name).await;
    hall.shutdown().await;
    result?;
    println!("Unregistered {}", name);
    Ok(())
}

pub(crate) async fn cmd_alive(config: HallConfig, name: String) -> Result<ExitCode> {
    let hall = open_read_only(config)?;
    let alive = hall.is_alive(&name);
    hall.shutdown().await;

    if alive {
        println!("alive");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("dead");
        Ok(ExitCode::from(1))
    }
}

pub(crate) async fn cmd_list(config: HallConfig, alive_only: bool, json: bool) -> Result<()> {
    let hall = open_read_only(config)?;
    let listed = list_rows(&hall, alive_only);
    hall.shutdown().await;
    let rows = listed?;

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("No entries.");
        return Ok(());
    }
    for row in &rows {
        match &row.entry {
            Some(entry) => println!(
                "{:<32} alive  last_seen={}  {}",
                row.name,
                format_ms(entry.last_alive_ms),
                entry.content
            ),
            None => println!("{:<32} stale", row.name),
        }
    }
    Ok(())
}

#[derive(serde::Serialize)]
struct ListedRow {
    name: String,
    alive: bool,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    entry: Option<presence_hall::Entry>,
}

fn list_rows(hall: &Hall, alive_only: bool) -> Result<Vec<ListedRow>> {
    let names = if alive_only {
        hall.list_alive()?
    } else {
        hall.list_all()?
    };

    let mut rows = Vec::with_capacity(names.len());
    for name in names {
        let entry = hall.lookup(&name)?;
        if alive_only && entry.is_none() {
            // Expired between the two reads.
            continue;
        }
        rows.push(ListedRow {
            alive: entry.is_some(),
            name,
            entry,
        });
    }
    Ok(rows)
}

pub(crate) async fn cmd_gc(mut config: HallConfig, watch: bool) -> Result<()> {
    if !watch {
        let hall = open_read_only(config)?;
        let swept = hall.sweep_now();
        hall.shutdown().await;
        println!("Reaped {} expired entries", swept?);
        return Ok(());
    }

    config.gc_enabled = true;
    let hall = open(config)?;
    println!(
        "Collecting expired entries every {}ms. Press Ctrl+C to stop.",
        hall.config().heartbeat_interval_ms
    );
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    hall.shutdown().await;

    let snap = hall.metrics();
    println!(
        "Stopped after {} sweeps ({} reaped, {} failed)",
        snap.gc_sweeps, snap.rows_reaped, snap.gc_failures
    );
    Ok(())
}

pub(crate) async fn cmd_stats(config: HallConfig, format: TelemetryFormat) -> Result<()> {
    let registry = config.registry_name.clone();
    let hall = open_read_only(config)?;
    let swept = hall.sweep_now();
    hall.shutdown().await;
    swept?;

    println!("{}", render(&hall.metrics(), &registry, &format));
    Ok(())
}

fn format_ms(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|utc| utc.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use presence_hall::{PresenceStore, SqliteStore};

    #[test]
    fn test_load_config_applies_flags() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(ConfigOverrides {
            config: Some(dir.path().join("absent.json")),
            db: Some(dir.path().join("p.db")),
            registry: Some("brokers".to_string()),
            heartbeat: Some(Duration::from_millis(500)),
        })
        .unwrap();

        assert_eq!(config.database_path, dir.path().join("p.db"));
        assert_eq!(config.registry_name, "brokers");
        assert_eq!(config.heartbeat_interval_ms, 500);
        assert_eq!(config.flush_interval_ms, 100);
    }

    #[test]
    fn test_load_config_rejects_bad_registry_flag() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_config(ConfigOverrides {
            config: Some(dir.path().join("absent.json")),
            registry: Some("bad name".to_string()),
            ..Default::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_rejects_oversized_heartbeat_flag() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_config(ConfigOverrides {
            config: Some(dir.path().join("absent.json")),
            heartbeat: Some(Duration::from_secs(u64::MAX)),
            ..Default::default()
        });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_read_only_commands_skip_background_gc() {
        let dir = tempfile::tempdir().unwrap();
        let config = HallConfig {
            database_path: dir.path().join("p.db"),
            registry_name: "cli".to_string(),
            ..Default::default()
        };
        assert!(config.gc_enabled);

        let hall = open_read_only(config).unwrap();
        assert!(!hall.config().gc_enabled);
        hall.shutdown().await;
    }

    #[test]
    fn test_format_ms_falls_back_to_raw_number() {
        assert_eq!(format_ms(i64::MAX), i64::MAX.to_string());
        assert_eq!(format_ms(0).len(), "1970-01-01 00:00:00".len());
    }

    #[tokio::test]
    async fn test_list_rows_marks_stale_entries() {
        let dir = tempfile::tempdir().unwrap();
        let config = HallConfig {
            database_path: dir.path().join("p.db"),
            registry_name: "cli".to_string(),
            gc_enabled: false,
            ..Default::default()
        };

        let stale = SqliteStore::open(
            &config.database_path,
            "cli",
            Duration::from_secs(1),
        )
        .unwrap();
        stale.create_table_if_absent().unwrap();
        stale.insert("ghost", "", 0, i64::MIN).unwrap();

        let hall = Hall::open(config).unwrap();
        hall.register("live", "x").await.unwrap();

        let all = list_rows(&hall, false).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|r| r.name == "ghost" && !r.alive));
        assert!(all.iter().any(|r| r.name == "live" && r.alive));

        let alive = list_rows(&hall, true).unwrap();
        assert_eq!(alive.len(), 1);
        assert_eq!(alive[0].name, "live");
        hall.shutdown().await;
    }
}
