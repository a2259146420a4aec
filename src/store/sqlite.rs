//! SQLite-backed [`PresenceStore`].

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use tracing::debug;

use super::{table_name_for, Entry, PresenceStore, StoreError};

/// One registry table inside a SQLite database file.
///
/// The connection sits behind a mutex so concurrent tasks take turns; SQLite
/// itself arbitrates between this process and any other reader or writer of
/// the same file.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
    table: String,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (or create) the database file and bind to the table for `registry_name`.
    pub fn open(
        path: impl AsRef<Path>,
        registry_name: &str,
        busy_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let table = table_name_for(registry_name)?;
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&path)?;
        conn.busy_timeout(busy_timeout)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!("Opened {} (journal_mode={})", path.display(), mode);

        Ok(Self {
            conn: Mutex::new(conn),
            table,
            path: Some(path),
        })
    }

    /// Private in-memory database, mostly useful for tests and benchmarks.
    pub fn open_in_memory(registry_name: &str) -> Result<Self, StoreError> {
        let table = table_name_for(registry_name)?;
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
            table,
            path: None,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Database file, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl PresenceStore for SqliteStore {
    fn create_table_if_absent(&self) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{table}" (
                name TEXT NOT NULL PRIMARY KEY,
                content TEXT NOT NULL,
                last_alive_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS "{table}_last_alive" ON "{table}"(last_alive_ms);
            "#,
            table = self.table
        ))?;
        Ok(())
    }

    fn insert(
        &self,
        name: &str,
        content: &str,
        now_ms: i64,
        stale_before_ms: i64,
    ) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                &format!(
                    r#"
                    INSERT INTO "{table}" (name, content, last_alive_ms) VALUES (?1, ?2, ?3)
                    ON CONFLICT(name) DO UPDATE
                        SET content = excluded.content, last_alive_ms = excluded.last_alive_ms
                        WHERE "{table}".last_alive_ms <= ?4
                    "#,
                    table = self.table
                ),
                params![name, content, now_ms, stale_before_ms],
            )
            .map_err(|err| map_insert_conflict(err, name))?;

        if changed == 0 {
            return Err(StoreError::DuplicateKey(name.to_string()));
        }
        Ok(())
    }

    fn update_timestamp(&self, name: &str, now_ms: i64) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            &format!(
                r#"UPDATE "{}" SET last_alive_ms = MAX(last_alive_ms, ?2) WHERE name = ?1"#,
                self.table
            ),
            params![name, now_ms],
        )?;
        Ok(changed)
    }

    fn touch_batch(&self, names: &[String], now_ms: i64) -> Result<usize, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut touched = 0;
        {
            let mut stmt = tx.prepare(&format!(
                r#"UPDATE "{}" SET last_alive_ms = MAX(last_alive_ms, ?2) WHERE name = ?1"#,
                self.table
            ))?;
            for name in names {
                touched += stmt.execute(params![name, now_ms])?;
            }
        }
        tx.commit()?;
        Ok(touched)
    }

    fn delete(&self, name: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            &format!(r#"DELETE FROM "{}" WHERE name = ?1"#, self.table),
            params![name],
        )?;
        Ok(())
    }

    fn select_names(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"SELECT name FROM "{}" ORDER BY name ASC"#,
            self.table
        ))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn select_names_if(&self, alive_after_ms: i64) -> Result<Vec<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"SELECT name FROM "{}" WHERE last_alive_ms > ?1 ORDER BY name ASC"#,
            self.table
        ))?;
        let names = stmt
            .query_map(params![alive_after_ms], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn select_one_if(
        &self,
        name: &str,
        alive_after_ms: i64,
    ) -> Result<Option<Entry>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"SELECT name, content, last_alive_ms FROM "{}" WHERE name = ?1 AND last_alive_ms > ?2"#,
            self.table
        ))?;
        let entry = stmt
            .query_row(params![name, alive_after_ms], read_entry_row)
            .optional()?;
        Ok(entry)
    }

    fn delete_where(&self, older_than_ms: i64) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            &format!(r#"DELETE FROM "{}" WHERE last_alive_ms < ?1"#, self.table),
            params![older_than_ms],
        )?;
        Ok(deleted)
    }
}

fn read_entry_row(row: &rusqlite::Row<'_>) -> Result<Entry, rusqlite::Error> {
    Ok(Entry {
        name: row.get(0)?,
        content: row.get(1)?,
        last_alive_ms: row.get(2)?,
    })
}

fn map_insert_conflict(err: rusqlite::Error, name: &str) -> StoreError {
    if is_constraint_violation(&err) {
        return StoreError::DuplicateKey(name.to_string());
    }
    StoreError::Sql(err)
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(code, message) => {
            code.code == ErrorCode::ConstraintViolation
                || message.as_deref().is_some_and(|value| {
                    value.contains("UNIQUE constraint failed")
                        || value.contains("PRIMARY KEY constraint failed")
                })
        }
        _ => false,
    }
}
