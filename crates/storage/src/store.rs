//! SQLite store implementation.

use crate::{Error, Result, StoreHandle};
use chrono::Utc;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// How long SQLite waits on a locked database before reporting busy.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed store handle.
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

/// Row counts per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCounts {
    pub attendance: u64,
    pub pauses: u64,
    pub audits: u64,
}

/// A stored pause interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PauseRow {
    pub departure_time: String,
    pub return_time: String,
    pub break_kind: i64,
}

impl SqliteStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Self::from_connection(conn)
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Count the rows in every table.
    pub fn counts(&self) -> Result<TableCounts> {
        let conn = self.lock();
        let count = |table: &str| -> Result<u64> {
            let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })?;
            Ok(n as u64)
        };

        Ok(TableCounts {
            attendance: count("attendance")?,
            pauses: count("pause_log")?,
            audits: count("audit_log")?,
        })
    }

    /// Load every stored pause interval in insertion order.
    pub fn pauses(&self) -> Result<Vec<PauseRow>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT departure_time, return_time, break_kind FROM pause_log ORDER BY id",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok(PauseRow {
                    departure_time: row.get(0)?,
                    return_time: row.get(1)?,
                    break_kind: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a statement on the blocking pool so slow disks never stall the
    /// async workers.
    async fn run<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<()> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&conn).map_err(Error::from)
        })
        .await
        .map_err(|e| Error::Unavailable(format!("store worker failed: {e}")))?
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS attendance (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            data TEXT NOT NULL,
            recorded_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS pause_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            departure_time TEXT NOT NULL,
            return_time TEXT NOT NULL,
            break_kind INTEGER NOT NULL,
            recorded_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS audit_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            subject_id TEXT NOT NULL,
            action TEXT NOT NULL,
            hostname TEXT NOT NULL,
            source_ip TEXT NOT NULL,
            recorded_at TEXT NOT NULL
        );
        "#,
    )?;
    Ok(())
}

impl StoreHandle for SqliteStore {
    async fn insert_attendance(&self, timestamp: &str) -> Result<()> {
        let timestamp = timestamp.to_owned();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO attendance (data, recorded_at) VALUES (?1, ?2)",
                params![timestamp, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }

    async fn insert_pause(&self, departure: &str, return_time: &str, kind: i64) -> Result<()> {
        let departure = departure.to_owned();
        let return_time = return_time.to_owned();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO pause_log (departure_time, return_time, break_kind, recorded_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![departure, return_time, kind, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }

    async fn insert_audit(
        &self,
        subject: &str,
        action: &str,
        hostname: &str,
        ip: &str,
    ) -> Result<()> {
        let values = [subject, action, hostname, ip].map(str::to_owned);
        self.run(move |conn| {
            let [subject, action, hostname, ip] = values;
            conn.execute(
                "INSERT INTO audit_log (subject_id, action, hostname, source_ip, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![subject, action, hostname, ip, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }

    async fn probe(&self) -> Result<()> {
        self.run(|conn| conn.query_row("SELECT 1", [], |_| Ok(())))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn inserts_land_in_their_tables() {
        let store = SqliteStore::in_memory().unwrap();

        store.insert_attendance("08:00").await.unwrap();
        store.insert_pause("08:00", "08:15", 1).await.unwrap();
        store
            .insert_audit("E1", "pause", "H1", "10.0.0.1")
            .await
            .unwrap();

        let counts = store.counts().unwrap();
        assert_eq!(
            counts,
            TableCounts {
                attendance: 1,
                pauses: 1,
                audits: 1
            }
        );

        let pauses = store.pauses().unwrap();
        assert_eq!(
            pauses,
            vec![PauseRow {
                departure_time: "08:00".into(),
                return_time: "08:15".into(),
                break_kind: 1,
            }]
        );
    }

    #[tokio::test]
    async fn identical_records_are_both_kept() {
        let store = SqliteStore::in_memory().unwrap();

        store.insert_pause("08:00", "08:15", 2).await.unwrap();
        store.insert_pause("08:00", "08:15", 2).await.unwrap();

        assert_eq!(store.counts().unwrap().pauses, 2);
    }

    #[tokio::test]
    async fn probe_succeeds_on_open_store() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.probe().await.is_ok());
    }

    #[test]
    fn reopening_keeps_existing_schema() {
        let dir = std::env::temp_dir().join(format!("breaklog-store-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("reopen.db");
        let _ = std::fs::remove_file(&path);

        {
            let store = SqliteStore::open(&path).unwrap();
            let conn = store.lock();
            conn.execute(
                "INSERT INTO attendance (data, recorded_at) VALUES ('07:00', 'now')",
                [],
            )
            .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.counts().unwrap().attendance, 1);

        let _ = std::fs::remove_file(&path);
    }
}
