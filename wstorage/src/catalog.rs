use crate::config::StorageConfig;
use crate::errors::{Result, StorageError};
use crate::models::{SyncResult, SyncRun};
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex, MutexGuard};

/// Run history of the sync jobs, kept apart from the warehouse so it survives
/// table drops and never competes with the watermark query.
pub struct Catalog {
    conn: Arc<Mutex<Connection>>,
}

impl Catalog {
    pub fn new(config: &StorageConfig) -> Result<Self> {
        if let Some(parent) = config.catalog_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&config.catalog_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Other(anyhow::anyhow!("catalog connection lock poisoned")))
    }

    pub fn initialize_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS sync_runs (
                run_id INTEGER PRIMARY KEY AUTOINCREMENT,
                source TEXT NOT NULL,
                start_time INTEGER NOT NULL,
                end_time INTEGER,
                status TEXT NOT NULL,
                rows_loaded INTEGER NOT NULL DEFAULT 0,
                watermark TEXT,
                message TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_sync_runs_source ON sync_runs (source, run_id);
            COMMIT;",
        )?;
        Ok(())
    }

    pub fn create_run(&self, source: &str) -> Result<i64> {
        let conn = self.lock()?;
        let start_time = chrono::Utc::now().timestamp();
        conn.execute(
            "INSERT INTO sync_runs (source, start_time, status) VALUES (?1, ?2, 'RUNNING')",
            params![source, start_time],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn finish_run(&self, run_id: i64, result: &SyncResult) -> Result<()> {
        let conn = self.lock()?;
        let end_time = chrono::Utc::now().timestamp();
        conn.execute(
            "UPDATE sync_runs
             SET status = ?1, rows_loaded = ?2, watermark = ?3, message = ?4, end_time = ?5
             WHERE run_id = ?6",
            params![
                result.status.as_catalog_status(),
                result.rows_loaded as i64,
                result.watermark.map(|date| date.to_string()),
                result.message,
                end_time,
                run_id
            ],
        )?;
        Ok(())
    }

    /// Most recent runs first.
    pub fn list_runs(&self, source: Option<&str>, limit: usize) -> Result<Vec<SyncRun>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT run_id, source, start_time, end_time, status, rows_loaded, watermark, message
             FROM sync_runs
             WHERE ?1 IS NULL OR source = ?1
             ORDER BY run_id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![source, limit as i64], |row| {
            Ok(SyncRun {
                run_id: row.get(0)?,
                source: row.get(1)?,
                start_time: row.get(2)?,
                end_time: row.get(3)?,
                status: row.get(4)?,
                rows_loaded: row.get(5)?,
                watermark: row.get(6)?,
                message: row.get(7)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }
}
