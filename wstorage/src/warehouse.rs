use std::sync::{Mutex, MutexGuard};

use chrono::NaiveDate;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::config::StorageConfig;
use crate::errors::{Result, StorageError};
use crate::models::NormalizedRow;
use crate::schema_registry::DateEncoding;

/// Destination store for normalized rows.
///
/// Every call is its own unit of work. No transaction spans two calls, so a
/// crash between `create_table` and the first `bulk_insert` leaves an empty
/// table behind and the next run starts again from the epoch.
pub trait Warehouse: Send + Sync {
    fn table_exists(&self, table: &str) -> Result<bool>;

    /// Creates `table` with one nullable text column per field, in order.
    fn create_table(&self, table: &str, fields: &[&str]) -> Result<()>;

    /// Largest non-empty value of `column`, compared as text.
    fn max_value(&self, table: &str, column: &str) -> Result<Option<String>>;

    /// Inserts all rows or none. Binding is positional against `fields`.
    fn bulk_insert(&self, table: &str, fields: &[&str], rows: &[NormalizedRow]) -> Result<usize>;

    fn row_count(&self, table: &str) -> Result<i64>;

    fn max_date(
        &self,
        table: &str,
        column: &str,
        encoding: DateEncoding,
    ) -> Result<Option<NaiveDate>> {
        self.max_value(table, column)?
            .map(|raw| encoding.parse(&raw))
            .transpose()
    }
}

pub struct SqliteWarehouse {
    conn: Mutex<Connection>,
}

impl SqliteWarehouse {
    pub fn new(config: &StorageConfig) -> Result<Self> {
        if let Some(parent) = config.warehouse_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&config.warehouse_path)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Warehouse("warehouse connection lock poisoned".to_string()))
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

impl Warehouse for SqliteWarehouse {
    fn table_exists(&self, table: &str) -> Result<bool> {
        let conn = self.lock()?;
        let found: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn create_table(&self, table: &str, fields: &[&str]) -> Result<()> {
        if fields.is_empty() {
            return Err(StorageError::InvalidArg(format!(
                "cannot create '{table}' without columns"
            )));
        }
        let columns = fields
            .iter()
            .map(|field| format!("{} TEXT NULL", quote_ident(field)))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("CREATE TABLE {} ({})", quote_ident(table), columns);

        let conn = self.lock()?;
        conn.execute_batch(&sql)?;
        log::info!("Created table '{}' with {} column(s)", table, fields.len());
        Ok(())
    }

    fn max_value(&self, table: &str, column: &str) -> Result<Option<String>> {
        let column = quote_ident(column);
        let sql = format!(
            "SELECT {col} FROM {table} WHERE {col} IS NOT NULL AND {col} <> '' ORDER BY {col} DESC LIMIT 1",
            col = column,
            table = quote_ident(table),
        );
        let conn = self.lock()?;
        let value = conn
            .query_row(&sql, [], |row| row.get::<_, String>(0))
            .optional()?;
        Ok(value)
    }

    fn bulk_insert(&self, table: &str, fields: &[&str], rows: &[NormalizedRow]) -> Result<usize> {
        if let Some((idx, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != fields.len())
        {
            return Err(StorageError::Warehouse(format!(
                "row {} has {} value(s), '{}' expects {}",
                idx,
                row.len(),
                table,
                fields.len()
            )));
        }
        if rows.is_empty() {
            return Ok(0);
        }

        let columns = fields
            .iter()
            .map(|field| quote_ident(field))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=fields.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            columns,
            placeholders
        );

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&sql)?;
            for row in rows {
                stmt.execute(params_from_iter(row.iter()))?;
            }
        }
        tx.commit()?;
        log::info!("Inserted {} row(s) into '{}'", rows.len(), table);
        Ok(rows.len())
    }

    fn row_count(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let conn = self.lock()?;
        Ok(conn.query_row(&sql, [], |row| row.get(0))?)
    }
}
