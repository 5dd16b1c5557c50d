//! Price Storage Service
//!
//! SQLite-backed store of averaged prices. Every insert appends a row; the
//! row ID doubles as the record's sequence marker, so "latest" means
//! "highest ID" for a company.

use async_trait::async_trait;
use liveview_core::{LiveviewError, LiveviewResult, PriceRecord, Snapshot};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::provider::SnapshotProvider;

/// Price storage service using SQLite
#[derive(Clone)]
pub struct SqlitePriceStore {
    conn: Arc<Mutex<Connection>>,
    table: Arc<str>,
}

impl SqlitePriceStore {
    /// Open the store at `db_path`, using `table` for price rows
    ///
    /// Creates the database file, its parent directory and the table if
    /// they don't exist.
    pub fn open<P: AsRef<Path>>(db_path: P, table: &str) -> Result<Self, PriceStoreError> {
        validate_table_name(table)?;

        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                PriceStoreError::Io(format!("Failed to create database directory: {}", e))
            })?;
        }

        let conn = Connection::open(db_path)?;
        Self::with_connection(conn, table)
    }

    /// Create an in-memory store (useful for testing)
    pub fn open_in_memory(table: &str) -> Result<Self, PriceStoreError> {
        validate_table_name(table)?;
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, table)
    }

    fn with_connection(conn: Connection, table: &str) -> Result<Self, PriceStoreError> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            table: Arc::from(table),
        };
        store.init_schema()?;

        Ok(store)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn init_schema(&self) -> Result<(), PriceStoreError> {
        let conn = self.conn.lock().map_err(|_| PriceStoreError::LockError)?;

        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                company TEXT NOT NULL,
                avg_price REAL NOT NULL,
                created_at INTEGER DEFAULT (strftime('%s', 'now'))
            );

            CREATE INDEX IF NOT EXISTS idx_{table}_company
            ON {table}(company, id);
            "#,
            table = self.table
        ))?;

        Ok(())
    }

    /// Append a price for a company, returning its sequence marker
    pub fn insert_price(&self, company: &str, avg_price: f64) -> Result<i64, PriceStoreError> {
        let conn = self.conn.lock().map_err(|_| PriceStoreError::LockError)?;

        conn.execute(
            &format!(
                "INSERT INTO {} (company, avg_price) VALUES (?1, ?2)",
                self.table
            ),
            params![company, avg_price],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Most recent row per company, ordered by company
    pub fn latest_per_entity(&self) -> Result<Snapshot, PriceStoreError> {
        let conn = self.conn.lock().map_err(|_| PriceStoreError::LockError)?;

        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT p.id, p.company, p.avg_price
            FROM {table} p
            JOIN (
                SELECT company, MAX(id) AS id
                FROM {table}
                GROUP BY company
            ) latest ON latest.id = p.id
            ORDER BY p.company ASC
            "#,
            table = self.table
        ))?;

        let records = stmt
            .query_map([], |row| {
                Ok(PriceRecord {
                    sequence: row.get(0)?,
                    company: row.get(1)?,
                    avg_price: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        debug!("Loaded {} latest prices from {}", records.len(), self.table);

        Ok(Snapshot::from_records(records))
    }

    /// Total number of stored rows
    pub fn record_count(&self) -> Result<usize, PriceStoreError> {
        let conn = self.conn.lock().map_err(|_| PriceStoreError::LockError)?;

        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", self.table),
            [],
            |row| row.get(0),
        )?;

        Ok(count as usize)
    }
}

#[async_trait]
impl SnapshotProvider for SqlitePriceStore {
    async fn fetch_latest_per_entity(&self) -> LiveviewResult<Snapshot> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.latest_per_entity())
            .await
            .map_err(|e| LiveviewError::internal(format!("Snapshot query task failed: {}", e)))?
            .map_err(LiveviewError::from)
    }
}

impl std::fmt::Debug for SqlitePriceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlitePriceStore")
            .field("table", &self.table)
            .finish()
    }
}

/// Table names are interpolated into SQL, so only plain identifiers pass
fn validate_table_name(table: &str) -> Result<(), PriceStoreError> {
    let mut chars = table.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(PriceStoreError::InvalidTable(table.to_string()))
    }
}

/// Errors that can occur during price storage operations
#[derive(Debug, thiserror::Error)]
pub enum PriceStoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Invalid table name: {0:?}")]
    InvalidTable(String),

    #[error("Failed to acquire lock")]
    LockError,
}

impl From<PriceStoreError> for LiveviewError {
    fn from(e: PriceStoreError) -> Self {
        match e {
            PriceStoreError::InvalidTable(_) => LiveviewError::config(e.to_string()),
            _ => LiveviewError::datastore(e.to_string()),
        }
    }
}
